use crate::language::{
    ast::{MetaRef, Node, Reference},
    parser::parse,
    span::Position,
};
use crate::runtime::{
    cache::FragmentCache,
    error::EvaluationError,
    fragment::Fragment,
    script::ScriptContext,
    value::CoreValue,
};
use std::rc::Rc;

/// Renders the nodes of one fragment body using that fragment's metadata,
/// builders and script context.
pub struct Interpreter<'a> {
    fragment: &'a Rc<Fragment>,
    cache: &'a FragmentCache,
    context: &'a mut dyn ScriptContext,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        fragment: &'a Rc<Fragment>,
        cache: &'a FragmentCache,
        context: &'a mut dyn ScriptContext,
    ) -> Self {
        Self {
            fragment,
            cache,
            context,
        }
    }

    /// Concatenates every node. A failing node contributes nothing; its error
    /// is reported against `body` and rendering continues.
    pub fn render(&mut self, body: &str, nodes: &[Node]) -> String {
        let mut output = String::new();
        for node in nodes {
            match self.evaluate_node(node) {
                Ok(text) => output.push_str(&text),
                Err(error) => self
                    .cache
                    .diagnostics()
                    .evaluation_error(self.fragment.name(), body, error),
            }
        }
        output
    }

    fn evaluate_node(&mut self, node: &Node) -> Result<String, EvaluationError> {
        match node {
            Node::Text(text) => Ok(text.text.clone()),
            Node::MetaRef(meta) => self.evaluate_meta(meta),
            Node::BuilderRef(reference) => self.evaluate_builder(reference),
            Node::FragmentRef(reference) => self.evaluate_fragment(reference),
        }
    }

    fn evaluate_meta(&self, meta: &MetaRef) -> Result<String, EvaluationError> {
        self.fragment
            .resolve(&meta.key)
            .map(|value| value.to_string())
            .map_err(|error| self.error(meta.position, error.to_string()))
    }

    fn evaluate_builder(&mut self, reference: &Reference) -> Result<String, EvaluationError> {
        let builder = self.fragment.builder(&reference.name).ok_or_else(|| {
            let message = format!("builder not found: `{}`", reference.name);
            self.error(reference.position, message)
        })?;
        let handle = match builder {
            CoreValue::Function(handle) => handle,
            other => {
                let message = format!(
                    "builder `{}` is a {}, not a function",
                    reference.name,
                    other.type_name()
                );
                return Err(self.error(reference.position, message));
            }
        };

        let content = match &reference.content {
            Some(content) => Some(self.evaluate_content(content, reference)?),
            None => None,
        };
        let value = self
            .context
            .call_builder(&handle, content.as_deref())
            .map_err(|error| {
                self.error(
                    reference.position,
                    format!("error calling builder `{}`: {error}", reference.name),
                )
            })?;
        Ok(value.to_string())
    }

    fn evaluate_fragment(&mut self, reference: &Reference) -> Result<String, EvaluationError> {
        let child = self
            .cache
            .load_child(self.fragment, &reference.name)
            .map_err(|error| self.error(reference.position, error.to_string()))?;

        let result = match &reference.content {
            Some(content) => {
                let content = self.evaluate_content(content, reference)?;
                child.with_content(content, self.fragment)
            }
            None => child.evaluate(),
        };
        result.map_err(|error| self.error(reference.position, error.to_string()))
    }

    /// Content blocks are rendered in the referencing fragment's scope. Any
    /// failure inside fails the whole reference.
    fn evaluate_content(
        &mut self,
        content: &str,
        reference: &Reference,
    ) -> Result<String, EvaluationError> {
        let nodes = parse(content).map_err(|error| {
            self.error(
                reference.position,
                format!("content of `{}` failed to parse: {error}", reference.name),
            )
        })?;
        let mut output = String::new();
        for node in &nodes {
            let text = self.evaluate_node(node).map_err(|error| {
                self.error(
                    reference.position,
                    format!("in content of `{}`: {}", reference.name, error.message),
                )
            })?;
            output.push_str(&text);
        }
        Ok(output)
    }

    fn error(&self, position: Position, message: impl Into<String>) -> EvaluationError {
        EvaluationError {
            position,
            message: message.into(),
            ancestry: self.fragment.ancestry(),
        }
    }
}
