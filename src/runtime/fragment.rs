use crate::language::{parser::parse, source::split_source};
use crate::runtime::{
    cache::{FragmentCache, WeakCache},
    error::{FragmentError, FragmentResult, PolicyWarning},
    interpreter::Interpreter,
    value::{CoreValue, LookupError, Table},
};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};
use tracing::{debug, warn};

/// Local metadata key holding the content injected by a parent or wrapped page.
pub const CONTENT: &str = "CONTENT";

/// Metadata table shared by every fragment of one evaluation tree.
pub type SharedMeta = Rc<RefCell<Table>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FragmentKind {
    Fragment,
    Page,
    Template,
}

impl FragmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::Fragment => "fragment",
            FragmentKind::Page => "page",
            FragmentKind::Template => "template",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalState {
    Pending,
    Evaluating,
    Evaluated,
}

/// Whether a root fragment renders itself or hands its output to a template.
#[derive(Clone, Debug, Default)]
pub enum Wrapping {
    #[default]
    Standalone,
    Wrapped(Rc<Fragment>),
}

/// One node of an evaluation tree. Every field is interior-mutable so that
/// script callbacks and the interpreter can share `Rc<Fragment>` handles;
/// no borrow is held across an evaluation step.
pub struct Fragment {
    name: String,
    kind: FragmentKind,
    source: String,
    depth: usize,
    parent: Option<Weak<Fragment>>,
    cache: WeakCache,
    local_meta: RefCell<Table>,
    shared_meta: RefCell<SharedMeta>,
    builders: RefCell<Table>,
    wrapping: RefCell<Wrapping>,
    state: Cell<EvalState>,
    body_started: Cell<bool>,
    output: RefCell<Option<String>>,
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("depth", &self.depth)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl Fragment {
    /// Root of a new tree with a fresh shared table seeded from `globals`.
    pub(crate) fn root(
        name: impl Into<String>,
        kind: FragmentKind,
        source: impl Into<String>,
        cache: WeakCache,
        globals: Table,
    ) -> Rc<Fragment> {
        Rc::new(Fragment {
            name: name.into(),
            kind,
            source: source.into(),
            depth: 0,
            parent: None,
            cache,
            local_meta: RefCell::new(Table::new()),
            shared_meta: RefCell::new(Rc::new(RefCell::new(globals))),
            builders: RefCell::new(Table::new()),
            wrapping: RefCell::new(Wrapping::Standalone),
            state: Cell::new(EvalState::Pending),
            body_started: Cell::new(false),
            output: RefCell::new(None),
        })
    }

    /// Child one level deeper that shares this fragment's metadata table.
    pub(crate) fn child(
        self: &Rc<Self>,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Rc<Fragment> {
        Rc::new(Fragment {
            name: name.into(),
            kind: FragmentKind::Fragment,
            source: source.into(),
            depth: self.depth + 1,
            parent: Some(Rc::downgrade(self)),
            cache: self.cache.clone(),
            local_meta: RefCell::new(Table::new()),
            shared_meta: RefCell::new(self.shared_meta()),
            builders: RefCell::new(Table::new()),
            wrapping: RefCell::new(Wrapping::Standalone),
            state: Cell::new(EvalState::Pending),
            body_started: Cell::new(false),
            output: RefCell::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn state(&self) -> EvalState {
        self.state.get()
    }

    pub fn parent(&self) -> Option<Rc<Fragment>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn cache(&self) -> Option<FragmentCache> {
        self.cache.upgrade()
    }

    /// Rendered output, present once evaluation finished.
    pub fn output(&self) -> Option<String> {
        self.output.borrow().clone()
    }

    /// Names from the tree root down to this fragment.
    pub fn ancestry(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        let mut current = self.parent();
        while let Some(fragment) = current {
            names.push(fragment.name.clone());
            current = fragment.parent();
        }
        names.reverse();
        names
    }

    pub fn shared_meta(&self) -> SharedMeta {
        Rc::clone(&self.shared_meta.borrow())
    }

    pub fn shares_meta_with(&self, other: &Fragment) -> bool {
        Rc::ptr_eq(&self.shared_meta.borrow(), &other.shared_meta.borrow())
    }

    pub fn local(&self, key: &str) -> Result<CoreValue, LookupError> {
        self.local_meta.borrow().lookup(key).cloned()
    }

    pub fn shared(&self, key: &str) -> Result<CoreValue, LookupError> {
        self.shared_meta.borrow().borrow().lookup(key).cloned()
    }

    /// Reference resolution: shared metadata wins over local metadata.
    pub fn resolve(&self, key: &str) -> Result<CoreValue, LookupError> {
        match self.shared(key) {
            Ok(value) => Ok(value),
            Err(_) => self.local(key),
        }
    }

    pub fn set_local(&self, key: &str, value: CoreValue) -> Result<(), LookupError> {
        self.check_stale(key);
        self.local_meta.borrow_mut().set(key, value)
    }

    pub fn merge_local(&self, table: &Table) {
        for key in table.iter().map(|(key, _)| key) {
            self.check_stale(key);
        }
        self.local_meta.borrow_mut().merge_mut(table);
    }

    pub fn set_shared(&self, key: &str, value: CoreValue) -> Result<(), LookupError> {
        self.check_stale_shared(key);
        self.shared_meta().borrow_mut().set(key, value)
    }

    pub fn merge_shared(&self, table: &Table) {
        for key in table.iter().map(|(key, _)| key) {
            self.check_stale_shared(key);
        }
        self.shared_meta().borrow_mut().merge_mut(table);
    }

    pub fn add_builders(&self, builders: &Table) {
        self.builders.borrow_mut().merge_mut(builders);
    }

    pub fn builder(&self, name: &str) -> Option<CoreValue> {
        self.builders.borrow().get(name).cloned()
    }

    pub fn builders(&self) -> Table {
        self.builders.borrow().clone()
    }

    pub fn template(&self) -> Option<Rc<Fragment>> {
        match &*self.wrapping.borrow() {
            Wrapping::Standalone => None,
            Wrapping::Wrapped(template) => Some(Rc::clone(template)),
        }
    }

    /// Declares the template that wraps this fragment's output. Only roots
    /// may be wrapped; anywhere else the request is reported and ignored.
    pub fn declare_template(&self, template: &str) -> FragmentResult<()> {
        if self.depth != 0 {
            self.report(PolicyWarning::NestedTemplate {
                fragment: self.name.clone(),
                template: template.to_string(),
                depth: self.depth,
            });
            return Ok(());
        }
        let cache = self.attached_cache()?;
        let template = cache.load(template, FragmentKind::Template)?;
        *self.wrapping.borrow_mut() = Wrapping::Wrapped(template);
        Ok(())
    }

    /// Evaluates the fragment once. Later calls return the stored output.
    pub fn evaluate(self: &Rc<Self>) -> FragmentResult<String> {
        match self.state.get() {
            EvalState::Evaluated => return Ok(self.output().unwrap_or_default()),
            EvalState::Evaluating => {
                return Err(FragmentError::Cycle {
                    name: self.name.clone(),
                    stack: self.ancestry(),
                })
            }
            EvalState::Pending => {}
        }

        let cache = self.attached_cache()?;
        let _claim = cache.claim(self)?;
        self.state.set(EvalState::Evaluating);
        debug!(fragment = %self.name, kind = %self.kind, depth = self.depth, "evaluating");

        match self.run(&cache) {
            Ok(output) => {
                *self.output.borrow_mut() = Some(output.clone());
                Ok(output)
            }
            Err(error) => {
                self.state.set(EvalState::Pending);
                self.body_started.set(false);
                Err(error)
            }
        }
    }

    /// Injects `content` as local `CONTENT`, folds `parent`'s shared metadata
    /// into this tree's shared table, then evaluates.
    pub fn with_content(
        self: &Rc<Self>,
        content: impl Into<String>,
        parent: &Fragment,
    ) -> FragmentResult<String> {
        if !self.shares_meta_with(parent) {
            let incoming = parent.shared_meta().borrow().clone();
            self.shared_meta().borrow_mut().merge_mut(&incoming);
        }
        let content: String = content.into();
        self.local_meta.borrow_mut().insert(CONTENT, content);
        self.evaluate()
    }

    fn run(self: &Rc<Self>, cache: &FragmentCache) -> FragmentResult<String> {
        let parts = split_source(&self.source);
        let mut context = cache
            .engine()
            .context(self, cache)
            .map_err(|source| FragmentError::Script {
                name: self.name.clone(),
                source,
            })?;

        if let Some(prologue) = parts.prologue.filter(|code| !code.trim().is_empty()) {
            if let Err(error) = context.run_prologue(&self.name, prologue) {
                cache.diagnostics().script_error(&self.ancestry(), &error);
            }
        }

        self.body_started.set(true);
        let nodes = parse(parts.body).map_err(|error| FragmentError::Parse {
            name: self.name.clone(),
            body: parts.body.to_string(),
            error,
        })?;
        let body = Interpreter::new(self, cache, context.as_mut()).render(parts.body, &nodes);
        drop(context);
        self.state.set(EvalState::Evaluated);

        let Some(template) = self.template() else {
            cache.add(&self.name, Rc::clone(self));
            return Ok(body);
        };
        debug!(fragment = %self.name, template = %template.name, "wrapping in template");
        template.adopt_shared(self.shared_meta());
        template.local_meta.borrow_mut().insert(CONTENT, body);
        cache.add(&self.name, Rc::clone(self));
        template.evaluate().inspect_err(|_| cache.remove(self))
    }

    fn adopt_shared(&self, shared: SharedMeta) {
        *self.shared_meta.borrow_mut() = shared;
    }

    fn started(&self) -> bool {
        self.body_started.get() || self.state.get() == EvalState::Evaluated
    }

    fn check_stale(&self, key: &str) {
        if self.started() {
            self.report(PolicyWarning::StaleMetadataWrite {
                fragment: self.name.clone(),
                key: key.to_string(),
            });
        }
    }

    /// Late once any fragment on the path to the root has started its body.
    fn check_stale_shared(&self, key: &str) {
        let mut started = self.started();
        let mut ancestor = self.parent();
        while !started {
            let Some(fragment) = ancestor else { break };
            started = fragment.started();
            ancestor = fragment.parent();
        }
        if started {
            self.report(PolicyWarning::StaleMetadataWrite {
                fragment: self.name.clone(),
                key: key.to_string(),
            });
        }
    }

    fn report(&self, warning: PolicyWarning) {
        match self.cache() {
            Some(cache) => cache.diagnostics().warning(warning),
            None => warn!("{warning}"),
        }
    }

    fn attached_cache(&self) -> FragmentResult<FragmentCache> {
        self.cache().ok_or_else(|| FragmentError::Detached {
            name: self.name.clone(),
        })
    }
}
