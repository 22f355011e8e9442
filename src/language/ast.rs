use crate::language::span::Position;

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Text(TextNode),
    MetaRef(MetaRef),
    BuilderRef(Reference),
    FragmentRef(Reference),
}

impl Node {
    pub fn position(&self) -> Position {
        match self {
            Node::Text(node) => node.position,
            Node::MetaRef(node) => node.position,
            Node::BuilderRef(node) | Node::FragmentRef(node) => node.position,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextNode {
    pub text: String,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetaRef {
    pub key: String,
    pub position: Position,
}

/// A builder or fragment reference, with the raw source of its `[[...]]`
/// block when one was given.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    pub name: String,
    pub content: Option<String>,
    pub position: Position,
}
