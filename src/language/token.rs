use crate::language::span::{Position, Span};
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub position: Position,
    pub span: Span,
}

impl Token {
    pub fn line(&self) -> usize {
        self.position.line
    }

    pub fn column(&self) -> usize {
        self.position.column
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    EscapedChar,

    MetaRefStart,     // ${
    BuilderRefStart,  // *{
    FragmentRefStart, // @{

    OpenBrace,
    CloseBrace,
    DoubleOpenBracket,  // [[
    DoubleCloseBracket, // ]]

    Eof,
}

impl TokenKind {
    pub fn is_reference_start(self) -> bool {
        matches!(
            self,
            TokenKind::MetaRefStart | TokenKind::BuilderRefStart | TokenKind::FragmentRefStart
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Text => "text",
            TokenKind::EscapedChar => "escaped character",
            TokenKind::MetaRefStart => "`${`",
            TokenKind::BuilderRefStart => "`*{`",
            TokenKind::FragmentRefStart => "`@{`",
            TokenKind::OpenBrace => "`{`",
            TokenKind::CloseBrace => "`}`",
            TokenKind::DoubleOpenBracket => "`[[`",
            TokenKind::DoubleCloseBracket => "`]]`",
            TokenKind::Eof => "end of input",
        };
        f.write_str(name)
    }
}
