use crate::language::{
    ast::{MetaRef, Node, Reference, TextNode},
    errors::ParseError,
    lexer::Lexer,
    token::{Token, TokenKind},
};

/// Parses fragment body source into a flat node sequence.
pub fn parse(source: &str) -> Result<Vec<Node>, ParseError> {
    Parser::new(source).parse()
}

struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
        }
    }

    fn parse(mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            let token = self.lexer.next_token();
            match token.kind {
                TokenKind::Eof => return Ok(nodes),
                TokenKind::Text | TokenKind::EscapedChar => nodes.push(Node::Text(TextNode {
                    text: token.literal,
                    position: token.position,
                })),
                TokenKind::MetaRefStart => {
                    let key = self.parse_key(&token)?;
                    nodes.push(Node::MetaRef(MetaRef {
                        key,
                        position: token.position,
                    }));
                }
                TokenKind::BuilderRefStart => {
                    let reference = self.parse_reference(&token)?;
                    nodes.push(Node::BuilderRef(reference));
                }
                TokenKind::FragmentRefStart => {
                    let reference = self.parse_reference(&token)?;
                    nodes.push(Node::FragmentRef(reference));
                }
                kind => {
                    return Err(ParseError::new(
                        format!("unknown token {kind}"),
                        token.position,
                    )
                    .with_help("escape reference sigils with `\\` or wrap the text in a fragment"))
                }
            }
        }
    }

    fn parse_key(&mut self, start: &Token) -> Result<String, ParseError> {
        let mut key = String::new();
        let mut depth = 1usize;
        loop {
            let token = self.lexer.next_token();
            match token.kind {
                TokenKind::Eof => return Err(unexpected_eof("reference", start)),
                TokenKind::CloseBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(key.trim().to_string());
                    }
                }
                kind if opens_brace(kind) => depth += 1,
                _ => {}
            }
            key.push_str(&token.literal);
        }
    }

    fn parse_reference(&mut self, start: &Token) -> Result<Reference, ParseError> {
        let mut name = String::new();
        let mut content = None;
        let mut depth = 1usize;
        loop {
            let token = self.lexer.next_token();
            match token.kind {
                TokenKind::Eof => return Err(unexpected_eof("reference", start)),
                TokenKind::CloseBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Reference {
                            name: name.trim().to_string(),
                            content,
                            position: start.position,
                        });
                    }
                    name.push_str(&token.literal);
                }
                TokenKind::DoubleOpenBracket => {
                    if content.is_some() {
                        return Err(ParseError::new(
                            "reference already has a content block",
                            token.position,
                        ));
                    }
                    content = Some(self.parse_content(&token)?);
                }
                kind => {
                    if opens_brace(kind) {
                        depth += 1;
                    }
                    name.push_str(&token.literal);
                }
            }
        }
    }

    /// Captures everything between `open` and its matching `]]` verbatim.
    fn parse_content(&mut self, open: &Token) -> Result<String, ParseError> {
        let mut depth = 1usize;
        loop {
            let token = self.lexer.next_token();
            match token.kind {
                TokenKind::Eof => return Err(unexpected_eof("content", open)),
                TokenKind::DoubleOpenBracket => depth += 1,
                TokenKind::DoubleCloseBracket => {
                    depth -= 1;
                    if depth == 0 {
                        let source = self.lexer.source();
                        return Ok(source[open.span.end..token.span.start].to_string());
                    }
                }
                _ => {}
            }
        }
    }
}

fn opens_brace(kind: TokenKind) -> bool {
    kind == TokenKind::OpenBrace || kind.is_reference_start()
}

fn unexpected_eof(what: &str, start: &Token) -> ParseError {
    ParseError::new(
        format!("unexpected end of input while parsing {what}"),
        start.position,
    )
    .with_help(format!("{} opened here is never closed", start.literal))
}
