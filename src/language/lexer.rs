use crate::language::{
    span::{Position, Span},
    token::{Token, TokenKind},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Context {
    Reference,
    Content,
}

pub struct Lexer<'a> {
    src: &'a str,
    chars: std::str::Chars<'a>,
    current: Option<char>,
    offset: usize,
    line: usize,
    column: usize,
    contexts: Vec<Context>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        let mut chars = src.chars();
        let current = chars.next();
        Self {
            src,
            chars,
            current,
            offset: 0,
            line: 1,
            column: 1,
            contexts: Vec::new(),
        }
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    pub fn next_token(&mut self) -> Token {
        if self.in_reference() {
            self.skip_whitespace();
        }

        let start = self.offset;
        let position = Position::new(self.line, self.column);
        let Some(ch) = self.current else {
            return self.token(TokenKind::Eof, String::new(), start, position);
        };

        match ch {
            '\\' => match self.peek() {
                Some(next @ ('@' | '*' | '$' | '\\' | '{' | '}' | '[' | ']')) => {
                    self.bump();
                    self.bump();
                    self.token(TokenKind::EscapedChar, next.to_string(), start, position)
                }
                _ => {
                    self.bump();
                    self.token(TokenKind::Text, "\\".into(), start, position)
                }
            },
            '$' | '*' | '@' if self.peek() == Some('{') => {
                self.bump();
                self.bump();
                let kind = match ch {
                    '$' => TokenKind::MetaRefStart,
                    '*' => TokenKind::BuilderRefStart,
                    _ => TokenKind::FragmentRefStart,
                };
                self.contexts.push(Context::Reference);
                self.token(kind, format!("{ch}{{"), start, position)
            }
            '{' => {
                self.bump();
                if self.in_reference() {
                    self.contexts.push(Context::Reference);
                }
                self.token(TokenKind::OpenBrace, "{".into(), start, position)
            }
            '}' => {
                self.bump();
                if self.in_reference() {
                    self.contexts.pop();
                }
                self.token(TokenKind::CloseBrace, "}".into(), start, position)
            }
            '[' if self.peek() == Some('[') => {
                self.bump();
                self.bump();
                if !self.contexts.is_empty() {
                    self.contexts.push(Context::Content);
                }
                self.token(TokenKind::DoubleOpenBracket, "[[".into(), start, position)
            }
            ']' if self.peek() == Some(']') => {
                self.bump();
                self.bump();
                if self.contexts.last() == Some(&Context::Content) {
                    self.contexts.pop();
                }
                self.token(TokenKind::DoubleCloseBracket, "]]".into(), start, position)
            }
            '$' | '*' | '@' | '[' | ']' => {
                self.bump();
                self.token(TokenKind::Text, ch.to_string(), start, position)
            }
            _ => self.lex_text(start, position),
        }
    }

    fn in_reference(&self) -> bool {
        self.contexts.last() == Some(&Context::Reference)
    }

    fn bump(&mut self) -> Option<char> {
        if let Some(ch) = self.current {
            self.offset += ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.current = self.chars.next();
        self.current
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current, Some(' ' | '\t')) {
            self.bump();
        }
    }

    fn lex_text(&mut self, start: usize, position: Position) -> Token {
        while let Some(ch) = self.current {
            if is_special(ch) {
                break;
            }
            self.bump();
        }
        let literal = self.src[start..self.offset].to_string();
        self.token(TokenKind::Text, literal, start, position)
    }

    fn token(&self, kind: TokenKind, literal: String, start: usize, position: Position) -> Token {
        Token {
            kind,
            literal,
            position,
            span: Span::new(start, self.offset),
        }
    }
}

fn is_special(ch: char) -> bool {
    matches!(ch, '\\' | '@' | '*' | '$' | '{' | '}' | '[' | ']')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|token| token.kind).collect()
    }

    fn literals(source: &str) -> Vec<String> {
        lex(source).into_iter().map(|token| token.literal).collect()
    }

    #[test]
    fn escapes_produce_unescaped_characters() {
        let tokens = lex(r"a\@b\*c\$d\\e");
        let escaped: Vec<_> = tokens
            .iter()
            .filter(|token| token.kind == TokenKind::EscapedChar)
            .map(|token| token.literal.as_str())
            .collect();
        assert_eq!(escaped, vec!["@", "*", "$", "\\"]);
    }

    #[test]
    fn braces_and_brackets_can_be_escaped() {
        let tokens = lex(r"\{\}\[\]");
        assert!(tokens[..4]
            .iter()
            .all(|token| token.kind == TokenKind::EscapedChar));
        assert_eq!(literals(r"\{\}\[\]").concat(), "{}[]");
    }

    #[test]
    fn backslash_before_ordinary_char_is_text() {
        assert_eq!(literals(r"\n"), vec!["\\", "n", ""]);
        assert_eq!(kinds(r"\n")[0], TokenKind::Text);
    }

    #[test]
    fn sigils_without_brace_are_text() {
        assert_eq!(
            kinds("$5 * 2 @home [x]"),
            vec![
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Eof,
            ]
        );
        let joined: String = literals("$5 * 2 @home [x]").concat();
        assert_eq!(joined, "$5 * 2 @home [x]");
    }

    #[test]
    fn recognizes_two_character_tokens() {
        assert_eq!(
            kinds("${a}*{b[[c]]}@{d}"),
            vec![
                TokenKind::MetaRefStart,
                TokenKind::Text,
                TokenKind::CloseBrace,
                TokenKind::BuilderRefStart,
                TokenKind::Text,
                TokenKind::DoubleOpenBracket,
                TokenKind::Text,
                TokenKind::DoubleCloseBracket,
                TokenKind::CloseBrace,
                TokenKind::FragmentRefStart,
                TokenKind::Text,
                TokenKind::CloseBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn whitespace_is_kept_in_text_and_skipped_inside_references() {
        assert_eq!(
            literals("a  ${  key}  b"),
            vec!["a  ", "${", "key", "}", "  b", ""]
        );
    }

    #[test]
    fn content_blocks_keep_whitespace() {
        let tokens = lex("*{x[[  spaced ]]}");
        assert_eq!(tokens[3].literal, "  spaced ");
    }

    #[test]
    fn tracks_lines_and_columns() {
        let tokens = lex("ab\n  ${x}");
        assert_eq!(tokens[0].literal, "ab\n  ");
        assert_eq!(tokens[0].position, Position::new(1, 1));
        assert_eq!(tokens[1].kind, TokenKind::MetaRefStart);
        assert_eq!(tokens[1].position, Position::new(2, 3));
        assert_eq!(tokens[2].position, Position::new(2, 5));
    }

    #[test]
    fn spans_cover_source_bytes() {
        let source = "é${k}";
        let tokens = lex(source);
        assert_eq!(&source[tokens[1].span.start..tokens[1].span.end], "${");
        assert_eq!(tokens[1].position, Position::new(1, 2));
    }
}
