use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, line_ending, space0},
    combinator::{all_consuming, eof},
    multi::separated_list1,
    sequence::{terminated, tuple},
    IResult, Parser as NomParser,
};

/// Line separating the Lua prologue from the fragment body.
pub const DELIMITER: &str = "~~~";

/// Fragment source split into its optional prologue and its body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceParts<'a> {
    pub prologue: Option<&'a str>,
    pub body: &'a str,
}

/// Splits on the first line consisting only of [`DELIMITER`]. The body is
/// trimmed; without a delimiter line the whole source is body.
pub fn split_source(source: &str) -> SourceParts<'_> {
    let mut line_start = 0;
    loop {
        let rest = &source[line_start..];
        if let Ok((body, _)) = delimiter_line(rest) {
            return SourceParts {
                prologue: Some(&source[..line_start]),
                body: body.trim(),
            };
        }
        match rest.find('\n') {
            Some(newline) => line_start += newline + 1,
            None => {
                return SourceParts {
                    prologue: None,
                    body: source.trim(),
                }
            }
        }
    }
}

fn delimiter_line(input: &str) -> IResult<&str, &str> {
    terminated(tag(DELIMITER), tuple((space0, alt((line_ending, eof))))).parse(input)
}

/// Splits a dotted metadata key into its segments. Empty segments are
/// rejected.
pub fn key_path(key: &str) -> Option<Vec<&str>> {
    let segment = take_while1(|ch: char| ch != '.');
    let parsed: IResult<&str, Vec<&str>> =
        all_consuming(separated_list1(char('.'), segment)).parse(key);
    parsed.ok().map(|(_, segments)| segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_prologue_and_body() {
        let parts = split_source("this:setTemplate(\"page\")\n~~~\n\n<h1>Hi</h1>\n");
        assert_eq!(parts.prologue, Some("this:setTemplate(\"page\")\n"));
        assert_eq!(parts.body, "<h1>Hi</h1>");
    }

    #[test]
    fn source_without_delimiter_is_all_body() {
        let parts = split_source("  <p>plain</p>\n");
        assert_eq!(parts.prologue, None);
        assert_eq!(parts.body, "<p>plain</p>");
    }

    #[test]
    fn delimiter_must_own_its_line() {
        let parts = split_source("text ~~~ more\n~~~x\nbody");
        assert_eq!(parts.prologue, None);
    }

    #[test]
    fn only_first_delimiter_splits() {
        let parts = split_source("~~~\nfirst\n~~~\nsecond");
        assert_eq!(parts.prologue, Some(""));
        assert_eq!(parts.body, "first\n~~~\nsecond");
    }

    #[test]
    fn key_paths() {
        assert_eq!(key_path("site.author.name"), Some(vec!["site", "author", "name"]));
        assert_eq!(key_path("CONTENT"), Some(vec!["CONTENT"]));
        assert_eq!(key_path("a..b"), None);
        assert_eq!(key_path(""), None);
        assert_eq!(key_path("trailing."), None);
    }
}
