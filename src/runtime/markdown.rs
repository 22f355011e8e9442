use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};

/// Renders GitHub-flavoured Markdown to HTML. Line breaks inside paragraphs
/// are kept as `<br />` and headings without an explicit id get one derived
/// from their text.
pub fn render_markdown(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_HEADING_ATTRIBUTES;

    let mut events: Vec<Event> = Parser::new_ext(markdown, options)
        .map(|event| match event {
            Event::SoftBreak => Event::HardBreak,
            other => other,
        })
        .collect();
    assign_heading_ids(&mut events);

    let mut output = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut output, events.into_iter());
    output
}

fn assign_heading_ids(events: &mut [Event]) {
    for index in 0..events.len() {
        let Event::Start(Tag::Heading { id: None, .. }) = &events[index] else {
            continue;
        };
        let mut text = String::new();
        for event in &events[index + 1..] {
            match event {
                Event::End(TagEnd::Heading(_)) => break,
                Event::Text(content) | Event::Code(content) => text.push_str(content),
                _ => {}
            }
        }
        let slug = slugify(&text);
        if slug.is_empty() {
            continue;
        }
        if let Event::Start(Tag::Heading { id, .. }) = &mut events[index] {
            *id = Some(CowStr::from(slug));
        }
    }
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if (ch.is_whitespace() || ch == '-' || ch == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_get_ids() {
        assert_eq!(render_markdown("# Hello World"), "<h1 id=\"hello-world\">Hello World</h1>\n");
        assert_eq!(render_markdown("## Intro {#custom}"), "<h2 id=\"custom\">Intro</h2>\n");
    }

    #[test]
    fn soft_breaks_become_line_breaks() {
        assert_eq!(render_markdown("one\ntwo"), "<p>one<br />\ntwo</p>\n");
    }

    #[test]
    fn gfm_extensions_are_enabled() {
        let html = render_markdown("~~old~~\n\n| a |\n|---|\n| 1 |\n\n- [x] done");
        assert!(html.contains("<del>old</del>"));
        assert!(html.contains("<table>"));
        assert!(html.contains("type=\"checkbox\""));
    }

    #[test]
    fn raw_html_passes_through() {
        assert_eq!(render_markdown("<div>kept</div>").trim_end(), "<div>kept</div>");
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("  Rust & Lua: 2 runtimes "), "rust-lua-2-runtimes");
        assert_eq!(slugify("???"), "");
    }
}
