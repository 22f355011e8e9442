use crate::project::manifest::CONFIG_FILE;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ScaffoldError {
    #[error("{} already contains a site", path.display())]
    Exists { path: PathBuf },
    #[error("failed to write {}: {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
}

const CONFIG: &str = r#"# Directories are relative to this file.

# Reusable pieces of markup, referenced from other fragments with @{name}.
fragments = "fragment"

# Every page becomes one HTML file in the build directory.
pages = "page"

# Wrappers selected with this:setTemplate("name").
templates = "template"

# Copied verbatim into the build directory.
include = "include"

build = "build"

[meta]
site_title = "My Site"
"#;

const INDEX_PAGE: &str = r#"this:setTemplate("page")
this:setSharedMeta("title", "Home")

~~~

<h1 class="title">Welcome to ${site_title}!</h1>
<p class="description">Built on ${build.date}.</p>

<h2>Recent posts</h2>
@{blogposts}"#;

const EXAMPLE_POST: &str = r#"this:setTemplate("post")

this:setSharedMeta {
    title = "Example Post",
    postTitle = "Example Post",
    postDescription = "This is an example post.",
    postDate = os.date("%Y-%m-%d"),
    author = "Lorem Ipsum",
}

~~~

# An example post

Lorem markdownum en mihi figuram. Emittere honore! Prosunt dedisset signans
dominaeque nuda; atra ardua nomina, tu hoc?

- Senem quam molitur parva
- Saevitiam temone

## Est Iove sub similis latet

Aurora tamen et taedia saecula genetrici dixit et cupiere forma serpere.
*Surgit quod exequialia* praeceps aureus ad unde flenti.
"#;

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>${title} | ${site_title}</title>
    <link rel="stylesheet" href="/style.css">
</head>
<body>
    @{nav}

    <main>
        ${CONTENT}
    </main>

    @{footer}
</body>
</html>"#;

const POST_TEMPLATE: &str = r#"this:setTemplate("page")

-- Posts set postTitle, postDate, postDescription and author.

~~~
<article>
    <h1>${postTitle}</h1>
    <p class="byline">${author}, ${postDate}</p>
    @{markdown[[${CONTENT}]]}
</article>"#;

const NAV_FRAGMENT: &str = r#"<header class="nav">
    <a href="/index.html" class="unstyled-link">${site_title}</a>
</header>"#;

const FOOTER_FRAGMENT: &str = r#"<footer class="footer">
    <p>&copy; ${build.year} ${site_title}</p>
</footer>"#;

const MARKDOWN_FRAGMENT: &str = r#"local source = this:getLocalMeta("CONTENT") or ""
this:setLocalMeta("html", renderMarkdown(source))

~~~
${html}"#;

const BLOGPOSTS_FRAGMENT: &str = r#"local items = {}
for _, post in ipairs(fragments.under("posts/")) do
    local title = post:getSharedMeta("postTitle") or post.name
    table.insert(items, string.format('<li><a href="/%s.html">%s</a></li>', post.name, title))
end
this:setLocalMeta("posts", table.concat(items, "\n"))

~~~
<ul class="posts">
${posts}
</ul>"#;

const STYLESHEET: &str = "body {
    font-family: system-ui;
    margin: 0;
    padding: 0;
    background-color: #1e1e2e;
    color: #cdd6f4;
}
";

const FILES: &[(&str, &str)] = &[
    (CONFIG_FILE, CONFIG),
    ("page/index.frag", INDEX_PAGE),
    ("page/posts/example.frag", EXAMPLE_POST),
    ("template/page.frag", PAGE_TEMPLATE),
    ("template/post.frag", POST_TEMPLATE),
    ("fragment/nav.frag", NAV_FRAGMENT),
    ("fragment/footer.frag", FOOTER_FRAGMENT),
    ("fragment/markdown.frag", MARKDOWN_FRAGMENT),
    ("fragment/blogposts.frag", BLOGPOSTS_FRAGMENT),
    ("include/style.css", STYLESHEET),
];

/// Writes the starter site into `dir`, refusing to touch an existing site.
pub fn create_site(dir: &Path) -> Result<Vec<PathBuf>, ScaffoldError> {
    let config = dir.join(CONFIG_FILE);
    if config.exists() {
        return Err(ScaffoldError::Exists {
            path: dir.to_path_buf(),
        });
    }

    let mut written = Vec::with_capacity(FILES.len());
    for (relative, contents) in FILES {
        let path = dir.join(relative);
        write_file(&path, contents).map_err(|error| ScaffoldError::Io {
            path: path.clone(),
            error,
        })?;
        written.push(path);
    }
    info!(dir = %dir.display(), files = written.len(), "created site");
    Ok(written)
}

fn write_file(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_the_starter_site_once() {
        let dir = TempDir::new().unwrap();
        let written = create_site(dir.path()).unwrap();
        assert_eq!(written.len(), FILES.len());
        assert!(dir.path().join("template/page.frag").is_file());

        let error = create_site(dir.path()).unwrap_err();
        assert!(matches!(error, ScaffoldError::Exists { .. }));
    }
}
