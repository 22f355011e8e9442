use super::Site;
use crate::runtime::{
    error::{FragmentError, PolicyWarning},
    fragment::FragmentKind,
};
use std::rc::Rc;

#[test]
fn root_output_is_wrapped_by_its_template() {
    let site = Site::new();
    site.template("base", "<html><title>${title}</title>${CONTENT}</html>")
        .page(
            "index",
            r#"this:setTemplate("base")
this:setSharedMeta("title", "Home")
~~~
<p>body</p>"#,
        );

    assert_eq!(site.render("index"), "<html><title>Home</title><p>body</p></html>");
    let page = site.cache.cached("index", FragmentKind::Page).unwrap();
    let template = site.cache.cached("base", FragmentKind::Template).unwrap();
    assert!(template.shares_meta_with(&page));
    assert_eq!(page.output().as_deref(), Some(site.render("index").as_str()));
}

#[test]
fn page_local_metadata_is_not_visible_to_the_template() {
    let site = Site::new();
    site.template("base", "[${title}]${CONTENT}").page(
        "index",
        r#"this:setTemplate("base")
this:setLocalMeta("title", "local only")
~~~
body"#,
    );

    assert_eq!(site.render("index"), "[]body");
    assert_eq!(site.cache.diagnostics().evaluation_errors().len(), 1);
}

#[test]
fn templates_chain_through_their_own_templates() {
    let site = Site::new();
    site.template("page", "<main>${CONTENT}</main>")
        .template(
            "post",
            r#"this:setTemplate("page")
~~~
<article><h1>${postTitle}</h1>${CONTENT}</article>"#,
        )
        .page(
            "posts/hello",
            r#"this:setTemplate("post")
this:setSharedMeta({ postTitle = "Hello" })
~~~
text"#,
        );

    assert_eq!(
        site.render("posts/hello"),
        "<main><article><h1>Hello</h1>text</article></main>"
    );
}

#[test]
fn templates_are_ignored_below_the_root() {
    let site = Site::new();
    site.template("base", "WRAPPED(${CONTENT})")
        .fragment(
            "card",
            r#"this:setTemplate("base")
~~~
card"#,
        )
        .page("index", "<@{card}>");

    assert_eq!(site.render("index"), "<card>");
    assert_eq!(
        site.cache.diagnostics().warnings(),
        vec![PolicyWarning::NestedTemplate {
            fragment: "card".into(),
            template: "base".into(),
            depth: 1,
        }]
    );
}

#[test]
fn missing_template_is_a_script_error() {
    let site = Site::new();
    site.page(
        "index",
        r#"this:setTemplate("absent")
~~~
plain"#,
    );

    assert_eq!(site.render("index"), "plain");
    assert_eq!(site.cache.diagnostics().error_count(), 1);
}

#[test]
fn template_children_see_the_page_shared_metadata() {
    let site = Site::new();
    site.fragment("nav", "<nav>${section}</nav>")
        .template("base", "@{nav}${CONTENT}")
        .page(
            "index",
            r#"this:setTemplate("base")
this:setSharedMeta("section", "blog")
~~~
!"#,
        );

    assert_eq!(site.render("index"), "<nav>blog</nav>!");
}

#[test]
fn each_page_gets_a_fresh_template_instance() {
    let site = Site::new();
    site.template("base", "<${title}>${CONTENT}")
        .page(
            "a",
            r#"this:setTemplate("base")
this:setSharedMeta("title", "A")
~~~
1"#,
        )
        .page(
            "b",
            r#"this:setTemplate("base")
this:setSharedMeta("title", "B")
~~~
2"#,
        );

    assert_eq!(site.render("a"), "<A>1");
    let first = site.cache.cached("base", FragmentKind::Template).unwrap();
    assert_eq!(site.render("b"), "<B>2");
    let second = site.cache.cached("base", FragmentKind::Template).unwrap();
    assert!(!Rc::ptr_eq(&first, &second));
}

#[test]
fn a_template_wrapping_itself_is_a_cycle() {
    let site = Site::new();
    site.template(
        "loop",
        r#"this:setTemplate("loop")
~~~
${CONTENT}"#,
    )
    .page(
        "index",
        r#"this:setTemplate("loop")
~~~
x"#,
    );

    let error = site.cache.render("index", FragmentKind::Page).unwrap_err();
    assert!(error.to_string().contains("includes itself"));
}

#[test]
fn failing_template_fails_every_render() {
    let site = Site::new();
    site.template("base", "${unclosed").page(
        "index",
        r#"this:setTemplate("base")
this:setSharedMeta("title", "Home")
~~~
body"#,
    );

    for _ in 0..2 {
        let error = site.cache.render("index", FragmentKind::Page).unwrap_err();
        assert!(matches!(error, FragmentError::Parse { ref name, .. } if name == "base"));
    }
    assert!(site.cache.cached("index", FragmentKind::Page).is_none());
}
