use std::{
    fs,
    path::Path,
    process::{Command, Output, Stdio},
};
use tempfile::TempDir;

fn fragments(args: &[&str], dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fragments"))
        .current_dir(dir)
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("failed to run fragments")
}

#[test]
fn new_site_builds_cleanly() {
    let dir = TempDir::new().unwrap();
    let output = fragments(&["new", "site"], dir.path());
    assert!(
        output.status.success(),
        "new failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let site = dir.path().join("site");
    let output = fragments(&["build", "--config", "site/fragments.toml"], dir.path());
    assert!(
        output.status.success(),
        "build failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let index = fs::read_to_string(site.join("build/index.html")).unwrap();
    assert!(index.starts_with("<!DOCTYPE html>"));
    assert!(index.contains("<title>Home | My Site</title>"));
    assert!(index.contains(r#"<a href="/posts/example.html">Example Post</a>"#));

    let post = fs::read_to_string(site.join("build/posts/example.html")).unwrap();
    assert!(post.contains("<h1>Example Post</h1>"));
    assert!(post.contains(r#"<h2 id="est-iove-sub-similis-latet">"#));
    assert!(site.join("build/style.css").is_file());
}

#[test]
fn render_prints_one_page() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("page")).unwrap();
    fs::create_dir_all(dir.path().join("fragment")).unwrap();
    fs::write(dir.path().join("fragment/nav.frag"), "<nav/>").unwrap();
    fs::write(
        dir.path().join("page/index.frag"),
        "this:setLocalMeta(\"title\", \"Home\")\n~~~\n${title} @{nav}",
    )
    .unwrap();

    let output = fragments(&["render", "index"], dir.path());
    assert!(
        output.status.success(),
        "render failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Home <nav/>\n");
}

#[test]
fn failing_page_sets_exit_code() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("page")).unwrap();
    fs::write(dir.path().join("page/ok.frag"), "fine").unwrap();
    fs::write(dir.path().join("page/bad.frag"), "${unclosed").unwrap();

    let output = fragments(&["build"], dir.path());
    assert!(!output.status.success());
    assert_eq!(fs::read_to_string(dir.path().join("build/ok.html")).unwrap(), "fine");
    assert!(!dir.path().join("build/bad.html").exists());
}
