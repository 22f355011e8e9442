use crate::project::manifest::{SiteConfig, FRAGMENT_EXTENSION};
use crate::runtime::{
    cache::FragmentCache,
    error::FragmentError,
    fragment::FragmentKind,
    lua::LuaEngine,
};
use crate::tools::diagnostics::Issue;
use chrono::Local;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, info};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to scan {}: {error}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        error: walkdir::Error,
    },
    #[error("failed to write {}: {error}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
}

#[derive(Debug, Default)]
pub struct BuildReport {
    /// Written output files, in build order.
    pub built: Vec<PathBuf>,
    pub failed: Vec<(String, FragmentError)>,
    pub copied: usize,
    pub issues: Vec<Issue>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.issues.iter().all(|issue| matches!(issue, Issue::Warning(_)))
    }
}

/// A cache for one build, seeded with the site's global metadata.
pub fn site_cache(config: &SiteConfig) -> FragmentCache {
    let cache = FragmentCache::new(config.layout.clone(), LuaEngine::new());
    cache.set_globals(config.globals(Local::now()));
    cache
}

/// Builds every page to `<build>/<name>.html` and copies the include
/// directory alongside. Pages that fail are recorded and skipped.
pub fn build_site(config: &SiteConfig) -> Result<BuildReport, BuildError> {
    let cache = site_cache(config);
    let pages = discover_pages(config.layout.dir(FragmentKind::Page))?;
    info!(pages = pages.len(), "building site");

    let mut report = BuildReport::default();
    for name in pages {
        match cache.render(&name, FragmentKind::Page) {
            Ok(html) => {
                let path = config.build.join(format!("{name}.html"));
                write_output(&path, &html)?;
                debug!(page = %name, path = %path.display(), "wrote page");
                report.built.push(path);
            }
            Err(err) => {
                error!(page = %name, "{err}");
                report.failed.push((name, err));
            }
        }
    }

    report.copied = copy_dir(&config.include, &config.build)?;
    report.issues = cache.diagnostics().take();
    info!(
        built = report.built.len(),
        failed = report.failed.len(),
        copied = report.copied,
        "build finished"
    );
    Ok(report)
}

/// Page names relative to `dir`, deepest first so that listing pages near
/// the top see nested pages already in the cache.
pub fn discover_pages(dir: &Path) -> Result<Vec<String>, BuildError> {
    let mut pages = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|error| BuildError::Scan {
            path: dir.to_path_buf(),
            error,
        })?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|ext| ext.to_str()) != Some(FRAGMENT_EXTENSION)
        {
            continue;
        }
        if let Some(name) = page_name(dir, path) {
            pages.push(name);
        }
    }
    pages.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
    Ok(pages)
}

fn page_name(dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(dir).ok()?.with_extension("");
    let segments: Vec<&str> = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(segments.join("/"))
}

fn depth(name: &str) -> usize {
    name.matches('/').count()
}

fn write_output(path: &Path, contents: &str) -> Result<(), BuildError> {
    let write = || -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    };
    write().map_err(|error| BuildError::Write {
        path: path.to_path_buf(),
        error,
    })
}

/// Copies every file under `from` into `to`. A missing `from` copies nothing.
fn copy_dir(from: &Path, to: &Path) -> Result<usize, BuildError> {
    if !from.is_dir() {
        return Ok(0);
    }
    let mut copied = 0;
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|error| BuildError::Scan {
            path: from.to_path_buf(),
            error,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);
        let copy = || -> io::Result<()> {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).map(|_| ())
        };
        copy().map_err(|error| BuildError::Write {
            path: target.clone(),
            error,
        })?;
        copied += 1;
    }
    Ok(copied)
}
