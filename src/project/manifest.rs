use crate::runtime::{
    fragment::FragmentKind,
    value::{CoreValue, Table},
};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const CONFIG_FILE: &str = "fragments.toml";
pub const FRAGMENT_EXTENSION: &str = "frag";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("invalid config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    fragments: String,
    pages: String,
    templates: String,
    include: String,
    build: String,
    meta: toml::Table,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            fragments: "fragment".into(),
            pages: "page".into(),
            templates: "template".into(),
            include: "include".into(),
            build: "build".into(),
            meta: toml::Table::new(),
        }
    }
}

/// Where fragment sources of each kind live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteLayout {
    root: PathBuf,
    fragments: PathBuf,
    pages: PathBuf,
    templates: PathBuf,
}

impl SiteLayout {
    /// Default directory names under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            fragments: root.join("fragment"),
            pages: root.join("page"),
            templates: root.join("template"),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: FragmentKind) -> &Path {
        match kind {
            FragmentKind::Fragment => &self.fragments,
            FragmentKind::Page => &self.pages,
            FragmentKind::Template => &self.templates,
        }
    }

    /// `<dir for kind>/<name>.frag`; `name` may contain `/` for nested pages.
    pub fn source_path(&self, kind: FragmentKind, name: &str) -> PathBuf {
        self.dir(kind).join(format!("{name}.{FRAGMENT_EXTENSION}"))
    }
}

#[derive(Clone, Debug)]
pub struct SiteConfig {
    pub layout: SiteLayout,
    pub include: PathBuf,
    pub build: PathBuf,
    pub meta: Table,
}

impl SiteConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        let root = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&root, path, &content)
    }

    /// Layout with every default, for a site without a config file.
    pub fn with_defaults(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::from_raw(&root, RawConfig::default())
    }

    fn parse(root: &Path, path: &Path, content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: error.message().to_string(),
        })?;
        Ok(Self::from_raw(root, raw))
    }

    fn from_raw(root: &Path, raw: RawConfig) -> Self {
        Self {
            layout: SiteLayout {
                root: root.to_path_buf(),
                fragments: root.join(raw.fragments),
                pages: root.join(raw.pages),
                templates: root.join(raw.templates),
            },
            include: root.join(raw.include),
            build: root.join(raw.build),
            meta: raw
                .meta
                .into_iter()
                .map(|(key, value)| (key, toml_to_core(value)))
                .collect(),
        }
    }

    /// Shared metadata every page starts with: the `[meta]` table plus
    /// `build.*` values describing when the build ran.
    pub fn globals(&self, now: DateTime<Local>) -> Table {
        let mut build = Table::new();
        build.insert("date", now.format("%Y-%m-%d").to_string());
        build.insert("month", now.format("%m").to_string());
        build.insert("year", now.format("%Y").to_string());
        build.insert("timestamp", now.to_rfc3339());
        build.insert("unix", now.timestamp() as f64);

        let mut globals = self.meta.clone();
        let mut defaults = Table::new();
        defaults.insert("build", build);
        globals.merge_mut(&defaults);
        globals
    }
}

fn toml_to_core(value: toml::Value) -> CoreValue {
    match value {
        toml::Value::String(text) => CoreValue::String(text),
        toml::Value::Integer(number) => CoreValue::Number(number as f64),
        toml::Value::Float(number) => CoreValue::Number(number),
        toml::Value::Boolean(flag) => CoreValue::Bool(flag),
        toml::Value::Datetime(datetime) => CoreValue::String(datetime.to_string()),
        toml::Value::Array(items) => CoreValue::Table(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| ((index + 1).to_string(), toml_to_core(item)))
                .collect(),
        ),
        toml::Value::Table(table) => CoreValue::Table(
            table
                .into_iter()
                .map(|(key, item)| (key, toml_to_core(item)))
                .collect(),
        ),
    }
}
