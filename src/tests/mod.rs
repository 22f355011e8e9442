mod templates;

use crate::project::manifest::SiteLayout;
use crate::runtime::{cache::FragmentCache, fragment::FragmentKind, lua::LuaEngine};
use std::fs;
use tempfile::TempDir;

/// A throwaway site directory with the default layout.
pub(crate) struct Site {
    _dir: TempDir,
    pub cache: FragmentCache,
}

impl Site {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cache = FragmentCache::new(SiteLayout::new(dir.path()), LuaEngine::new());
        Self { _dir: dir, cache }
    }

    pub fn write(&self, kind: FragmentKind, name: &str, source: &str) -> &Self {
        let path = self.cache.layout().source_path(kind, name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, source).unwrap();
        self
    }

    pub fn fragment(&self, name: &str, source: &str) -> &Self {
        self.write(FragmentKind::Fragment, name, source)
    }

    pub fn page(&self, name: &str, source: &str) -> &Self {
        self.write(FragmentKind::Page, name, source)
    }

    pub fn template(&self, name: &str, source: &str) -> &Self {
        self.write(FragmentKind::Template, name, source)
    }

    pub fn render(&self, page: &str) -> String {
        self.cache.render(page, FragmentKind::Page).unwrap()
    }
}
