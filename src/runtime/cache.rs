use crate::project::manifest::SiteLayout;
use crate::runtime::{
    error::{FragmentError, FragmentResult},
    fragment::{Fragment, FragmentKind},
    script::ScriptEngine,
    value::Table,
};
use crate::tools::diagnostics::Diagnostics;
use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    rc::{Rc, Weak},
};
use tracing::{debug, trace};

type CacheKey = (FragmentKind, String);

struct CacheState {
    layout: SiteLayout,
    engine: Box<dyn ScriptEngine>,
    globals: RefCell<Table>,
    entries: RefCell<HashMap<CacheKey, Rc<Fragment>>>,
    active: RefCell<Vec<CacheKey>>,
    diagnostics: Diagnostics,
}

/// Registry of evaluated fragments for one build, keyed by kind and name.
/// Cloning yields another handle onto the same registry.
#[derive(Clone)]
pub struct FragmentCache {
    state: Rc<CacheState>,
}

/// Non-owning handle held by fragments so the cache can own them in turn.
#[derive(Clone, Default)]
pub struct WeakCache(Weak<CacheState>);

impl WeakCache {
    pub fn upgrade(&self) -> Option<FragmentCache> {
        self.0.upgrade().map(|state| FragmentCache { state })
    }
}

/// Marks a fragment as under evaluation until dropped.
pub(crate) struct Claim {
    cache: FragmentCache,
    key: CacheKey,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut active = self.cache.state.active.borrow_mut();
        if let Some(index) = active.iter().rposition(|key| *key == self.key) {
            active.remove(index);
        }
    }
}

impl FragmentCache {
    pub fn new(layout: SiteLayout, engine: impl ScriptEngine + 'static) -> Self {
        Self {
            state: Rc::new(CacheState {
                layout,
                engine: Box::new(engine),
                globals: RefCell::new(Table::new()),
                entries: RefCell::new(HashMap::new()),
                active: RefCell::new(Vec::new()),
                diagnostics: Diagnostics::default(),
            }),
        }
    }

    pub fn layout(&self) -> &SiteLayout {
        &self.state.layout
    }

    pub fn engine(&self) -> &dyn ScriptEngine {
        self.state.engine.as_ref()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.state.diagnostics
    }

    pub fn downgrade(&self) -> WeakCache {
        WeakCache(Rc::downgrade(&self.state))
    }

    /// Metadata every new tree starts its shared table with.
    pub fn set_globals(&self, globals: Table) {
        *self.state.globals.borrow_mut() = globals;
    }

    pub fn globals(&self) -> Table {
        self.state.globals.borrow().clone()
    }

    /// Returns the evaluated fragment, loading and evaluating it on a miss.
    pub fn get(&self, name: &str, kind: FragmentKind) -> FragmentResult<Rc<Fragment>> {
        if let Some(fragment) = self.cached(name, kind) {
            trace!(%kind, name, "cache hit");
            return Ok(fragment);
        }
        let fragment = self.load(name, kind)?;
        fragment.evaluate()?;
        Ok(fragment)
    }

    /// Evaluated output of a root fragment.
    pub fn render(&self, name: &str, kind: FragmentKind) -> FragmentResult<String> {
        let fragment = self.get(name, kind)?;
        Ok(fragment.output().unwrap_or_default())
    }

    pub fn cached(&self, name: &str, kind: FragmentKind) -> Option<Rc<Fragment>> {
        self.state
            .entries
            .borrow()
            .get(&(kind, name.to_string()))
            .cloned()
    }

    /// Registers an evaluated fragment under `name`. Last registration wins.
    pub fn add(&self, name: &str, fragment: Rc<Fragment>) {
        debug!(kind = %fragment.kind(), name, "registered");
        self.state
            .entries
            .borrow_mut()
            .insert((fragment.kind(), name.to_string()), fragment);
    }

    /// Drops the registration of `fragment`, if it is still the registered one.
    pub(crate) fn remove(&self, fragment: &Rc<Fragment>) {
        let key = (fragment.kind(), fragment.name().to_string());
        let mut entries = self.state.entries.borrow_mut();
        if entries.get(&key).is_some_and(|entry| Rc::ptr_eq(entry, fragment)) {
            debug!(kind = %key.0, name = %key.1, "unregistered");
            entries.remove(&key);
        }
    }

    /// Registered fragments of one kind, ordered by name.
    pub fn get_all(&self, kind: FragmentKind) -> Vec<Rc<Fragment>> {
        self.collect(|(entry_kind, _)| *entry_kind == kind)
    }

    /// Registered fragments of any kind whose name starts with `prefix`,
    /// ordered by kind then name.
    pub fn get_all_under(&self, prefix: &str) -> Vec<Rc<Fragment>> {
        self.collect(|(_, name)| name.starts_with(prefix))
    }

    /// Reads `name` from the directory for `kind` into a pending root fragment.
    pub fn load(&self, name: &str, kind: FragmentKind) -> FragmentResult<Rc<Fragment>> {
        let source = self.read_source(name, kind)?;
        Ok(self.root_from_source(name, kind, source))
    }

    pub fn root_from_source(
        &self,
        name: &str,
        kind: FragmentKind,
        source: impl Into<String>,
    ) -> Rc<Fragment> {
        Fragment::root(name, kind, source, self.downgrade(), self.globals())
    }

    /// Reads fragment `name` as a child of `parent`.
    pub fn load_child(&self, parent: &Rc<Fragment>, name: &str) -> FragmentResult<Rc<Fragment>> {
        let source = self.read_source(name, FragmentKind::Fragment)?;
        Ok(parent.child(name, source))
    }

    /// Fails when the same kind and name is already being evaluated further
    /// up the stack.
    pub(crate) fn claim(&self, fragment: &Fragment) -> FragmentResult<Claim> {
        let key = (fragment.kind(), fragment.name().to_string());
        let mut active = self.state.active.borrow_mut();
        if active.contains(&key) {
            let mut stack: Vec<String> = active.iter().map(|(_, name)| name.clone()).collect();
            stack.push(key.1.clone());
            return Err(FragmentError::Cycle {
                name: key.1,
                stack,
            });
        }
        active.push(key.clone());
        Ok(Claim {
            cache: self.clone(),
            key,
        })
    }

    fn read_source(&self, name: &str, kind: FragmentKind) -> FragmentResult<String> {
        let path = self.state.layout.source_path(kind, name);
        trace!(%kind, name, path = %path.display(), "reading");
        fs::read_to_string(&path).map_err(|source| FragmentError::Load {
            kind,
            name: name.to_string(),
            path,
            source,
        })
    }

    fn collect(&self, filter: impl Fn(&CacheKey) -> bool) -> Vec<Rc<Fragment>> {
        let entries = self.state.entries.borrow();
        let mut keys: Vec<&CacheKey> = entries.keys().filter(|key| filter(key)).collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| entries.get(key).cloned())
            .collect()
    }
}
