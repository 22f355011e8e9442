use crate::language::source::key_path;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Universal value for metadata and builder results.
#[derive(Clone, Debug, Default)]
pub enum CoreValue {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Table(Table),
    Function(ScriptHandle),
    Opaque(ScriptHandle),
}

impl CoreValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            CoreValue::Nil => "nil",
            CoreValue::Bool(_) => "bool",
            CoreValue::Number(_) => "number",
            CoreValue::String(_) => "string",
            CoreValue::Table(_) => "table",
            CoreValue::Function(_) => "function",
            CoreValue::Opaque(_) => "opaque",
        }
    }

    pub fn as_function(&self) -> Option<&ScriptHandle> {
        match self {
            CoreValue::Function(handle) => Some(handle),
            _ => None,
        }
    }
}

impl PartialEq for CoreValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CoreValue::Nil, CoreValue::Nil) => true,
            (CoreValue::Bool(a), CoreValue::Bool(b)) => a == b,
            (CoreValue::Number(a), CoreValue::Number(b)) => a == b,
            (CoreValue::String(a), CoreValue::String(b)) => a == b,
            (CoreValue::Table(a), CoreValue::Table(b)) => a == b,
            (CoreValue::Function(a), CoreValue::Function(b))
            | (CoreValue::Opaque(a), CoreValue::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for CoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreValue::Nil => write!(f, "nil"),
            CoreValue::Bool(value) => write!(f, "{value}"),
            CoreValue::Number(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
                    write!(f, "{}", *value as i64)
                } else {
                    write!(f, "{value}")
                }
            }
            CoreValue::String(value) => write!(f, "{value}"),
            CoreValue::Table(table) => {
                let count = table.len();
                let plural = if count == 1 { "" } else { "s" };
                write!(f, "[table with {count} item{plural}]")
            }
            CoreValue::Function(_) => write!(f, "<function>"),
            CoreValue::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl From<bool> for CoreValue {
    fn from(value: bool) -> Self {
        CoreValue::Bool(value)
    }
}

impl From<f64> for CoreValue {
    fn from(value: f64) -> Self {
        CoreValue::Number(value)
    }
}

impl From<&str> for CoreValue {
    fn from(value: &str) -> Self {
        CoreValue::String(value.to_string())
    }
}

impl From<String> for CoreValue {
    fn from(value: String) -> Self {
        CoreValue::String(value)
    }
}

impl From<Table> for CoreValue {
    fn from(value: Table) -> Self {
        CoreValue::Table(value)
    }
}

/// Opaque reference to a value living on the script side of the boundary.
#[derive(Clone)]
pub struct ScriptHandle(Rc<dyn Any>);

impl ScriptHandle {
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &ScriptHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScriptHandle(..)")
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("invalid metadata key `{key}`")]
    InvalidKey { key: String },
    #[error("metadata key not found: `{key}`")]
    Missing { key: String },
    #[error("metadata key `{key}`: `{segment}` is a {found}, not a table")]
    NotATable {
        key: String,
        segment: String,
        found: &'static str,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    entries: BTreeMap<String, CoreValue>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CoreValue> {
        self.entries.get(key)
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<CoreValue>,
    ) -> Option<CoreValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CoreValue)> {
        self.entries.iter()
    }

    /// Resolves a dotted key, descending through nested tables.
    pub fn lookup(&self, key: &str) -> Result<&CoreValue, LookupError> {
        let segments = key_path(key).ok_or_else(|| LookupError::InvalidKey {
            key: key.to_string(),
        })?;
        let (last, parents) = segments.split_last().ok_or_else(|| LookupError::InvalidKey {
            key: key.to_string(),
        })?;
        let mut current = self;
        for segment in parents {
            current = match current.entries.get(*segment) {
                Some(CoreValue::Table(table)) => table,
                Some(other) => {
                    return Err(LookupError::NotATable {
                        key: key.to_string(),
                        segment: segment.to_string(),
                        found: other.type_name(),
                    })
                }
                None => {
                    return Err(LookupError::Missing {
                        key: key.to_string(),
                    })
                }
            };
        }
        current.entries.get(*last).ok_or_else(|| LookupError::Missing {
            key: key.to_string(),
        })
    }

    /// Sets a dotted key, creating intermediate tables and replacing
    /// non-table intermediates.
    pub fn set(&mut self, key: &str, value: CoreValue) -> Result<(), LookupError> {
        let segments = key_path(key).ok_or_else(|| LookupError::InvalidKey {
            key: key.to_string(),
        })?;
        let (last, parents) = segments.split_last().ok_or_else(|| LookupError::InvalidKey {
            key: key.to_string(),
        })?;
        let mut current = self;
        for segment in parents {
            let slot = current
                .entries
                .entry(segment.to_string())
                .or_insert_with(|| CoreValue::Table(Table::new()));
            if !matches!(slot, CoreValue::Table(_)) {
                *slot = CoreValue::Table(Table::new());
            }
            current = match slot {
                CoreValue::Table(table) => table,
                _ => unreachable!("slot was just made a table"),
            };
        }
        current.entries.insert(last.to_string(), value);
        Ok(())
    }

    /// Merges `other` into `self`. Table/table pairs merge recursively, any
    /// other pair is overwritten by `other`'s value.
    pub fn merge_mut(&mut self, other: &Table) {
        for (key, incoming) in &other.entries {
            match (self.entries.get_mut(key), incoming) {
                (Some(CoreValue::Table(existing)), CoreValue::Table(incoming)) => {
                    existing.merge_mut(incoming)
                }
                _ => {
                    self.entries.insert(key.clone(), incoming.clone());
                }
            }
        }
    }
}

impl FromIterator<(String, CoreValue)> for Table {
    fn from_iter<I: IntoIterator<Item = (String, CoreValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = (&'a String, &'a CoreValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, CoreValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
