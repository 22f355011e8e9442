use crate::runtime::{
    cache::{FragmentCache, WeakCache},
    error::ScriptError,
    fragment::{Fragment, FragmentKind},
    markdown::render_markdown,
    script::{ScriptContext, ScriptEngine},
    value::{CoreValue, ScriptHandle, Table},
};
use mlua::{
    ExternalError, FromLua, IntoLua, Lua, MultiValue, UserData, UserDataFields, UserDataMethods,
    Value,
};
use std::{
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

/// Nesting limit when converting Lua tables, which may reference themselves.
const MAX_TABLE_DEPTH: usize = 64;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ContextId(u64);

/// A Lua value tagged with the context that produced it.
struct LuaRef {
    context: ContextId,
    value: Value,
}

impl From<mlua::Error> for ScriptError {
    fn from(error: mlua::Error) -> Self {
        ScriptError::Runtime(error.to_string())
    }
}

/// Runs prologues and builders in Lua 5.4, one fresh state per fragment.
#[derive(Clone, Copy, Debug, Default)]
pub struct LuaEngine;

impl LuaEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for LuaEngine {
    fn context(
        &self,
        fragment: &Rc<Fragment>,
        cache: &FragmentCache,
    ) -> Result<Box<dyn ScriptContext>, ScriptError> {
        Ok(Box::new(LuaContext::new(fragment, cache)?))
    }
}

pub struct LuaContext {
    lua: Lua,
    id: ContextId,
}

impl LuaContext {
    /// Fresh state exposing `this`, `fragments` and `renderMarkdown`.
    pub fn new(fragment: &Rc<Fragment>, cache: &FragmentCache) -> mlua::Result<Self> {
        let lua = Lua::new();
        let id = ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
        lua.set_app_data(id);

        let globals = lua.globals();
        globals.set("this", LuaFragment(Rc::clone(fragment)))?;
        globals.set("fragments", fragments_module(&lua, cache)?)?;
        globals.set(
            "renderMarkdown",
            lua.create_function(|_, markdown: String| Ok(render_markdown(&markdown)))?,
        )?;
        Ok(Self { lua, id })
    }
}

impl ScriptContext for LuaContext {
    fn run_prologue(&mut self, chunk: &str, code: &str) -> Result<(), ScriptError> {
        self.lua.load(code).set_name(format!("={chunk}")).exec()?;
        Ok(())
    }

    fn call_builder(
        &mut self,
        builder: &ScriptHandle,
        content: Option<&str>,
    ) -> Result<CoreValue, ScriptError> {
        let function = match builder.downcast_ref::<LuaRef>() {
            Some(LuaRef {
                context,
                value: Value::Function(function),
            }) if *context == self.id => function.clone(),
            _ => return Err(ScriptError::ForeignHandle),
        };
        let returned: MultiValue = match content {
            Some(content) => function.call(content)?,
            None => function.call(())?,
        };
        if returned.len() != 1 {
            return Err(ScriptError::ReturnCount(returned.len()));
        }
        let value = returned.into_iter().next().unwrap_or(Value::Nil);
        Ok(CoreValue::from_lua(value, &self.lua)?)
    }
}

/// `this` inside a prologue or builder.
struct LuaFragment(Rc<Fragment>);

enum MetaWrite {
    Merge(Table),
    Set(String, CoreValue),
}

impl UserData for LuaFragment {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("name", |_, this| Ok(this.0.name().to_string()));
        fields.add_field_method_get("kind", |_, this| Ok(this.0.kind().as_str()));
        fields.add_field_method_get("depth", |_, this| Ok(this.0.depth()));
        fields.add_field_method_get("code", |_, this| Ok(this.0.source().to_string()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("getLocalMeta", |lua, this, key: String| match this.0.local(&key) {
            Ok(value) => value.into_lua(lua),
            Err(_) => Ok(Value::Nil),
        });
        methods.add_method("getSharedMeta", |lua, this, key: String| match this.0.shared(&key) {
            Ok(value) => value.into_lua(lua),
            Err(_) => Ok(Value::Nil),
        });
        methods.add_method("getMeta", |lua, this, key: String| match this.0.resolve(&key) {
            Ok(value) => value.into_lua(lua),
            Err(_) => Ok(Value::Nil),
        });
        methods.add_method("setLocalMeta", |lua, this, (target, value): (Value, Value)| {
            match meta_write(lua, target, value)? {
                MetaWrite::Merge(table) => this.0.merge_local(&table),
                MetaWrite::Set(key, value) => this
                    .0
                    .set_local(&key, value)
                    .map_err(|error| error.into_lua_err())?,
            }
            Ok(())
        });
        methods.add_method("setSharedMeta", |lua, this, (target, value): (Value, Value)| {
            match meta_write(lua, target, value)? {
                MetaWrite::Merge(table) => this.0.merge_shared(&table),
                MetaWrite::Set(key, value) => this
                    .0
                    .set_shared(&key, value)
                    .map_err(|error| error.into_lua_err())?,
            }
            Ok(())
        });
        methods.add_method("addBuilders", |lua, this, builders: mlua::Table| {
            let mut table = Table::new();
            for pair in builders.pairs::<String, Value>() {
                let (name, value) = pair?;
                match value {
                    Value::Function(function) => {
                        let builder = handle(lua, Value::Function(function));
                        table.insert(name, CoreValue::Function(builder));
                    }
                    other => {
                        return Err(mlua::Error::RuntimeError(format!(
                            "builder `{name}` is a {}, expected a function",
                            other.type_name()
                        )))
                    }
                }
            }
            this.0.add_builders(&table);
            Ok(())
        });
        methods.add_method("builders", |lua, this, ()| {
            CoreValue::Table(this.0.builders()).into_lua(lua)
        });
        methods.add_method("setTemplate", |_, this, name: String| {
            this.0
                .declare_template(&name)
                .map_err(|error| error.into_lua_err())
        });
        methods.add_method("parent", |_, this, ()| Ok(this.0.parent().map(LuaFragment)));
    }
}

fn meta_write(lua: &Lua, target: Value, value: Value) -> mlua::Result<MetaWrite> {
    match target {
        Value::Table(table) => Ok(MetaWrite::Merge(table_from_lua(lua, table, 0)?)),
        Value::String(key) => Ok(MetaWrite::Set(
            String::from(key.to_string_lossy()),
            CoreValue::from_lua(value, lua)?,
        )),
        other => Err(mlua::Error::RuntimeError(format!(
            "expected a table or a key, got {}",
            other.type_name()
        ))),
    }
}

/// The `fragments` global: lookups into the build's fragment cache.
fn fragments_module(lua: &Lua, cache: &FragmentCache) -> mlua::Result<mlua::Table> {
    let module = lua.create_table()?;
    let layout = cache.layout();
    module.set("fragmentPath", layout.dir(FragmentKind::Fragment).display().to_string())?;
    module.set("pagePath", layout.dir(FragmentKind::Page).display().to_string())?;
    module.set("templatePath", layout.dir(FragmentKind::Template).display().to_string())?;

    let weak = cache.downgrade();
    module.set(
        "get",
        lua.create_function(move |_, name: String| lookup(&weak, &name, FragmentKind::Fragment))?,
    )?;
    let weak = cache.downgrade();
    module.set(
        "page",
        lua.create_function(move |_, name: String| lookup(&weak, &name, FragmentKind::Page))?,
    )?;
    let weak = cache.downgrade();
    module.set(
        "pages",
        lua.create_function(move |_, ()| {
            Ok(attached(&weak)?
                .get_all(FragmentKind::Page)
                .into_iter()
                .map(LuaFragment)
                .collect::<Vec<_>>())
        })?,
    )?;
    let weak = cache.downgrade();
    module.set(
        "under",
        lua.create_function(move |_, prefix: String| {
            Ok(attached(&weak)?
                .get_all_under(&prefix)
                .into_iter()
                .map(LuaFragment)
                .collect::<Vec<_>>())
        })?,
    )?;
    Ok(module)
}

fn attached(cache: &WeakCache) -> mlua::Result<FragmentCache> {
    cache
        .upgrade()
        .ok_or_else(|| mlua::Error::RuntimeError("fragment cache is no longer available".into()))
}

fn lookup(cache: &WeakCache, name: &str, kind: FragmentKind) -> mlua::Result<LuaFragment> {
    attached(cache)?
        .get(name, kind)
        .map(LuaFragment)
        .map_err(|error| error.into_lua_err())
}

fn current_context(lua: &Lua) -> Option<ContextId> {
    lua.app_data_ref::<ContextId>().map(|id| *id)
}

fn handle(lua: &Lua, value: Value) -> ScriptHandle {
    ScriptHandle::new(LuaRef {
        context: current_context(lua).unwrap_or(ContextId(0)),
        value,
    })
}

/// Script values only cross back into the context that created them.
fn project(lua: &Lua, handle: &ScriptHandle) -> Value {
    match handle.downcast_ref::<LuaRef>() {
        Some(reference) if Some(reference.context) == current_context(lua) => {
            reference.value.clone()
        }
        _ => Value::Nil,
    }
}

impl FromLua for CoreValue {
    fn from_lua(value: Value, lua: &Lua) -> mlua::Result<Self> {
        core_from_lua(lua, value, 0)
    }
}

fn core_from_lua(lua: &Lua, value: Value, depth: usize) -> mlua::Result<CoreValue> {
    Ok(match value {
        Value::Nil => CoreValue::Nil,
        Value::Boolean(flag) => CoreValue::Bool(flag),
        Value::Integer(number) => CoreValue::Number(number as f64),
        Value::Number(number) => CoreValue::Number(number),
        Value::String(text) => CoreValue::String(String::from(text.to_string_lossy())),
        Value::Table(table) => CoreValue::Table(table_from_lua(lua, table, depth + 1)?),
        Value::Function(function) => CoreValue::Function(handle(lua, Value::Function(function))),
        other => CoreValue::Opaque(handle(lua, other)),
    })
}

fn table_from_lua(lua: &Lua, table: mlua::Table, depth: usize) -> mlua::Result<Table> {
    if depth > MAX_TABLE_DEPTH {
        return Err(mlua::Error::RuntimeError(format!(
            "table nesting exceeds {MAX_TABLE_DEPTH} levels"
        )));
    }
    let mut result = Table::new();
    for pair in table.pairs::<Value, Value>() {
        let (key, value) = pair?;
        let key = match key {
            Value::String(key) => String::from(key.to_string_lossy()),
            Value::Integer(index) => index.to_string(),
            Value::Number(number) => CoreValue::Number(number).to_string(),
            other => {
                return Err(mlua::Error::RuntimeError(format!(
                    "unsupported table key of type {}",
                    other.type_name()
                )))
            }
        };
        result.insert(key, core_from_lua(lua, value, depth)?);
    }
    Ok(result)
}

impl IntoLua for CoreValue {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        match self {
            CoreValue::Nil => Ok(Value::Nil),
            CoreValue::Bool(flag) => Ok(Value::Boolean(flag)),
            CoreValue::Number(number) if number.fract() == 0.0 && number.abs() < 9.0e15 => {
                Ok(Value::Integer(number as i64))
            }
            CoreValue::Number(number) => Ok(Value::Number(number)),
            CoreValue::String(text) => lua.create_string(&text).map(Value::String),
            CoreValue::Table(table) => {
                let result = lua.create_table()?;
                for (key, value) in &table {
                    let value = value.clone().into_lua(lua)?;
                    match key.parse::<i64>() {
                        Ok(index) => result.raw_set(index, value)?,
                        Err(_) => result.raw_set(key.as_str(), value)?,
                    }
                }
                Ok(Value::Table(result))
            }
            CoreValue::Function(handle) | CoreValue::Opaque(handle) => Ok(project(lua, &handle)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::manifest::SiteLayout;
    use tempfile::TempDir;

    fn context(source: &str) -> (TempDir, FragmentCache, Rc<Fragment>, LuaContext) {
        let dir = TempDir::new().unwrap();
        let cache = FragmentCache::new(SiteLayout::new(dir.path()), LuaEngine::new());
        let fragment = cache.root_from_source("page", FragmentKind::Page, source);
        let context = LuaContext::new(&fragment, &cache).unwrap();
        (dir, cache, fragment, context)
    }

    #[test]
    fn prologue_sets_metadata_through_this() {
        let (_dir, _cache, fragment, mut context) = context("");
        context
            .run_prologue(
                "page",
                r#"
                this:setLocalMeta({ title = "Home", tags = { "a", "b" } })
                this:setSharedMeta("site.name", "demo")
                this:setLocalMeta("count", 3)
                "#,
            )
            .unwrap();

        assert_eq!(fragment.local("title").unwrap(), CoreValue::from("Home"));
        assert_eq!(fragment.local("tags.2").unwrap(), CoreValue::from("b"));
        assert_eq!(fragment.local("count").unwrap().to_string(), "3");
        assert_eq!(fragment.shared("site.name").unwrap(), CoreValue::from("demo"));
    }

    #[test]
    fn this_exposes_read_only_fields() {
        let (_dir, _cache, fragment, mut context) = context("code here");
        context
            .run_prologue(
                "page",
                r#"local parts = { this.name, this.kind, this.depth, this.code }
this:setLocalMeta("summary", table.concat(parts, "/"))"#,
            )
            .unwrap();
        assert_eq!(
            fragment.local("summary").unwrap(),
            CoreValue::from("page/page/0/code here")
        );

        let error = context.run_prologue("page", r#"this.name = "other""#).unwrap_err();
        assert!(matches!(error, ScriptError::Runtime(_)));
    }

    #[test]
    fn builders_are_called_with_optional_content() {
        let (_dir, _cache, fragment, mut context) = context("");
        context
            .run_prologue(
                "page",
                r#"this:addBuilders({
                    shout = function(content) return string.upper(content or "none") end,
                })"#,
            )
            .unwrap();

        let builder = fragment.builder("shout").unwrap();
        let handle = builder.as_function().unwrap();
        assert_eq!(context.call_builder(handle, Some("hi")).unwrap(), CoreValue::from("HI"));
        assert_eq!(context.call_builder(handle, None).unwrap(), CoreValue::from("NONE"));
    }

    #[test]
    fn builders_must_return_one_value() {
        let (_dir, _cache, fragment, mut context) = context("");
        context
            .run_prologue(
                "page",
                "this:addBuilders({ nothing = function() end, two = function() return 1, 2 end })",
            )
            .unwrap();

        let nothing = fragment.builder("nothing").unwrap();
        let two = fragment.builder("two").unwrap();
        assert!(matches!(
            context.call_builder(nothing.as_function().unwrap(), None),
            Err(ScriptError::ReturnCount(0))
        ));
        assert!(matches!(
            context.call_builder(two.as_function().unwrap(), None),
            Err(ScriptError::ReturnCount(2))
        ));
    }

    #[test]
    fn non_function_builders_are_rejected() {
        let (_dir, _cache, fragment, mut context) = context("");
        let error = context
            .run_prologue("page", r#"this:addBuilders({ nav = "text" })"#)
            .unwrap_err();
        assert!(error.to_string().contains("builder `nav` is a string"));
        assert!(fragment.builder("nav").is_none());
    }

    #[test]
    fn handles_from_another_context_are_not_callable() {
        let (_dir, cache, fragment, mut first) = context("");
        first
            .run_prologue("page", "this:addBuilders({ f = function() return 1 end })")
            .unwrap();
        let builder = fragment.builder("f").unwrap();

        let mut second = LuaContext::new(&fragment, &cache).unwrap();
        assert!(matches!(
            second.call_builder(builder.as_function().unwrap(), None),
            Err(ScriptError::ForeignHandle)
        ));
        second
            .run_prologue("page", r#"this:setLocalMeta("seen", type(this:builders().f))"#)
            .unwrap();
        assert_eq!(fragment.local("seen").unwrap(), CoreValue::from("nil"));
    }

    #[test]
    fn self_referencing_tables_are_rejected() {
        let (_dir, _cache, _fragment, mut context) = context("");
        let error = context
            .run_prologue("page", "local t = {}; t.me = t; this:setLocalMeta({ loop = t })")
            .unwrap_err();
        assert!(error.to_string().contains("table nesting exceeds"));
    }

    #[test]
    fn render_markdown_is_global() {
        let (_dir, _cache, fragment, mut context) = context("");
        context
            .run_prologue(
                "page",
                r##"this:setLocalMeta("html", renderMarkdown("# Title"))"##,
            )
            .unwrap();
        assert_eq!(
            fragment.local("html").unwrap(),
            CoreValue::from("<h1 id=\"title\">Title</h1>\n")
        );
    }

    #[test]
    fn missing_metadata_reads_as_nil() {
        let (_dir, _cache, fragment, mut context) = context("");
        context
            .run_prologue(
                "page",
                r#"this:setLocalMeta("missing", tostring(this:getMeta("no.such.key")))"#,
            )
            .unwrap();
        assert_eq!(fragment.local("missing").unwrap(), CoreValue::from("nil"));
    }
}
