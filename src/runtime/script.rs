use crate::runtime::{
    cache::FragmentCache,
    error::ScriptError,
    fragment::Fragment,
    value::{CoreValue, ScriptHandle},
};
use std::rc::Rc;

/// Creates one isolated script context per fragment evaluation.
pub trait ScriptEngine {
    fn context(
        &self,
        fragment: &Rc<Fragment>,
        cache: &FragmentCache,
    ) -> Result<Box<dyn ScriptContext>, ScriptError>;
}

/// Script state bound to a single fragment. Handles produced by one context
/// are never callable from another.
pub trait ScriptContext {
    /// Runs the prologue. `chunk` names the code in script error messages.
    fn run_prologue(&mut self, chunk: &str, code: &str) -> Result<(), ScriptError>;

    /// Calls a builder with the evaluated content block, if the reference had one.
    fn call_builder(
        &mut self,
        builder: &ScriptHandle,
        content: Option<&str>,
    ) -> Result<CoreValue, ScriptError>;
}
