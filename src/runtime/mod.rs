pub mod cache;
pub mod error;
pub mod fragment;
pub mod interpreter;
pub mod lua;
pub mod markdown;
pub mod script;
pub mod value;

pub use cache::FragmentCache;
pub use fragment::{Fragment, FragmentKind};
pub use interpreter::Interpreter;
