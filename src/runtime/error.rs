use crate::language::{errors::ParseError, span::Position};
use crate::runtime::fragment::FragmentKind;
use std::path::PathBuf;
use thiserror::Error;

pub type FragmentResult<T> = Result<T, FragmentError>;

/// Failure of a single reference while evaluating a fragment body. Contained
/// per node: the reference renders as nothing and the error is reported.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message} at {position}")]
pub struct EvaluationError {
    pub position: Position,
    pub message: String,
    /// Fragment names from the tree root down to the failing fragment.
    pub ancestry: Vec<String>,
}

impl EvaluationError {
    pub fn line(&self) -> usize {
        self.position.line
    }

    pub fn column(&self) -> usize {
        self.position.column
    }

    pub fn trace(&self) -> String {
        self.ancestry.join(" > ")
    }
}

#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("could not load {kind} `{name}` from {}", path.display())]
    Load {
        kind: FragmentKind,
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse `{name}`: {error}")]
    Parse {
        name: String,
        body: String,
        error: ParseError,
    },
    #[error("fragment `{name}` includes itself (via {})", stack.join(" > "))]
    Cycle { name: String, stack: Vec<String> },
    #[error("fragment `{name}` is no longer attached to a fragment cache")]
    Detached { name: String },
    #[error("could not start script context for `{name}`: {source}")]
    Script {
        name: String,
        #[source]
        source: ScriptError,
    },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("{0}")]
    Runtime(String),
    #[error("builder must return exactly one value, got {0}")]
    ReturnCount(usize),
    #[error("value is not callable in this script context")]
    ForeignHandle,
}

/// Non-fatal conditions surfaced to the operator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyWarning {
    #[error(
        "metadata `{key}` written by `{fragment}` after rendering started; \
         earlier references keep their old value"
    )]
    StaleMetadataWrite { fragment: String, key: String },
    #[error(
        "`{fragment}` declares template `{template}` at depth {depth}; \
         templates are only honoured at the tree root"
    )]
    NestedTemplate {
        fragment: String,
        template: String,
        depth: usize,
    },
}
