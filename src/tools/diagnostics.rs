use crate::{
    language::{errors::ParseError, span::Position},
    runtime::error::{EvaluationError, FragmentError, PolicyWarning, ScriptError},
};
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use std::cell::RefCell;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
pub struct EvaluationDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{label}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
    label: String,
}

impl EvaluationDiagnostic {
    pub fn from_error(fragment: &str, body: &str, err: &EvaluationError) -> Self {
        Self {
            src: NamedSource::new(fragment, body.to_string()),
            span: span_at(body, err.position),
            help: (err.ancestry.len() > 1).then(|| format!("while rendering {}", err.trace())),
            message: err.message.clone(),
            label: "this reference failed".to_string(),
        }
    }
}

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
pub struct ParseDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("here")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
}

impl ParseDiagnostic {
    pub fn from_error(fragment: &str, body: &str, err: &ParseError) -> Self {
        Self {
            src: NamedSource::new(fragment, body.to_string()),
            span: span_at(body, err.position),
            help: err.help.clone(),
            message: err.message.clone(),
        }
    }
}

/// Something reported while evaluating, kept for the end-of-build summary.
#[derive(Clone, Debug, PartialEq)]
pub enum Issue {
    Evaluation {
        fragment: String,
        body: String,
        error: EvaluationError,
    },
    Script {
        ancestry: Vec<String>,
        error: ScriptError,
    },
    Warning(PolicyWarning),
}

/// Collects reported problems. Every entry is also logged when recorded.
#[derive(Debug, Default)]
pub struct Diagnostics {
    issues: RefCell<Vec<Issue>>,
}

impl Diagnostics {
    pub fn evaluation_error(&self, fragment: &str, body: &str, err: EvaluationError) {
        error!(
            fragment,
            line = err.line(),
            column = err.column(),
            trace = %err.trace(),
            "{}",
            err.message
        );
        self.issues.borrow_mut().push(Issue::Evaluation {
            fragment: fragment.to_string(),
            body: body.to_string(),
            error: err,
        });
    }

    pub fn script_error(&self, ancestry: &[String], err: &ScriptError) {
        error!(trace = %ancestry.join(" > "), "script error: {err}");
        self.issues.borrow_mut().push(Issue::Script {
            ancestry: ancestry.to_vec(),
            error: err.clone(),
        });
    }

    pub fn warning(&self, warning: PolicyWarning) {
        warn!("{warning}");
        self.issues.borrow_mut().push(Issue::Warning(warning));
    }

    pub fn issues(&self) -> Vec<Issue> {
        self.issues.borrow().clone()
    }

    pub fn take(&self) -> Vec<Issue> {
        std::mem::take(&mut *self.issues.borrow_mut())
    }

    pub fn evaluation_errors(&self) -> Vec<EvaluationError> {
        self.issues
            .borrow()
            .iter()
            .filter_map(|issue| match issue {
                Issue::Evaluation { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<PolicyWarning> {
        self.issues
            .borrow()
            .iter()
            .filter_map(|issue| match issue {
                Issue::Warning(warning) => Some(warning.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .borrow()
            .iter()
            .filter(|issue| !matches!(issue, Issue::Warning(_)))
            .count()
    }
}

pub fn emit_issues(issues: &[Issue]) {
    for issue in issues {
        match issue {
            Issue::Evaluation {
                fragment,
                body,
                error,
            } => {
                let diagnostic = EvaluationDiagnostic::from_error(fragment, body, error);
                eprintln!("{:?}", Report::new(diagnostic));
            }
            Issue::Script { ancestry, error } => {
                eprintln!("Script error in {}: {}", ancestry.join(" > "), error);
            }
            Issue::Warning(warning) => eprintln!("Warning: {}", warning),
        }
    }
}

pub fn emit_fragment_error(err: &FragmentError) {
    match err {
        FragmentError::Parse { name, body, error } => {
            let diagnostic = ParseDiagnostic::from_error(name, body, error);
            eprintln!("{:?}", Report::new(diagnostic));
        }
        other => eprintln!("Error: {}", other),
    }
}

fn span_at(body: &str, position: Position) -> SourceSpan {
    let offset = position.offset_in(body);
    let len = body[offset..].chars().next().map_or(0, char::len_utf8);
    SourceSpan::from((offset, len))
}
