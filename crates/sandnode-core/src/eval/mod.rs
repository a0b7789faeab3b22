//! Module body evaluation.
//!
//! The import pipeline hands an [`Evaluator`] one [`ModuleJob`] per module:
//! the module's text plus the table of bindings its `require` may return.
//! The body runs in its own function scope and sees only `require`,
//! `module`, `exports` and the builtin stand-in table. Export values stay
//! inside the evaluator; [`Evaluator::exports`] returns a JSON snapshot.
//! [`JsEngine`] is the V8-backed evaluator.

mod engine;

pub use engine::JsEngine;

use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure while compiling or running a module body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The body threw, or failed to compile.
    #[error("{message}{}", line_suffix(.line))]
    Exception { message: String, line: Option<u32> },

    /// A `.json` module is not valid JSON.
    #[error("SyntaxError: {message} (line {line})")]
    Json { message: String, line: u32 },

    /// The engine could not start or stopped answering.
    #[error("JavaScript engine unavailable: {0}")]
    Engine(String),
}

fn line_suffix(line: &Option<u32>) -> String {
    line.map(|l| format!(" (line {l})")).unwrap_or_default()
}

impl EvalError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Source line, when known.
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::Exception { line, .. } => *line,
            Self::Json { line, .. } => Some(*line),
            Self::Engine(_) => None,
        }
    }
}

/// What `require(specifier)` returns inside a module body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Binding {
    /// Export record of the module with this registry key.
    Module(String),
    /// Builtin stand-in by name.
    Builtin(String),
    /// Disabled by a `browser` map entry: a fresh empty object.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleCode {
    CommonJs(String),
    /// Already validated JSON text.
    Json(String),
}

/// One module body to evaluate.
#[derive(Debug, Clone)]
pub struct ModuleJob {
    /// Registry key; the export record is stored under it.
    pub key: String,
    /// Absolute virtual path, used for `__filename` and stack traces.
    pub path: String,
    pub code: ModuleCode,
    /// Specifier (literal and resolved request) to binding.
    pub requires: BTreeMap<String, Binding>,
}

/// Runs module bodies and holds their export records.
///
/// Jobs for a key arrive after the jobs of every dependency that was not
/// part of an import cycle. A key that was never evaluated reads as an
/// empty export record.
pub trait Evaluator: Send + Sync {
    /// Evaluate `job`, storing the final export value under `job.key`.
    fn evaluate(&self, job: ModuleJob) -> BoxFuture<'static, Result<(), EvalError>>;

    /// JSON snapshot of the export value stored under `key`, or of the
    /// builtin stand-in for a `node:<name>` key. Functions render as
    /// `"[Function: name]"` and repeated objects as `"[Circular]"`.
    fn exports(&self, key: &str) -> BoxFuture<'static, Result<serde_json::Value, EvalError>>;

    /// Drop the export record stored under `key`.
    fn forget(&self, key: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EvalError::Exception {
            message: "Uncaught Error: nope".into(),
            line: Some(3),
        };
        assert_eq!(err.to_string(), "Uncaught Error: nope (line 3)");
        assert_eq!(err.line(), Some(3));

        let err = EvalError::Exception {
            message: "Uncaught SyntaxError: Unexpected token '}'".into(),
            line: None,
        };
        assert_eq!(err.to_string(), "Uncaught SyntaxError: Unexpected token '}'");
        assert_eq!(EvalError::engine("gone").line(), None);
    }

    #[test]
    fn test_binding_table_json() {
        let requires = BTreeMap::from([
            ("./a".to_string(), Binding::Module("app@1.0.0/a.js".into())),
            ("path".to_string(), Binding::Builtin("path".into())),
            ("fs".to_string(), Binding::Disabled),
        ]);
        let json = serde_json::to_value(&requires).unwrap();
        assert_eq!(json["./a"]["module"], "app@1.0.0/a.js");
        assert_eq!(json["path"]["builtin"], "path");
        assert_eq!(json["fs"], "disabled");
    }
}
