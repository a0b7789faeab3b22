use crate::eval::EvalError;
use crate::fetch::FetchError;
use thiserror::Error;

/// Stable error codes, one per [`Error`] variant.
pub mod codes {
    pub const DEPENDENCY_NOT_FOUND: &str = "DEPENDENCY_NOT_FOUND";
    pub const UNRESOLVED_DEPENDENCY: &str = "UNRESOLVED_DEPENDENCY";
    pub const PATH_RESOLUTION: &str = "PATH_RESOLUTION";
    pub const FETCH_FAILED: &str = "FETCH_FAILED";
    pub const MODULE_EVALUATION: &str = "MODULE_EVALUATION";
    pub const IMPORT_FAILED: &str = "IMPORT_FAILED";
    pub const ENGINE: &str = "ENGINE";
    pub const MANIFEST_NOT_FOUND: &str = "MANIFEST_NOT_FOUND";
    pub const MANIFEST_INVALID: &str = "MANIFEST_INVALID";
    pub const LOCKFILE_INVALID: &str = "LOCKFILE_INVALID";
    pub const IO: &str = "IO";
    pub const OTHER: &str = "OTHER";
}

/// Core error type for sandnode operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The lockfile has no entry reachable from `from` for `name`.
    #[error("{name} not accessible from {from}")]
    DependencyNotFound { name: String, from: String },

    /// A bare specifier names a package that is neither a dependency of the
    /// requesting package nor hoisted to the root.
    #[error("Cannot resolve '{specifier}' from package '{package}'")]
    UnresolvedDependency { specifier: String, package: String },

    #[error("Cannot load '{specifier}': {path} does not exist")]
    PathResolution { specifier: String, path: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The module body threw or failed to compile.
    #[error("Error evaluating {path}: {source}\n  import chain: {}", .chain.join(" -> "))]
    ModuleEvaluation {
        path: String,
        chain: Vec<String>,
        #[source]
        source: EvalError,
    },

    /// The evaluator itself failed, outside any one module body.
    #[error(transparent)]
    Evaluator(#[from] EvalError),

    /// Another import of the same module failed while this one waited on it.
    #[error("Import of {key} failed: {message}")]
    ImportFailed { key: String, message: String },

    #[error("package.json not found at {path}")]
    ManifestNotFound { path: String },

    #[error("Failed to parse package.json at {path}: {source}")]
    ManifestParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse lockfile at {path}: {source}")]
    LockfileParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Stable code for machine-readable output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DependencyNotFound { .. } => codes::DEPENDENCY_NOT_FOUND,
            Self::UnresolvedDependency { .. } => codes::UNRESOLVED_DEPENDENCY,
            Self::PathResolution { .. } => codes::PATH_RESOLUTION,
            Self::Fetch(_) => codes::FETCH_FAILED,
            Self::ModuleEvaluation { .. } => codes::MODULE_EVALUATION,
            Self::Evaluator(_) => codes::ENGINE,
            Self::ImportFailed { .. } => codes::IMPORT_FAILED,
            Self::ManifestNotFound { .. } => codes::MANIFEST_NOT_FOUND,
            Self::ManifestParse { .. } => codes::MANIFEST_INVALID,
            Self::LockfileParse { .. } => codes::LOCKFILE_INVALID,
            Self::Io(_) => codes::IO,
            Self::Other(_) => codes::OTHER,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_not_found_message() {
        let err = Error::DependencyNotFound {
            name: "b".into(),
            from: "a".into(),
        };
        assert_eq!(err.to_string(), "b not accessible from a");
        assert_eq!(err.code(), codes::DEPENDENCY_NOT_FOUND);
    }

    #[test]
    fn test_evaluation_error_includes_chain() {
        let err = Error::ModuleEvaluation {
            path: "/node_modules/a/index.js".into(),
            chain: vec!["a".into(), "./lib".into()],
            source: EvalError::Exception {
                message: "Uncaught Error: boom".into(),
                line: Some(4),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("Uncaught Error: boom (line 4)"));
        assert!(msg.contains("a -> ./lib"));

        let err = Error::from(EvalError::engine("thread stopped"));
        assert_eq!(err.code(), codes::ENGINE);
    }
}
