//! Crate-wide error type
//!
//! Mirrors the input/infeasibility/operational split described in the
//! design: infeasibility never surfaces here (it is a `FailStats`
//! histogram on the result type), only malformed input and internal
//! invariants reach `Error`.

use thiserror::Error;

/// Errors produced while loading or interpreting cluster data.
///
/// Input errors carry their own context so that nested parsing failures
/// ("while parsing instance X: key Y not found") reach the caller intact.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("{context}: {message}")]
    Parse { context: String, message: String },

    #[error("key '{key}' not found, object contains only {available:?}")]
    MissingKey { key: String, available: Vec<String> },

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("node index {0} does not resolve to a live node")]
    DanglingNode(usize),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a stable label for metrics/logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Parse { .. } => "parse",
            Error::MissingKey { .. } => "missing_key",
            Error::InvalidValue { .. } => "invalid_value",
            Error::DanglingNode(_) => "dangling_node",
            Error::Internal(_) => "internal",
        }
    }

    /// Wrap this error with additional context, preserving the original message.
    pub fn context(self, context: impl Into<String>) -> Error {
        Error::Parse {
            context: context.into(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse {
            context: "json".to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
