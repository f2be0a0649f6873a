//! Error types for scholarflow.
//!
//! Library crates use [`ScholarflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all scholarflow operations.
#[derive(Debug, thiserror::Error)]
pub enum ScholarflowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a capability or fetching a source.
    #[error("network error: {0}")]
    Network(String),

    /// Structured payload or response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The capability or function behind a step raised.
    #[error("step '{step}' failed: {message}")]
    Invocation { step: String, message: String },

    /// A required structured input was absent or unparsable.
    #[error("step '{step}' received malformed input: {message}")]
    MalformedInput { step: String, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (workflow construction, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Unexpected internal fault (runtime construction, task panic).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScholarflowError>;

impl ScholarflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an invocation error for the named step.
    pub fn invocation(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Invocation {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed-input error for the named step.
    pub fn malformed_input(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedInput {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error from any displayable message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
