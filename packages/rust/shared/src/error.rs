//! Error types for qaforge.
//!
//! Library crates use [`QaForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all qaforge operations.
#[derive(Debug, thiserror::Error)]
pub enum QaForgeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Corpus enumeration or decoding error.
    #[error("corpus error: {0}")]
    Corpus(String),

    /// External session error (submit, poll, or reset failure).
    #[error("session error: {0}")]
    Session(String),

    /// Response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Checkpoint or result-table persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid pattern, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, QaForgeError>;

impl QaForgeError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = QaForgeError::config("missing session profile");
        assert_eq!(err.to_string(), "config error: missing session profile");

        let err = QaForgeError::validation("empty keyword pattern set");
        assert!(err.to_string().contains("empty keyword pattern"));
    }
}
