//! Error types for history stores.

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by history stores.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Underlying I/O failure while reading or writing journal files.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// A journal line could not be replayed.
    #[error("corrupt journal entry at line {line}: {reason}")]
    CorruptJournal {
        /// One-based line number of the offending entry.
        line: usize,
        /// Parser message.
        reason: String,
    },
    /// Backend-specific failure.
    #[error("history backend error: {reason}")]
    Backend {
        /// Human-readable reason describing the failure.
        reason: String,
    },
}

impl HistoryError {
    /// Helper to construct backend errors from string-like values.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

/// Result type alias for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;
