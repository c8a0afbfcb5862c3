//! Shared error definitions for toolmesh primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the primitives crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided session identifier could not be parsed.
    #[error("invalid session id: {source}")]
    InvalidSessionId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Tool registration failed validation.
    #[error("invalid tool registration `{name}`: {reason}")]
    InvalidTool {
        /// Name supplied with the registration (may be empty).
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A role label did not match any known chat role.
    #[error("unknown chat role `{0}`")]
    UnknownRole(String),
}

impl Error {
    pub(crate) fn invalid_tool(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTool {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
