//! Error taxonomy of the chat pipeline.

use std::time::Duration;

use mesh_adapters::traits::AdapterError;
use mesh_history::HistoryError;
use mesh_registry::RegistryError;
use thiserror::Error;

use crate::state::{RequestEvent, RequestState};

/// Result alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Coarse classification used by the retry policy and the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller sent an unusable request.
    Validation,
    /// The scoring backend failed; absorbed as "no tool selected".
    Matching,
    /// A tool call failed; absorbed by dropping that tool's result.
    Dispatch,
    /// The language-model call failed.
    Completion,
    /// A registry or history operation failed.
    Persistence,
    /// The whole-request deadline elapsed.
    Timeout,
    /// Anything else.
    Internal,
}

/// Errors produced while serving a chat request.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Request payload failed validation.
    #[error("invalid request: {reason}")]
    Validation {
        /// What was wrong with the request.
        reason: String,
    },

    /// Candidate scoring failed.
    #[error("capability matching failed: {reason}")]
    Matching {
        /// Backend message.
        reason: String,
    },

    /// A single tool invocation failed.
    #[error("tool `{tool}` dispatch failed: {reason}")]
    Dispatch {
        /// Name of the failing tool.
        tool: String,
        /// Transport or status detail.
        reason: String,
    },

    /// Completion service failure.
    #[error("completion failed: {source}")]
    Completion {
        /// Adapter error.
        #[from]
        source: AdapterError,
    },

    /// Registry failure.
    #[error("registry failure: {source}")]
    Registry {
        /// Registry error.
        #[from]
        source: RegistryError,
    },

    /// History store failure.
    #[error("history failure: {source}")]
    History {
        /// History error.
        #[from]
        source: HistoryError,
    },

    /// Whole-request deadline elapsed.
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        /// Configured deadline.
        elapsed: Duration,
    },

    /// The request state machine rejected an event.
    #[error("invalid request transition from {from:?} via {event:?}")]
    InvalidTransition {
        /// State prior to the attempted transition.
        from: RequestState,
        /// Event that was rejected.
        event: RequestEvent,
    },

    /// Orchestrator components were configured inconsistently.
    #[error("invalid orchestrator configuration: {0}")]
    InvalidConfig(&'static str),
}

impl OrchestratorError {
    /// Convenience constructor for validation failures.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for matching failures.
    #[must_use]
    pub fn matching(reason: impl Into<String>) -> Self {
        Self::Matching {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for dispatch failures.
    #[must_use]
    pub fn dispatch(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dispatch {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Matching { .. } => ErrorKind::Matching,
            Self::Dispatch { .. } => ErrorKind::Dispatch,
            Self::Completion { .. } => ErrorKind::Completion,
            Self::Registry { .. } | Self::History { .. } => ErrorKind::Persistence,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidTransition { .. } | Self::InvalidConfig(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_source_error() {
        let err: OrchestratorError = AdapterError::transport("reset").into();
        assert_eq!(err.kind(), ErrorKind::Completion);

        let err: OrchestratorError = RegistryError::backend("down").into();
        assert_eq!(err.kind(), ErrorKind::Persistence);

        let err: OrchestratorError = HistoryError::backend("disk full").into();
        assert_eq!(err.kind(), ErrorKind::Persistence);

        assert_eq!(
            OrchestratorError::validation("Message is required").kind(),
            ErrorKind::Validation
        );
    }
}
