//! Per-request state machine.

use mesh_primitives::SessionId;
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Stages a chat request passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Request accepted, nothing persisted yet.
    Received,
    /// The user turn is in history.
    UserRecorded,
    /// A final answer has been composed.
    Answered,
    /// The assistant turn is in history.
    AssistantRecorded,
    /// Reply handed back to the caller.
    Done,
    /// The attempt failed.
    Failed,
}

impl RequestState {
    /// Returns `true` for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Events that advance a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    /// User turn persisted.
    RecordUser,
    /// Answer composed.
    Answer,
    /// Assistant turn persisted.
    RecordAssistant,
    /// Reply returned.
    Complete,
    /// Attempt aborted by an error.
    Fail,
}

/// State tracker for one attempt of one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestLifecycle {
    session_id: SessionId,
    state: RequestState,
}

impl RequestLifecycle {
    /// Starts tracking a request for the given session.
    #[must_use]
    pub const fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: RequestState::Received,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// Applies an event, returning the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidTransition`] when the event is not
    /// allowed from the current state.
    pub fn transition(&mut self, event: RequestEvent) -> OrchestratorResult<RequestState> {
        let next = match (self.state, event) {
            (RequestState::Received, RequestEvent::RecordUser) => Some(RequestState::UserRecorded),
            (RequestState::UserRecorded, RequestEvent::Answer) => Some(RequestState::Answered),
            (RequestState::Answered, RequestEvent::RecordAssistant) => {
                Some(RequestState::AssistantRecorded)
            }
            (RequestState::AssistantRecorded, RequestEvent::Complete) => Some(RequestState::Done),
            (state, RequestEvent::Fail) if !state.is_terminal() => Some(RequestState::Failed),
            _ => None,
        };

        let Some(next_state) = next else {
            return Err(OrchestratorError::InvalidTransition {
                from: self.state,
                event,
            });
        };

        debug!(
            session_id = %self.session_id,
            ?self.state,
            ?next_state,
            ?event,
            "request transition"
        );
        self.state = next_state;
        Ok(next_state)
    }
}
