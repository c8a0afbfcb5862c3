//! History store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mesh_primitives::{ChatTurn, SessionId};
use serde::{Deserialize, Serialize};

use crate::HistoryResult;

/// Bookkeeping kept per session.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SessionRecord {
    session_id: SessionId,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

impl SessionRecord {
    /// Creates a record for a session first seen at `at`.
    #[must_use]
    pub const fn new(session_id: SessionId, at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            created_at: at,
            last_active: at,
        }
    }

    /// Marks the session as active at `at`.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_active {
            self.last_active = at;
        }
    }

    /// Returns the session identifier.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns when the session was first seen.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the session was last used.
    #[must_use]
    pub const fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }
}

/// Append-only store of chat sessions and their turns.
///
/// Implementations must accept concurrent calls for the same or different
/// sessions; turns of one session are returned in append order.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    /// Creates the session if absent, otherwise refreshes its activity time.
    async fn ensure_session(&self, session_id: SessionId) -> HistoryResult<()>;

    /// Appends one turn to its session.
    async fn append_message(&self, turn: ChatTurn) -> HistoryResult<()>;

    /// Returns every turn of a session, oldest first.
    async fn session_turns(&self, session_id: SessionId) -> HistoryResult<Vec<ChatTurn>>;
}
