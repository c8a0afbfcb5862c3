//! Append-only chat history records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, SessionId};

/// Author of a persisted chat turn.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Message supplied by the caller.
    User,
    /// Final answer produced by the orchestrator.
    Assistant,
}

impl ChatRole {
    /// Returns the lowercase wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(Error::UnknownRole(other.to_owned())),
        }
    }
}

/// One persisted message of a session.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatTurn {
    session_id: SessionId,
    role: ChatRole,
    content: String,
    timestamp: DateTime<Utc>,
}

impl ChatTurn {
    /// Creates a turn stamped with the current time.
    #[must_use]
    pub fn new(session_id: SessionId, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            session_id,
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns the owning session.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns the author role.
    #[must_use]
    pub const fn role(&self) -> ChatRole {
        self.role
    }

    /// Returns the message body.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns when the turn was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
