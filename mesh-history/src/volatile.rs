//! In-process history store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use mesh_primitives::{ChatTurn, SessionId};
use tokio::sync::RwLock;

use crate::HistoryResult;
use crate::store::{ChatHistory, SessionRecord};

#[derive(Debug)]
struct SessionLog {
    record: SessionRecord,
    turns: Vec<ChatTurn>,
}

impl SessionLog {
    fn new(session_id: SessionId) -> Self {
        Self {
            record: SessionRecord::new(session_id, Utc::now()),
            turns: Vec::new(),
        }
    }
}

/// History kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    sessions: RwLock<HashMap<SessionId, SessionLog>>,
}

impl InMemoryHistory {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bookkeeping record of a session, if it exists.
    pub async fn session(&self, session_id: SessionId) -> Option<SessionRecord> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map(|log| log.record)
    }

    /// Returns the number of known sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub(crate) async fn restore_session(&self, record: SessionRecord) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(record.session_id())
            .and_modify(|log| log.record.touch(record.last_active()))
            .or_insert_with(|| SessionLog {
                record,
                turns: Vec::new(),
            });
    }
}

#[async_trait]
impl ChatHistory for InMemoryHistory {
    async fn ensure_session(&self, session_id: SessionId) -> HistoryResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id)
            .and_modify(|log| log.record.touch(Utc::now()))
            .or_insert_with(|| SessionLog::new(session_id));
        Ok(())
    }

    async fn append_message(&self, turn: ChatTurn) -> HistoryResult<()> {
        let mut sessions = self.sessions.write().await;
        let log = sessions
            .entry(turn.session_id())
            .or_insert_with(|| SessionLog::new(turn.session_id()));
        log.record.touch(turn.timestamp());
        log.turns.push(turn);
        Ok(())
    }

    async fn session_turns(&self, session_id: SessionId) -> HistoryResult<Vec<ChatTurn>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&session_id)
            .map(|log| log.turns.clone())
            .unwrap_or_default())
    }
}
