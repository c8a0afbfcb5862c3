//! Durable history journal writing newline-delimited JSON entries.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use mesh_primitives::{ChatTurn, SessionId};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::store::{ChatHistory, SessionRecord};
use crate::volatile::InMemoryHistory;
use crate::{HistoryError, HistoryResult};

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalEntry {
    Session(SessionRecord),
    Turn(ChatTurn),
}

/// File-backed history.
///
/// Every write is appended to the journal before it becomes visible to
/// readers; reads are served from an in-memory index rebuilt on open.
pub struct FileJournalHistory {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
    index: InMemoryHistory,
}

impl std::fmt::Debug for FileJournalHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileJournalHistory")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileJournalHistory {
    /// Opens (or creates) a journal at the provided path and replays it.
    ///
    /// A final line without its newline is a write cut short by a crash; it
    /// is dropped and the file truncated back to the last complete entry.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors and returns [`HistoryError::CorruptJournal`] when
    /// a complete line cannot be decoded.
    pub async fn open(path: impl Into<PathBuf>) -> HistoryResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let index = InMemoryHistory::new();
        let replayed = match fs::read(&path).await {
            Ok(data) => replay(&data, &index).await?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Replay::default(),
            Err(err) => return Err(err.into()),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        match replayed.tail {
            Tail::Clean => {}
            Tail::Unterminated => {
                file.write_all(b"\n").await?;
                file.flush().await?;
            }
            Tail::Torn { line, reason } => {
                warn!(
                    path = %path.display(),
                    line,
                    %reason,
                    "dropping torn journal tail"
                );
                file.set_len(replayed.valid_len).await?;
            }
        }

        info!(path = %path.display(), entries = replayed.entries, "history journal opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
            index,
        })
    }

    /// Returns the underlying path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry, cutting the file back if the write fails partway.
    async fn write_entry(file: &mut tokio::fs::File, entry: &JournalEntry) -> HistoryResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let committed = file.metadata().await?.len();
        if let Err(err) = append_line(file, &line).await {
            if let Err(rollback) = file.set_len(committed).await {
                warn!(error = %rollback, "failed to roll back partial journal write");
            }
            return Err(err.into());
        }
        Ok(())
    }
}

async fn append_line(file: &mut tokio::fs::File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await
}

#[derive(Debug, Default)]
enum Tail {
    #[default]
    Clean,
    Unterminated,
    Torn {
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Default)]
struct Replay {
    entries: usize,
    valid_len: u64,
    tail: Tail,
}

async fn replay(data: &[u8], index: &InMemoryHistory) -> HistoryResult<Replay> {
    let mut replayed = Replay::default();
    let mut offset = 0;
    let mut lines = data.split(|byte| *byte == b'\n').enumerate().peekable();

    while let Some((line, chunk)) = lines.next() {
        let start = offset;
        offset += chunk.len() + 1;
        let last = lines.peek().is_none();

        if chunk.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let entry: JournalEntry = match serde_json::from_slice(chunk) {
            Ok(entry) => entry,
            Err(err) if last => {
                replayed.valid_len = start as u64;
                replayed.tail = Tail::Torn {
                    line: line + 1,
                    reason: err.to_string(),
                };
                return Ok(replayed);
            }
            Err(err) => {
                return Err(HistoryError::CorruptJournal {
                    line: line + 1,
                    reason: err.to_string(),
                });
            }
        };
        match entry {
            JournalEntry::Session(record) => index.restore_session(record).await,
            JournalEntry::Turn(turn) => index.append_message(turn).await?,
        }
        replayed.entries += 1;
        if last {
            replayed.tail = Tail::Unterminated;
        }
    }
    Ok(replayed)
}

#[async_trait]
impl ChatHistory for FileJournalHistory {
    async fn ensure_session(&self, session_id: SessionId) -> HistoryResult<()> {
        let mut file = self.file.lock().await;
        let now = Utc::now();
        let record = match self.index.session(session_id).await {
            Some(mut record) => {
                record.touch(now);
                record
            }
            None => SessionRecord::new(session_id, now),
        };
        Self::write_entry(&mut file, &JournalEntry::Session(record)).await?;
        self.index.restore_session(record).await;
        Ok(())
    }

    async fn append_message(&self, turn: ChatTurn) -> HistoryResult<()> {
        let mut file = self.file.lock().await;
        Self::write_entry(&mut file, &JournalEntry::Turn(turn.clone())).await?;
        self.index.append_message(turn).await
    }

    async fn session_turns(&self, session_id: SessionId) -> HistoryResult<Vec<ChatTurn>> {
        self.index.session_turns(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_primitives::ChatRole;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("history-journal-{}.ndjson", Uuid::new_v4()));
        path
    }

    #[tokio::test]
    async fn history_survives_reopen() {
        let path = temp_path();
        let session = SessionId::random();

        {
            let journal = FileJournalHistory::open(&path).await.unwrap();
            journal.ensure_session(session).await.unwrap();
            journal
                .append_message(ChatTurn::new(session, ChatRole::User, "What is 2+2?"))
                .await
                .unwrap();
            journal
                .append_message(ChatTurn::new(session, ChatRole::Assistant, "4"))
                .await
                .unwrap();
        }

        let reopened = FileJournalHistory::open(&path).await.unwrap();
        let turns = reopened.session_turns(session).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content(), "What is 2+2?");
        assert_eq!(turns[1].role(), ChatRole::Assistant);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn corrupt_line_is_reported() {
        let path = temp_path();
        std::fs::write(&path, b"{\"kind\":\"turn\"}\n").unwrap();

        let err = FileJournalHistory::open(&path).await.expect_err("corrupt");
        assert!(matches!(err, HistoryError::CorruptJournal { line: 1, .. }));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn torn_tail_is_dropped_on_open() {
        let path = temp_path();
        let session = SessionId::random();

        {
            let journal = FileJournalHistory::open(&path).await.unwrap();
            journal.ensure_session(session).await.unwrap();
            journal
                .append_message(ChatTurn::new(session, ChatRole::User, "What is 2+2?"))
                .await
                .unwrap();
        }
        let mut data = std::fs::read(&path).unwrap();
        let intact = data.len();
        data.extend_from_slice(b"{\"kind\":\"turn\",\"session_id\":");
        std::fs::write(&path, &data).unwrap();

        {
            let journal = FileJournalHistory::open(&path).await.unwrap();
            assert_eq!(std::fs::metadata(&path).unwrap().len(), intact as u64);
            journal
                .append_message(ChatTurn::new(session, ChatRole::Assistant, "4"))
                .await
                .unwrap();
        }

        let reopened = FileJournalHistory::open(&path).await.unwrap();
        let turns = reopened.session_turns(session).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content(), "4");

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn unterminated_last_entry_is_kept() {
        let path = temp_path();
        let session = SessionId::random();

        {
            let journal = FileJournalHistory::open(&path).await.unwrap();
            journal
                .append_message(ChatTurn::new(session, ChatRole::User, "hello"))
                .await
                .unwrap();
        }
        let mut data = std::fs::read(&path).unwrap();
        assert_eq!(data.pop(), Some(b'\n'));
        std::fs::write(&path, &data).unwrap();

        {
            let journal = FileJournalHistory::open(&path).await.unwrap();
            journal
                .append_message(ChatTurn::new(session, ChatRole::Assistant, "hi"))
                .await
                .unwrap();
        }

        let reopened = FileJournalHistory::open(&path).await.unwrap();
        let turns = reopened.session_turns(session).await.unwrap();
        assert_eq!(turns.len(), 2);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn corrupt_middle_line_is_still_fatal() {
        let path = temp_path();
        let session = SessionId::random();
        {
            let journal = FileJournalHistory::open(&path).await.unwrap();
            journal.ensure_session(session).await.unwrap();
        }
        let mut data = b"{\"kind\":\"turn\",\"session_id\":\n".to_vec();
        data.extend(std::fs::read(&path).unwrap());
        std::fs::write(&path, &data).unwrap();

        let err = FileJournalHistory::open(&path).await.expect_err("corrupt");
        assert!(matches!(err, HistoryError::CorruptJournal { line: 1, .. }));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn failed_session_write_leaves_index_untouched() {
        let path = temp_path();
        std::fs::write(&path, b"").unwrap();
        let journal = FileJournalHistory {
            path: path.clone(),
            file: Mutex::new(tokio::fs::File::open(&path).await.unwrap()),
            index: InMemoryHistory::new(),
        };
        let session = SessionId::random();

        journal.ensure_session(session).await.expect_err("read-only file");
        assert!(journal.index.session(session).await.is_none());
        assert_eq!(journal.index.session_count().await, 0);

        let _ = std::fs::remove_file(path);
    }
}
