//! Chat history persistence.
//!
//! History is append-only: sessions are created on first use and every turn is
//! recorded in arrival order. [`InMemoryHistory`] keeps everything in process;
//! [`FileJournalHistory`] additionally writes newline-delimited JSON so that
//! history survives restarts.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod journal;
pub mod store;
pub mod volatile;

pub use error::{HistoryError, HistoryResult};
pub use journal::FileJournalHistory;
pub use store::{ChatHistory, SessionRecord};
pub use volatile::InMemoryHistory;
