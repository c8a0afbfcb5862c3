//! Core shared types for the toolmesh orchestrator.

#![warn(missing_docs, clippy::pedantic)]

mod chat;
mod error;
mod ids;
mod tool;

/// Chat history records exchanged with the history store.
pub use chat::{ChatRole, ChatTurn};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifiers for sessions and registered tools.
pub use ids::{SessionId, ToolId};
/// Tool descriptors advertised through the registry.
pub use tool::{DEFAULT_LIVENESS_WINDOW, Tool, ToolRegistration, ToolStatus};
