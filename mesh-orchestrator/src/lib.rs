//! Capability-matching and dispatch orchestrator.
//!
//! A [`ChatOrchestrator`] answers one message at a time: it records the user
//! turn, reads the live tool snapshot from a [`mesh_registry::ToolRegistry`],
//! and hands off to a [`ResponseComposer`]. The composer asks the model for a
//! direct answer while the [`CapabilityMatcher`] and [`ToolDispatcher`] decide
//! on and call relevant tools; tool output, when there is any, is fused into
//! the final answer by a second completion.

#![warn(missing_docs, clippy::pedantic)]

pub mod classifier;
pub mod composer;
pub mod dispatcher;
mod error;
pub mod matcher;
pub mod orchestrator;
pub mod state;

pub use classifier::SharedClassifier;
pub use composer::{Composition, ResponseComposer};
pub use dispatcher::{HttpToolInvoker, ToolDispatcher, ToolInvocationResult, ToolInvoker};
pub use error::{ErrorKind, OrchestratorError, OrchestratorResult};
pub use matcher::{
    CandidateLabel, CapabilityMatcher, LabelScorer, MatchResult, MatchStrategy, SemanticScorer,
    Selection, SubstringScorer,
};
pub use orchestrator::{ChatOrchestrator, ChatReply, ChatRequest, RetryPolicy};
pub use state::{RequestEvent, RequestLifecycle, RequestState};
