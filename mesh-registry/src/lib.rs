//! Tool registry interface and implementations.
//!
//! The orchestrator only ever reads a live snapshot through [`ToolRegistry`];
//! tool services write to it by registering and heartbeating, typically
//! through a [`LivenessReporter`] running beside the service.

#![warn(missing_docs, clippy::pedantic)]

pub mod liveness;
pub mod registry;
pub mod remote;

pub use liveness::{LivenessConfig, LivenessReporter};
pub use registry::{InMemoryToolRegistry, RegistryError, RegistryResult, ToolRegistry};
pub use remote::HttpToolRegistry;
