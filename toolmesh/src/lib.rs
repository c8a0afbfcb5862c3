//! Capability-matching tool orchestrator facade.
//!
//! Depend on this crate via `cargo add toolmesh`. It bundles the workspace
//! crates behind feature flags so embedders can pull in only the registry or
//! history layers without the full pipeline.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use mesh_primitives as primitives;

/// Completion and embedding adapters (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use mesh_adapters as adapters;

/// Tool registry and liveness reporting (enabled by `registry` feature).
#[cfg(feature = "registry")]
pub use mesh_registry as registry;

/// Chat history stores (enabled by `history` feature).
#[cfg(feature = "history")]
pub use mesh_history as history;

/// Matching, dispatch and composition pipeline (enabled by `orchestrator` feature).
#[cfg(feature = "orchestrator")]
pub use mesh_orchestrator as orchestrator;

/// Service configuration (enabled by `config` feature).
#[cfg(feature = "config")]
pub use mesh_config as config;

/// Tracing initialisation (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use mesh_telemetry as telemetry;
