//! Service configuration.
//!
//! [`ServiceConfig`] is loaded with the `config` crate from an optional TOML
//! file overlaid with `TOOLMESH__`-prefixed environment variables, e.g.
//! `TOOLMESH__MATCHING__STRATEGY=semantic` or `TOOLMESH__SERVER__BIND=127.0.0.1:8080`.
//! Every section has defaults, so an empty source yields a working config.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use schema::{
    DispatchSection, EmbedderKind, HistorySection, MatchingSection, ModelSection,
    OrchestratorSection, RegistrySection, SelectionKind, ServerSection, ServiceConfig,
    StrategyKind, TelemetrySection,
};

/// Prefix of environment variables read by [`ServiceConfig::load`].
pub const ENV_PREFIX: &str = "TOOLMESH";
