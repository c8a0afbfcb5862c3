//! Strongly typed configuration schema.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::debug;

use crate::{ConfigError, ConfigResult, ENV_PREFIX};

const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Complete orchestrator service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener settings.
    pub server: ServerSection,
    /// Completion model settings.
    pub model: ModelSection,
    /// Capability matching settings.
    pub matching: MatchingSection,
    /// Tool dispatch settings.
    pub dispatch: DispatchSection,
    /// Retry and deadline settings.
    pub orchestrator: OrchestratorSection,
    /// Tool registry settings.
    pub registry: RegistrySection,
    /// Chat history settings.
    pub history: HistorySection,
    /// Logging settings.
    pub telemetry: TelemetrySection,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Socket address the API binds to.
    pub bind: SocketAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

/// Completion model settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Base URL of an OpenAI-compatible API; the public API when absent.
    pub base_url: Option<String>,
    /// Model identifier.
    pub name: String,
    /// API key; falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling temperature forwarded with every completion.
    pub temperature: Option<f32>,
}

fn default_model_name() -> String {
    "gpt-4".to_owned()
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            base_url: None,
            name: default_model_name(),
            api_key: None,
            timeout_secs: 60,
            temperature: None,
        }
    }
}

impl ModelSection {
    /// Returns the configured key or the value of `OPENAI_API_KEY`.
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| env::var(OPENAI_API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Scoring strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Capability substring test.
    #[default]
    Substring,
    /// Embedding classifier.
    Semantic,
}

/// Selection cardinality selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    /// Every tool with a label above the threshold.
    AllMatches,
    /// Only the top label's tool, when above the threshold.
    BestMatchAboveThreshold,
}

/// Embedding backend selector for the semantic strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Offline feature-hashing embedder.
    #[default]
    Hashing,
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Remote,
}

/// Capability matching settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingSection {
    /// Scoring strategy.
    pub strategy: StrategyKind,
    /// Selection cardinality; derived from the strategy when absent.
    pub selection: Option<SelectionKind>,
    /// Score a label must strictly exceed to be selected.
    pub threshold: f32,
    /// Softmax temperature of the semantic classifier.
    pub temperature: f32,
    /// Embedding backend of the semantic classifier.
    pub embedder: EmbedderKind,
    /// Remote embedding model identifier.
    pub embedding_model: String,
    /// Base URL of the remote embedding API; the model base URL when absent.
    pub embedding_base_url: Option<String>,
}

impl Default for MatchingSection {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Substring,
            selection: None,
            threshold: 0.3,
            temperature: 0.1,
            embedder: EmbedderKind::Hashing,
            embedding_model: "text-embedding-3-small".to_owned(),
            embedding_base_url: None,
        }
    }
}

impl MatchingSection {
    /// Returns the explicit selection or the strategy's natural one.
    #[must_use]
    pub fn effective_selection(&self) -> SelectionKind {
        self.selection.unwrap_or(match self.strategy {
            StrategyKind::Substring => SelectionKind::AllMatches,
            StrategyKind::Semantic => SelectionKind::BestMatchAboveThreshold,
        })
    }
}

/// Tool dispatch settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// Per-tool call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl DispatchSection {
    /// Returns the per-tool call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry and deadline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Whole-request deadline in seconds.
    pub request_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            request_timeout_secs: 45,
        }
    }
}

impl OrchestratorSection {
    /// Returns the whole-request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Tool registry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Seconds after the last heartbeat during which a tool stays live.
    pub liveness_window_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            liveness_window_secs: 300,
        }
    }
}

impl RegistrySection {
    /// Returns the liveness window.
    #[must_use]
    pub const fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }
}

/// Chat history settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    /// NDJSON journal file; history stays in memory when absent.
    pub journal_path: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            json: false,
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from an optional TOML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a source cannot be read or decoded
    /// and [`ConfigError::Invalid`] when validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        Self::from_builder(builder)
    }

    /// Parses configuration from TOML text without consulting the environment.
    ///
    /// # Errors
    ///
    /// Same as [`ServiceConfig::load`].
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        Self::from_builder(config::Config::builder().add_source(File::from_str(text, FileFormat::Toml)))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> ConfigResult<Self> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::invalid("model.name", "must not be empty"));
        }
        if self.model.timeout_secs == 0 {
            return Err(ConfigError::invalid("model.timeout_secs", "must be greater than zero"));
        }
        if !(0.0..1.0).contains(&self.matching.threshold) {
            return Err(ConfigError::invalid(
                "matching.threshold",
                format!("{} is outside [0, 1)", self.matching.threshold),
            ));
        }
        if !self.matching.temperature.is_finite() || self.matching.temperature <= 0.0 {
            return Err(ConfigError::invalid("matching.temperature", "must be positive"));
        }
        if self.dispatch.timeout_secs == 0 {
            return Err(ConfigError::invalid("dispatch.timeout_secs", "must be greater than zero"));
        }
        if self.orchestrator.max_attempts == 0 {
            return Err(ConfigError::invalid("orchestrator.max_attempts", "must be at least 1"));
        }
        if self.orchestrator.request_timeout_secs <= self.dispatch.timeout_secs {
            return Err(ConfigError::invalid(
                "orchestrator.request_timeout_secs",
                "must exceed dispatch.timeout_secs",
            ));
        }
        if self.registry.liveness_window_secs == 0 {
            return Err(ConfigError::invalid(
                "registry.liveness_window_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}
