//! Registry trait and the in-process implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mesh_primitives::{DEFAULT_LIVENESS_WINDOW, Tool, ToolId, ToolRegistration, ToolStatus};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors surfaced by registry implementations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Configuration values were inconsistent.
    #[error("invalid registry configuration: {0}")]
    InvalidConfig(&'static str),

    /// Registration payload failed validation.
    #[error(transparent)]
    InvalidRegistration(#[from] mesh_primitives::Error),

    /// Heartbeat or deregistration targeted a tool that was never registered.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name of the missing tool.
        name: String,
    },

    /// Registry backend failure (network, storage).
    #[error("registry backend error: {reason}")]
    Backend {
        /// Human-readable context provided by the backend.
        reason: String,
    },
}

impl RegistryError {
    /// Convenience helper to construct backend errors.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

/// Store of tool descriptors shared by the orchestrator and tool services.
///
/// Implementations must tolerate concurrent, interleaved calls from many
/// in-flight requests.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Returns every tool that is active and within the liveness window.
    async fn list_active_tools(&self) -> RegistryResult<Vec<Tool>>;

    /// Inserts or updates a tool keyed by name, returning its stable id.
    async fn register_tool(&self, registration: ToolRegistration) -> RegistryResult<ToolId>;

    /// Refreshes the heartbeat of a registered tool.
    async fn record_heartbeat(&self, name: &str) -> RegistryResult<()>;

    /// Marks a tool inactive so it is no longer matched.
    async fn deregister_tool(&self, name: &str) -> RegistryResult<()>;
}

/// Registry kept in process memory.
#[derive(Debug)]
pub struct InMemoryToolRegistry {
    tools: RwLock<HashMap<String, Tool>>,
    liveness_window: Duration,
}

impl Default for InMemoryToolRegistry {
    fn default() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            liveness_window: DEFAULT_LIVENESS_WINDOW,
        }
    }
}

impl InMemoryToolRegistry {
    /// Creates an empty registry with the default five minute liveness window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with a custom liveness window.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] for a zero window.
    pub fn with_liveness_window(window: Duration) -> RegistryResult<Self> {
        if window.is_zero() {
            return Err(RegistryError::InvalidConfig(
                "liveness window must be greater than zero",
            ));
        }
        Ok(Self {
            tools: RwLock::new(HashMap::new()),
            liveness_window: window,
        })
    }

    /// Returns the configured liveness window.
    #[must_use]
    pub const fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Stores a tool snapshot as-is, replacing any tool with the same name.
    pub async fn insert_snapshot(&self, tool: Tool) {
        let mut tools = self.tools.write().await;
        tools.insert(tool.name().to_owned(), tool);
    }

    /// Returns every stored tool regardless of liveness, sorted by name.
    pub async fn all_tools(&self) -> Vec<Tool> {
        let tools = self.tools.read().await;
        let mut all: Vec<Tool> = tools.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }
}

#[async_trait]
impl ToolRegistry for InMemoryToolRegistry {
    async fn list_active_tools(&self) -> RegistryResult<Vec<Tool>> {
        let now = Utc::now();
        let tools = self.tools.read().await;
        let mut live: Vec<Tool> = tools
            .values()
            .filter(|tool| tool.is_live(now, self.liveness_window))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(live)
    }

    async fn register_tool(&self, registration: ToolRegistration) -> RegistryResult<ToolId> {
        let mut tools = self.tools.write().await;
        if let Some(existing) = tools.get_mut(registration.name()) {
            existing.apply(registration);
            existing.set_status(ToolStatus::Active);
            existing.touch(Utc::now());
            debug!(tool = existing.name(), id = %existing.id(), "tool registration updated");
            return Ok(existing.id());
        }

        let id = ToolId::random();
        let name = registration.name().to_owned();
        info!(tool = %name, %id, "tool registered");
        tools.insert(name, Tool::new(id, registration));
        Ok(id)
    }

    async fn record_heartbeat(&self, name: &str) -> RegistryResult<()> {
        let mut tools = self.tools.write().await;
        let tool = tools.get_mut(name).ok_or_else(|| RegistryError::UnknownTool {
            name: name.to_owned(),
        })?;
        tool.touch(Utc::now());
        Ok(())
    }

    async fn deregister_tool(&self, name: &str) -> RegistryResult<()> {
        let mut tools = self.tools.write().await;
        let tool = tools.get_mut(name).ok_or_else(|| RegistryError::UnknownTool {
            name: name.to_owned(),
        })?;
        tool.set_status(ToolStatus::Inactive);
        info!(tool = name, "tool deregistered");
        Ok(())
    }
}
