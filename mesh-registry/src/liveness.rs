//! Self-registration and heartbeat maintenance for tool services.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mesh_primitives::ToolRegistration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep};
use tracing::{info, warn};

use crate::registry::{RegistryError, RegistryResult, ToolRegistry};

/// Configuration for registration and heartbeat maintenance.
#[derive(Debug, Clone, Copy)]
pub struct LivenessConfig {
    heartbeat_interval: Duration,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
    max_consecutive_failures: NonZeroUsize,
}

impl LivenessConfig {
    /// Creates a new configuration.
    #[must_use]
    pub fn new(
        heartbeat_interval: Duration,
        initial_retry_delay: Duration,
        max_retry_delay: Duration,
        max_consecutive_failures: NonZeroUsize,
    ) -> Self {
        Self {
            heartbeat_interval,
            initial_retry_delay,
            max_retry_delay,
            max_consecutive_failures,
        }
    }

    /// Returns the heartbeat interval.
    #[must_use]
    pub const fn heartbeat_interval(self) -> Duration {
        self.heartbeat_interval
    }

    /// Returns the initial retry delay.
    #[must_use]
    pub const fn initial_retry_delay(self) -> Duration {
        self.initial_retry_delay
    }

    /// Returns the maximum retry delay.
    #[must_use]
    pub const fn max_retry_delay(self) -> Duration {
        self.max_retry_delay
    }

    /// Returns the limit on consecutive heartbeat failures before re-registration.
    #[must_use]
    pub const fn max_consecutive_failures(self) -> NonZeroUsize {
        self.max_consecutive_failures
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when any duration is zero or the
    /// retry delay bounds are inconsistent.
    pub fn validate(self) -> RegistryResult<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(RegistryError::InvalidConfig(
                "heartbeat interval must be greater than zero",
            ));
        }
        if self.initial_retry_delay.is_zero() {
            return Err(RegistryError::InvalidConfig(
                "initial retry delay must be greater than zero",
            ));
        }
        if self.initial_retry_delay > self.max_retry_delay {
            return Err(RegistryError::InvalidConfig(
                "initial retry delay cannot exceed max retry delay",
            ));
        }
        Ok(())
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(10),
            max_consecutive_failures: NonZeroUsize::MIN.saturating_add(2),
        }
    }
}

/// Background task that keeps one tool registered and live.
///
/// Registration is retried with exponential backoff. Once registered, a
/// heartbeat is sent every interval; after too many consecutive heartbeat
/// failures the tool registers again, which also covers a registry that lost
/// its state.
pub struct LivenessReporter {
    registry: Arc<dyn ToolRegistry>,
    tool_name: String,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for LivenessReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessReporter")
            .field("registry", &"dyn ToolRegistry")
            .field("tool", &self.tool_name)
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .field("worker", &self.worker.is_some())
            .finish()
    }
}

impl LivenessReporter {
    /// Validates the configuration and spawns the maintenance task.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when the configuration is invalid.
    pub fn spawn(
        registry: Arc<dyn ToolRegistry>,
        registration: ToolRegistration,
        config: LivenessConfig,
    ) -> RegistryResult<Self> {
        config.validate()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let tool_name = registration.name().to_owned();
        let handle = tokio::spawn(run_registration_loop(
            Arc::clone(&registry),
            Arc::new(registration),
            Arc::clone(&shutdown),
            config,
        ));

        Ok(Self {
            registry,
            tool_name,
            shutdown,
            worker: Some(handle),
        })
    }

    /// Returns the name of the maintained tool.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Stops the maintenance task without touching the registry.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            handle.abort();
        }
    }

    /// Stops the maintenance task and deregisters the tool.
    ///
    /// # Errors
    ///
    /// Propagates the registry error when deregistration fails.
    pub async fn shutdown(mut self) -> RegistryResult<()> {
        self.stop();
        self.registry.deregister_tool(&self.tool_name).await?;
        info!(tool = %self.tool_name, "tool deregistered on shutdown");
        Ok(())
    }
}

impl Drop for LivenessReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_registration_loop(
    registry: Arc<dyn ToolRegistry>,
    registration: Arc<ToolRegistration>,
    shutdown: Arc<AtomicBool>,
    config: LivenessConfig,
) {
    let mut retry_delay = config.initial_retry_delay();

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match registry.register_tool(registration.as_ref().clone()).await {
            Ok(id) => {
                info!(tool = registration.name(), %id, "tool registered with orchestrator");
                retry_delay = config.initial_retry_delay();
                if !run_heartbeat_loop(
                    Arc::clone(&registry),
                    registration.name(),
                    Arc::clone(&shutdown),
                    config,
                )
                .await
                {
                    continue;
                }
                break;
            }
            Err(err) => {
                warn!(?err, tool = registration.name(), "tool registration failed; retrying");
                sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(config.max_retry_delay());
            }
        }
    }
}

async fn run_heartbeat_loop(
    registry: Arc<dyn ToolRegistry>,
    name: &str,
    shutdown: Arc<AtomicBool>,
    config: LivenessConfig,
) -> bool {
    let mut failures: usize = 0;
    let mut interval = tokio::time::interval(config.heartbeat_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and registration just refreshed liveness.
    interval.tick().await;

    while !shutdown.load(Ordering::Acquire) {
        interval.tick().await;
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match registry.record_heartbeat(name).await {
            Ok(()) => {
                failures = 0;
            }
            Err(err) => {
                failures += 1;
                warn!(?err, failures, tool = name, "heartbeat failure");
                if failures >= config.max_consecutive_failures().get() {
                    warn!(
                        failures,
                        tool = name,
                        "heartbeat failure threshold reached; attempting re-registration"
                    );
                    return false;
                }
            }
        }
    }

    true
}
