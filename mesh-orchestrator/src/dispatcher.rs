//! Tool invocation over HTTP with per-call deadlines and failure isolation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use hyper::{StatusCode, Uri};
use mesh_adapters::http_client::{HyperClient, build_https_client, post_json};
use mesh_primitives::Tool;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Per-call deadline for tool endpoints.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Structured output of one successful tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationResult {
    tool_name: String,
    payload: Value,
}

impl ToolInvocationResult {
    /// Creates a result.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, payload: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            payload,
        }
    }

    /// Returns the name of the tool that produced the payload.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Returns the JSON payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }
}

/// Performs a single tool call.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invokes `tool` with the user message.
    async fn invoke(&self, tool: &Tool, message: &str) -> OrchestratorResult<ToolInvocationResult>;
}

#[derive(Serialize)]
struct ToolQuery<'a> {
    query: &'a str,
}

/// Invoker that POSTs `{"query": message}` to the tool endpoint.
///
/// Only a `200 OK` with a JSON body counts as success.
pub struct HttpToolInvoker {
    client: HyperClient,
    timeout: Duration,
}

impl fmt::Debug for HttpToolInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpToolInvoker")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpToolInvoker {
    /// Creates an invoker with the default five second deadline.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] when the HTTP client cannot be built.
    pub fn new() -> OrchestratorResult<Self> {
        Self::with_timeout(DEFAULT_DISPATCH_TIMEOUT)
    }

    /// Creates an invoker with a custom deadline.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] for a zero timeout or when
    /// the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> OrchestratorResult<Self> {
        if timeout.is_zero() {
            return Err(OrchestratorError::InvalidConfig(
                "dispatch timeout must be greater than zero",
            ));
        }
        let client = build_https_client()
            .map_err(|_| OrchestratorError::InvalidConfig("failed to build tool HTTP client"))?;
        Ok(Self { client, timeout })
    }

    /// Returns the per-call deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(&self, tool: &Tool, message: &str) -> OrchestratorResult<ToolInvocationResult> {
        let endpoint = tool
            .endpoint_url()
            .parse::<Uri>()
            .map_err(|err| OrchestratorError::dispatch(tool.name(), format!("bad endpoint: {err}")))?;
        let body = serde_json::to_vec(&ToolQuery { query: message })
            .map_err(|err| OrchestratorError::dispatch(tool.name(), err.to_string()))?;

        let raw = post_json(&self.client, &endpoint, None, body, self.timeout, tool.name())
            .await
            .map_err(|err| OrchestratorError::dispatch(tool.name(), err.to_string()))?;

        if raw.status != StatusCode::OK {
            return Err(OrchestratorError::dispatch(
                tool.name(),
                format!("endpoint returned {}", raw.status),
            ));
        }

        let payload: Value = serde_json::from_slice(&raw.body).map_err(|err| {
            OrchestratorError::dispatch(tool.name(), format!("response is not JSON: {err}"))
        })?;
        Ok(ToolInvocationResult::new(tool.name(), payload))
    }
}

/// Fans a message out to the selected tools concurrently.
#[derive(Clone)]
pub struct ToolDispatcher {
    invoker: Arc<dyn ToolInvoker>,
}

impl fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("invoker", &"dyn ToolInvoker")
            .finish()
    }
}

impl ToolDispatcher {
    /// Creates a dispatcher around an invoker.
    #[must_use]
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }

    /// Invokes every tool and returns the successful results in tool order.
    ///
    /// Calls run concurrently; a failing tool is logged and omitted.
    pub async fn dispatch(&self, tools: &[Tool], message: &str) -> Vec<ToolInvocationResult> {
        if tools.is_empty() {
            return Vec::new();
        }

        let calls = tools.iter().map(|tool| self.invoker.invoke(tool, message));
        let outcomes = join_all(calls).await;

        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(result) => {
                    debug!(tool = result.tool_name(), "tool call succeeded");
                    results.push(result);
                }
                Err(err) => warn!(?err, "tool call failed; dropping result"),
            }
        }
        results
    }
}
