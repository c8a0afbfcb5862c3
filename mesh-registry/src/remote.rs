//! Registry client that talks to a remote orchestrator over HTTP.
//!
//! Tool services use this together with [`crate::LivenessReporter`] to
//! announce themselves to the orchestrator's `/api/tools/*` routes.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use hyper::{StatusCode, Uri};
use mesh_adapters::http_client::{
    HyperClient, RawResponse, build_https_client, get, post_json, sanitize_base_url,
};
use mesh_primitives::{Tool, ToolId, ToolRegistration};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::{RegistryError, RegistryResult, ToolRegistry};

const PROVIDER: &str = "registry";

/// [`ToolRegistry`] backed by the orchestrator's HTTP API.
pub struct HttpToolRegistry {
    client: HyperClient,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for HttpToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpToolRegistry")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpToolRegistry {
    /// Creates a client for the orchestrator at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] for a zero timeout and
    /// [`RegistryError::Backend`] when the base URL is malformed.
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> RegistryResult<Self> {
        if timeout.is_zero() {
            return Err(RegistryError::InvalidConfig(
                "registry timeout must be greater than zero",
            ));
        }
        let base_url = sanitize_base_url(base_url.as_ref(), PROVIDER)
            .map_err(|err| RegistryError::backend(err.to_string()))?;
        let client = build_https_client().map_err(|err| RegistryError::backend(err.to_string()))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Returns the normalised orchestrator base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> RegistryResult<Uri> {
        format!("{}{path}", self.base_url)
            .parse::<Uri>()
            .map_err(|err| RegistryError::backend(format!("invalid registry endpoint: {err}")))
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, payload: &T) -> RegistryResult<RawResponse> {
        let endpoint = self.endpoint(path)?;
        let body = serde_json::to_vec(payload)
            .map_err(|err| RegistryError::backend(format!("failed to encode request: {err}")))?;
        post_json(&self.client, &endpoint, None, body, self.timeout, PROVIDER)
            .await
            .map_err(|err| RegistryError::backend(err.to_string()))
    }

    async fn post_named(&self, path: &str, name: &str) -> RegistryResult<()> {
        let raw = self.post(path, &NamePayload { name }).await?;
        match raw.status {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(RegistryError::UnknownTool {
                name: name.to_owned(),
            }),
            status => Err(unexpected_status(status, &raw)),
        }
    }
}

#[async_trait]
impl ToolRegistry for HttpToolRegistry {
    async fn list_active_tools(&self) -> RegistryResult<Vec<Tool>> {
        let endpoint = self.endpoint("api/tools")?;
        let raw = get(&self.client, &endpoint, self.timeout, PROVIDER)
            .await
            .map_err(|err| RegistryError::backend(err.to_string()))?;
        if !raw.status.is_success() {
            return Err(unexpected_status(raw.status, &raw));
        }
        let listing: ToolListing = serde_json::from_slice(&raw.body)
            .map_err(|err| RegistryError::backend(format!("malformed tool listing: {err}")))?;
        Ok(listing.tools)
    }

    async fn register_tool(&self, registration: ToolRegistration) -> RegistryResult<ToolId> {
        let raw = self.post("api/tools/register", &registration).await?;
        if !raw.status.is_success() {
            return Err(unexpected_status(raw.status, &raw));
        }
        let ack: RegistrationAck = serde_json::from_slice(&raw.body)
            .map_err(|err| RegistryError::backend(format!("malformed registration reply: {err}")))?;
        debug!(tool = registration.name(), id = %ack.tool_id, "registration acknowledged");
        Ok(ack.tool_id)
    }

    async fn record_heartbeat(&self, name: &str) -> RegistryResult<()> {
        self.post_named("api/tools/heartbeat", name).await
    }

    async fn deregister_tool(&self, name: &str) -> RegistryResult<()> {
        self.post_named("api/tools/deregister", name).await
    }
}

#[derive(Serialize)]
struct NamePayload<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct RegistrationAck {
    tool_id: ToolId,
}

#[derive(Deserialize)]
struct ToolListing {
    #[serde(default)]
    tools: Vec<Tool>,
}

fn unexpected_status(status: StatusCode, raw: &RawResponse) -> RegistryError {
    RegistryError::backend(format!(
        "orchestrator returned {status}: {}",
        String::from_utf8_lossy(&raw.body)
    ))
}
