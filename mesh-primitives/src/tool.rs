//! Tool descriptors advertised by independently running tool services.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ToolId;

const MAX_NAME_LEN: usize = 96;
const MAX_CAPABILITY_LEN: usize = 128;

/// Heartbeat staleness bound after which a tool stops being eligible for matching.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Registry-side status of a tool.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Tool accepts invocations.
    #[default]
    Active,
    /// Tool was withdrawn and must not be matched.
    Inactive,
}

/// Registration payload a tool service submits to the registry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ToolRegistration {
    name: String,
    description: String,
    endpoint_url: String,
    capabilities: Vec<String>,
}

impl ToolRegistration {
    /// Validates and creates a registration.
    ///
    /// Capabilities keep their declared order; blank entries are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTool`] when the name is empty or too long, the
    /// endpoint is not an `http(s)` URL, or a capability exceeds the length limit.
    pub fn new<I, S>(
        name: impl Into<String>,
        description: impl Into<String>,
        endpoint_url: impl Into<String>,
        capabilities: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into().trim().to_owned();
        if name.is_empty() {
            return Err(Error::invalid_tool(name, "name cannot be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::invalid_tool(
                name,
                format!("name length must be <= {MAX_NAME_LEN}"),
            ));
        }

        let endpoint_url = endpoint_url.into().trim().to_owned();
        if !(endpoint_url.starts_with("http://") || endpoint_url.starts_with("https://")) {
            return Err(Error::invalid_tool(
                name,
                "endpoint URL must start with http:// or https://",
            ));
        }

        let mut collected = Vec::new();
        for capability in capabilities {
            let capability = capability.into();
            if capability.trim().is_empty() {
                continue;
            }
            if capability.len() > MAX_CAPABILITY_LEN {
                return Err(Error::invalid_tool(
                    name,
                    format!("capability length must be <= {MAX_CAPABILITY_LEN}"),
                ));
            }
            collected.push(capability);
        }

        Ok(Self {
            name,
            description: description.into(),
            endpoint_url,
            capabilities: collected,
        })
    }

    /// Returns the unique tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the invocation endpoint.
    #[must_use]
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Returns the declared capability labels in order.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }
}

/// Snapshot of a registered tool as seen by the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    id: ToolId,
    name: String,
    description: String,
    endpoint_url: String,
    capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    status: ToolStatus,
}

impl Tool {
    /// Creates an active, never-heartbeated tool from a validated registration.
    #[must_use]
    pub fn new(id: ToolId, registration: ToolRegistration) -> Self {
        let ToolRegistration {
            name,
            description,
            endpoint_url,
            capabilities,
        } = registration;
        Self {
            id,
            name,
            description,
            endpoint_url,
            capabilities,
            last_heartbeat: None,
            status: ToolStatus::Active,
        }
    }

    /// Sets the last heartbeat timestamp.
    #[must_use]
    pub fn with_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.last_heartbeat = Some(at);
        self
    }

    /// Sets the registry status.
    #[must_use]
    pub fn with_status(mut self, status: ToolStatus) -> Self {
        self.status = status;
        self
    }

    /// Replaces description, endpoint and capabilities, keeping id and name.
    pub fn apply(&mut self, registration: ToolRegistration) {
        self.description = registration.description;
        self.endpoint_url = registration.endpoint_url;
        self.capabilities = registration.capabilities;
    }

    /// Records a heartbeat at the supplied instant.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat = Some(at);
    }

    /// Sets the status in place.
    pub fn set_status(&mut self, status: ToolStatus) {
        self.status = status;
    }

    /// Returns the registry identifier.
    #[must_use]
    pub const fn id(&self) -> ToolId {
        self.id
    }

    /// Returns the unique tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the invocation endpoint.
    #[must_use]
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Returns the capability labels in declared order.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Returns the last heartbeat, if the tool ever sent one.
    #[must_use]
    pub const fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat
    }

    /// Returns the registry status.
    #[must_use]
    pub const fn status(&self) -> ToolStatus {
        self.status
    }

    /// Returns whether the tool may be matched at `now`.
    ///
    /// A tool that never sent a heartbeat counts as live so that freshly
    /// registered services are not starved before their first beat.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if self.status != ToolStatus::Active {
            return false;
        }
        let Some(last) = self.last_heartbeat else {
            return true;
        };
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(last) < window
    }
}
