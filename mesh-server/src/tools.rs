use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use mesh_primitives::{Tool, ToolId, ToolRegistration};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ServerState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RegisterBody {
    name: Option<String>,
    description: Option<String>,
    endpoint_url: Option<String>,
    capabilities: Option<Vec<String>>,
}

impl RegisterBody {
    fn into_registration(self) -> Result<ToolRegistration, ApiError> {
        let (Some(name), Some(description), Some(endpoint_url), Some(capabilities)) =
            (self.name, self.description, self.endpoint_url, self.capabilities)
        else {
            return Err(ApiError::bad_request("Missing required fields"));
        };
        ToolRegistration::new(name, description, endpoint_url, capabilities)
            .map_err(|err| ApiError::bad_request(err.to_string()))
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterResponse {
    tool_id: ToolId,
    status: &'static str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NameBody {
    name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ToolListing {
    tools: Vec<Tool>,
}

#[tracing::instrument(skip_all)]
pub(crate) async fn register(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(body) = body?;
    let registration = body.into_registration()?;
    let name = registration.name().to_owned();
    let tool_id = state.registry().register_tool(registration).await?;
    info!(tool = %name, %tool_id, "tool registered");
    Ok(Json(RegisterResponse {
        tool_id,
        status: "registered",
    }))
}

pub(crate) async fn heartbeat(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<NameBody>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(body) = body?;
    state.registry().record_heartbeat(&body.name).await?;
    Ok(Json(StatusResponse { status: "ok" }))
}

#[tracing::instrument(skip_all)]
pub(crate) async fn deregister(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<NameBody>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(body) = body?;
    state.registry().deregister_tool(&body.name).await?;
    info!(tool = %body.name, "tool deregistered");
    Ok(Json(StatusResponse {
        status: "deregistered",
    }))
}

pub(crate) async fn list(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ToolListing>, ApiError> {
    let tools = state.registry().list_active_tools().await?;
    Ok(Json(ToolListing { tools }))
}
