use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::ServerState;

/// Probes the registry read path.
///
/// `database` mirrors `registry` for checkers written against the older key.
pub(crate) async fn health(State(state): State<Arc<ServerState>>) -> Response {
    let timestamp = Utc::now().to_rfc3339();
    match state.registry().list_active_tools().await {
        Ok(_) => Json(json!({
            "status": "healthy",
            "registry": "connected",
            "database": "connected",
            "timestamp": timestamp,
        }))
        .into_response(),
        Err(err) => {
            warn!(%err, "health probe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "unhealthy",
                    "error": err.to_string(),
                    "timestamp": timestamp,
                })),
            )
                .into_response()
        }
    }
}
