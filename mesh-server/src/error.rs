use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mesh_orchestrator::{ErrorKind, OrchestratorError};
use mesh_registry::RegistryError;
use serde::Serialize;
use tracing::error;

/// Error returned by every route, serialised as `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize)]
struct ApiErrorBody {
    error: String,
}

impl ApiError {
    /// Creates an error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                error: message.into(),
            },
        }
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Returns the response status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the message placed in the body.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.body.error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation { reason } => Self::bad_request(reason),
            err if err.kind() == ErrorKind::Timeout => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, err.to_string())
            }
            err => {
                error!(kind = ?err.kind(), %err, "chat request failed");
                Self::internal(err.to_string())
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidRegistration(source) => Self::bad_request(source.to_string()),
            RegistryError::UnknownTool { .. } => Self::not_found(err.to_string()),
            err => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn validation_keeps_the_bare_reason() {
        let err = ApiError::from(OrchestratorError::validation("Message is required"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Message is required");
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = ApiError::from(OrchestratorError::Timeout {
            elapsed: Duration::from_secs(45),
        });
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn unknown_tool_maps_to_not_found() {
        let err = ApiError::from(RegistryError::UnknownTool {
            name: "Calculator".into(),
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(err.message().contains("Calculator"));
    }

    #[test]
    fn backend_failures_are_internal() {
        let err = ApiError::from(RegistryError::backend("disk full"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
