use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use mesh_orchestrator::{ChatReply, ChatRequest};
use mesh_primitives::SessionId;
use serde::Deserialize;

use crate::ServerState;
use crate::error::ApiError;

/// Wire shape of `POST /api/chat`; fields are optional so a missing message
/// gets the dedicated 400 instead of a generic decode error.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

impl ChatBody {
    fn into_request(self) -> Result<ChatRequest, ApiError> {
        let message = self
            .message
            .filter(|message| !message.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("Message is required"))?;

        let mut request = ChatRequest::new(message);
        if let Some(raw) = self.session_id.filter(|raw| !raw.trim().is_empty()) {
            let session_id = raw
                .parse::<SessionId>()
                .map_err(|err| ApiError::bad_request(err.to_string()))?;
            request = request.with_session(session_id);
        }
        Ok(request)
    }
}

#[tracing::instrument(skip_all)]
pub(crate) async fn chat(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(body) = body?;
    let request = body.into_request()?;
    let reply = state.orchestrator().handle(request).await?;
    Ok(Json(reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn missing_message_is_rejected() {
        let err = ChatBody::default().into_request().expect_err("message required");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Message is required");
    }

    #[test]
    fn blank_session_starts_a_new_one() {
        let body: ChatBody =
            serde_json::from_str(r#"{"message": "hello", "session_id": "  "}"#).unwrap();
        let request = body.into_request().unwrap();
        assert_eq!(request.message(), "hello");
        assert!(request.session_id().is_none());
    }

    #[test]
    fn malformed_session_is_rejected() {
        let body: ChatBody =
            serde_json::from_str(r#"{"message": "hello", "session_id": "abc"}"#).unwrap();
        let err = body.into_request().expect_err("not a uuid");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().starts_with("invalid session id"));
    }
}
