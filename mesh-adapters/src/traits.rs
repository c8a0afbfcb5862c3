//! Completion-service contract used by the response composer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failures of a completion or embedding backend.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Missing key, bad base URL or similar setup problem.
    #[error("adapter not configured: {reason}")]
    Configuration {
        /// What is wrong with the setup.
        reason: String,
    },

    /// The request could not be built or encoded.
    #[error("invalid completion request: {reason}")]
    InvalidRequest {
        /// Why the request was refused locally.
        reason: String,
    },

    /// Connect, deadline or protocol failure.
    #[error("adapter transport error: {reason}")]
    Transport {
        /// Underlying transport message.
        reason: String,
    },

    /// HTTP 429 from the backend.
    #[error("adapter rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Value of the `Retry-After` header, when present.
        retry_after: Option<Duration>,
    },

    /// Non-success status or an undecodable body.
    #[error("adapter response error: {reason}")]
    Response {
        /// Status line or decode error.
        reason: String,
    },
}

impl AdapterError {
    /// Builds an [`AdapterError::InvalidRequest`].
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Builds an [`AdapterError::Configuration`].
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Builds an [`AdapterError::Transport`].
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Builds an [`AdapterError::Response`].
    #[must_use]
    pub fn response(reason: impl Into<String>) -> Self {
        Self::Response {
            reason: reason.into(),
        }
    }
}

/// Identifies the backend behind an adapter, for logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterMetadata {
    provider: &'static str,
    model: String,
}

impl AdapterMetadata {
    /// Creates metadata.
    #[must_use]
    pub fn new(provider: &'static str, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Backend family, e.g. `openai`.
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }

    /// Model identifier sent with every call.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Author of a prompt message; serialises lowercase.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions and tool context.
    System,
    /// The end user.
    User,
    /// The model.
    Assistant,
}

/// One `{role, content}` entry of a completion conversation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PromptMessage {
    role: MessageRole,
    content: String,
}

impl PromptMessage {
    /// Creates a message with an explicit role.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// A [`MessageRole::System`] message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// A [`MessageRole::User`] message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// A [`MessageRole::Assistant`] message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Returns who authored the message.
    #[must_use]
    pub const fn role(&self) -> MessageRole {
        self.role
    }

    /// Returns the text.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Ordered conversation for one completion call.
///
/// Order is preserved on the wire; the fusion stage ends with a system
/// message, so system entries are not hoisted to the front.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CompletionRequest {
    messages: Vec<PromptMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl CompletionRequest {
    /// Wraps a non-empty conversation.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidRequest`] for an empty conversation.
    pub fn new(messages: Vec<PromptMessage>) -> AdapterResult<Self> {
        if messages.is_empty() {
            return Err(AdapterError::invalid_request(
                "completion request requires at least one message",
            ));
        }
        Ok(Self {
            messages,
            temperature: None,
        })
    }

    /// Overrides the adapter's sampling temperature for this call.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Returns the conversation.
    #[must_use]
    pub fn messages(&self) -> &[PromptMessage] {
        &self.messages
    }

    /// Returns the per-call temperature override.
    #[must_use]
    pub const fn temperature(&self) -> Option<f32> {
        self.temperature
    }
}

/// Text produced by one completion call.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Completion {
    content: String,
}

impl Completion {
    /// Wraps generated text.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Returns the text.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Consumes the completion, returning the text.
    #[must_use]
    pub fn into_content(self) -> String {
        self.content
    }
}

/// Request/response text completion backend.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Describes the backend.
    fn metadata(&self) -> &AdapterMetadata;

    /// Runs one completion; no streaming, no tool-call protocol.
    async fn complete(&self, request: CompletionRequest) -> AdapterResult<Completion>;
}
