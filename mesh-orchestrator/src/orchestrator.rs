//! Per-request chat pipeline.

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use mesh_history::ChatHistory;
use mesh_primitives::{ChatRole, ChatTurn, SessionId};
use mesh_registry::ToolRegistry;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::composer::ResponseComposer;
use crate::error::{ErrorKind, OrchestratorError, OrchestratorResult};
use crate::state::{RequestEvent, RequestLifecycle};

/// Default whole-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Inbound chat message.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatRequest {
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
}

impl ChatRequest {
    /// Creates a request for a new session.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
        }
    }

    /// Continues an existing session.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Returns the message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the caller supplied session, if any.
    #[must_use]
    pub const fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }
}

/// Reply returned to the caller.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatReply {
    response: String,
    session_id: SessionId,
    tools_used: bool,
}

impl ChatReply {
    /// Returns the final answer text.
    #[must_use]
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Returns the session the exchange was recorded under.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns `true` when tool output was fused into the answer.
    #[must_use]
    pub const fn tools_used(&self) -> bool {
        self.tools_used
    }
}

/// Whole-pipeline retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    /// Two attempts; completion, persistence and internal failures qualify.
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::MIN.saturating_add(1),
            retryable: [
                ErrorKind::Completion,
                ErrorKind::Persistence,
                ErrorKind::Internal,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy retrying the given kinds up to `max_attempts` in total.
    #[must_use]
    pub fn new(max_attempts: NonZeroU32, retryable: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            max_attempts,
            retryable: retryable.into_iter().collect(),
        }
    }

    /// Keeps the retryable kinds and changes the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: NonZeroU32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(NonZeroU32::MIN, [])
    }

    /// Returns the attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> NonZeroU32 {
        self.max_attempts
    }

    /// Returns whether another attempt should follow failed attempt `attempt` (1-based).
    #[must_use]
    pub fn should_retry(&self, error: &OrchestratorError, attempt: u32) -> bool {
        attempt < self.max_attempts.get() && self.retryable.contains(&error.kind())
    }
}

/// Sequences history, registry, and composition for each chat message.
#[derive(Clone)]
pub struct ChatOrchestrator {
    registry: Arc<dyn ToolRegistry>,
    history: Arc<dyn ChatHistory>,
    composer: ResponseComposer,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("composer", &self.composer)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ChatOrchestrator {
    /// Creates an orchestrator with the default retry policy and deadline.
    #[must_use]
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        history: Arc<dyn ChatHistory>,
        composer: ResponseComposer,
    ) -> Self {
        Self {
            registry,
            history,
            composer,
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the whole-request deadline.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] for a zero deadline.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> OrchestratorResult<Self> {
        if request_timeout.is_zero() {
            return Err(OrchestratorError::InvalidConfig(
                "request timeout must be greater than zero",
            ));
        }
        self.request_timeout = request_timeout;
        Ok(self)
    }

    /// Returns the registry shared with the HTTP surface.
    #[must_use]
    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    /// Returns the history store.
    #[must_use]
    pub fn history(&self) -> &Arc<dyn ChatHistory> {
        &self.history
    }

    /// Answers one chat message.
    ///
    /// A session id is generated when the caller did not supply one and is
    /// kept across retries. The deadline covers every attempt.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Validation`] for a blank message,
    /// [`OrchestratorError::Timeout`] when the deadline elapses, or the error
    /// of the last attempt once retries are exhausted.
    pub async fn handle(&self, request: ChatRequest) -> OrchestratorResult<ChatReply> {
        if request.message.trim().is_empty() {
            return Err(OrchestratorError::validation("Message is required"));
        }
        let session_id = request.session_id.unwrap_or_else(SessionId::random);

        match timeout(
            self.request_timeout,
            self.run_with_retry(session_id, &request.message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(%session_id, deadline = ?self.request_timeout, "chat request timed out");
                Err(OrchestratorError::Timeout {
                    elapsed: self.request_timeout,
                })
            }
        }
    }

    async fn run_with_retry(&self, session_id: SessionId, message: &str) -> OrchestratorResult<ChatReply> {
        let mut attempt = 1;
        loop {
            match self.run_once(session_id, message).await {
                Ok(reply) => return Ok(reply),
                Err(err) if self.retry.should_retry(&err, attempt) => {
                    warn!(?err, %session_id, attempt, "chat pipeline failed; retrying");
                    attempt += 1;
                }
                Err(err) => {
                    error!(?err, %session_id, attempt, "chat pipeline failed");
                    return Err(err);
                }
            }
        }
    }

    async fn run_once(&self, session_id: SessionId, message: &str) -> OrchestratorResult<ChatReply> {
        let mut lifecycle = RequestLifecycle::new(session_id);
        match self.pipeline(&mut lifecycle, session_id, message).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                if let Err(transition) = lifecycle.transition(RequestEvent::Fail) {
                    debug!(?transition, "request already terminal");
                }
                Err(err)
            }
        }
    }

    async fn pipeline(
        &self,
        lifecycle: &mut RequestLifecycle,
        session_id: SessionId,
        message: &str,
    ) -> OrchestratorResult<ChatReply> {
        self.history.ensure_session(session_id).await?;
        self.history
            .append_message(ChatTurn::new(session_id, ChatRole::User, message))
            .await?;
        lifecycle.transition(RequestEvent::RecordUser)?;

        let tools = self.registry.list_active_tools().await?;
        debug!(%session_id, tools = tools.len(), "live tools fetched");

        let composition = self.composer.compose(message, &tools).await?;
        lifecycle.transition(RequestEvent::Answer)?;

        let tools_used = composition.tools_used();
        let response = composition.into_answer();
        self.history
            .append_message(ChatTurn::new(session_id, ChatRole::Assistant, response.clone()))
            .await?;
        lifecycle.transition(RequestEvent::RecordAssistant)?;
        lifecycle.transition(RequestEvent::Complete)?;

        info!(%session_id, tools_used, "chat request answered");
        Ok(ChatReply {
            response,
            session_id,
            tools_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mesh_adapters::traits::{
        AdapterError, AdapterMetadata, AdapterResult, Completion, CompletionRequest, ModelAdapter,
    };
    use mesh_history::InMemoryHistory;
    use mesh_registry::{InMemoryToolRegistry, RegistryError, RegistryResult};
    use mesh_primitives::{Tool, ToolId, ToolRegistration};

    use crate::dispatcher::{HttpToolInvoker, ToolDispatcher};
    use crate::matcher::CapabilityMatcher;

    /// Fails the first `failures` calls, then answers with a fixed string.
    struct StaticAdapter {
        metadata: AdapterMetadata,
        failures: usize,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl StaticAdapter {
        fn new(failures: usize) -> Self {
            Self {
                metadata: AdapterMetadata::new("static", "static-model"),
                failures,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ModelAdapter for StaticAdapter {
        fn metadata(&self) -> &AdapterMetadata {
            &self.metadata
        }

        async fn complete(&self, _request: CompletionRequest) -> AdapterResult<Completion> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(AdapterError::response("upstream 503"));
            }
            Ok(Completion::new("Hello! How can I help?"))
        }
    }

    struct DownRegistry;

    #[async_trait]
    impl ToolRegistry for DownRegistry {
        async fn list_active_tools(&self) -> RegistryResult<Vec<Tool>> {
            Err(RegistryError::backend("connection refused"))
        }

        async fn register_tool(&self, _registration: ToolRegistration) -> RegistryResult<ToolId> {
            Err(RegistryError::backend("connection refused"))
        }

        async fn record_heartbeat(&self, _name: &str) -> RegistryResult<()> {
            Err(RegistryError::backend("connection refused"))
        }

        async fn deregister_tool(&self, _name: &str) -> RegistryResult<()> {
            Err(RegistryError::backend("connection refused"))
        }
    }

    fn orchestrator(
        adapter: Arc<StaticAdapter>,
        registry: Arc<dyn ToolRegistry>,
        history: Arc<InMemoryHistory>,
    ) -> ChatOrchestrator {
        let composer = ResponseComposer::new(
            adapter,
            CapabilityMatcher::default(),
            ToolDispatcher::new(Arc::new(HttpToolInvoker::new().unwrap())),
        );
        ChatOrchestrator::new(registry, history, composer)
    }

    #[tokio::test]
    async fn hello_without_tools_records_both_turns() {
        let adapter = Arc::new(StaticAdapter::new(0));
        let history = Arc::new(InMemoryHistory::new());
        let orchestrator = orchestrator(
            adapter.clone(),
            Arc::new(InMemoryToolRegistry::new()),
            history.clone(),
        );

        let reply = orchestrator.handle(ChatRequest::new("hello")).await.unwrap();
        assert_eq!(reply.response(), "Hello! How can I help?");
        assert!(!reply.tools_used());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

        let turns = history.session_turns(reply.session_id()).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role(), ChatRole::User);
        assert_eq!(turns[0].content(), "hello");
        assert_eq!(turns[1].role(), ChatRole::Assistant);
    }

    #[tokio::test]
    async fn supplied_session_is_kept() {
        let history = Arc::new(InMemoryHistory::new());
        let orchestrator = orchestrator(
            Arc::new(StaticAdapter::new(0)),
            Arc::new(InMemoryToolRegistry::new()),
            history.clone(),
        );
        let session = SessionId::random();

        let reply = orchestrator
            .handle(ChatRequest::new("hi").with_session(session))
            .await
            .unwrap();
        assert_eq!(reply.session_id(), session);
        assert_eq!(history.session_turns(session).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn blank_message_is_rejected_without_side_effects() {
        let adapter = Arc::new(StaticAdapter::new(0));
        let history = Arc::new(InMemoryHistory::new());
        let orchestrator = orchestrator(
            adapter.clone(),
            Arc::new(InMemoryToolRegistry::new()),
            history.clone(),
        );

        let err = orchestrator
            .handle(ChatRequest::new("   "))
            .await
            .expect_err("blank message");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(history.session_count().await, 0);
    }

    #[tokio::test]
    async fn completion_failure_is_retried_once() {
        let adapter = Arc::new(StaticAdapter::new(1));
        let history = Arc::new(InMemoryHistory::new());
        let orchestrator = orchestrator(
            adapter.clone(),
            Arc::new(InMemoryToolRegistry::new()),
            history.clone(),
        );

        let reply = orchestrator.handle(ChatRequest::new("hello")).await.unwrap();
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
        // The user turn is appended again by the second attempt.
        let turns = history.session_turns(reply.session_id()).await.unwrap();
        assert_eq!(turns.len(), 3);
    }

    #[tokio::test]
    async fn second_failure_is_returned() {
        let adapter = Arc::new(StaticAdapter::new(2));
        let orchestrator = orchestrator(
            adapter.clone(),
            Arc::new(InMemoryToolRegistry::new()),
            Arc::new(InMemoryHistory::new()),
        );

        let err = orchestrator
            .handle(ChatRequest::new("hello"))
            .await
            .expect_err("both attempts fail");
        assert_eq!(err.kind(), ErrorKind::Completion);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn registry_failure_is_persistence_and_retried() {
        let adapter = Arc::new(StaticAdapter::new(0));
        let orchestrator = orchestrator(
            adapter.clone(),
            Arc::new(DownRegistry),
            Arc::new(InMemoryHistory::new()),
        );

        let err = orchestrator
            .handle(ChatRequest::new("hello"))
            .await
            .expect_err("registry is down");
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deadline_covers_all_attempts() {
        let adapter = Arc::new(StaticAdapter {
            delay: Duration::from_millis(200),
            ..StaticAdapter::new(0)
        });
        let orchestrator = orchestrator(
            adapter,
            Arc::new(InMemoryToolRegistry::new()),
            Arc::new(InMemoryHistory::new()),
        )
        .with_request_timeout(Duration::from_millis(50))
        .unwrap();

        let err = orchestrator
            .handle(ChatRequest::new("hello"))
            .await
            .expect_err("deadline elapses");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn retry_policy_respects_kinds_and_budget() {
        let policy = RetryPolicy::default();
        let completion: OrchestratorError = AdapterError::transport("reset").into();
        assert!(policy.should_retry(&completion, 1));
        assert!(!policy.should_retry(&completion, 2));
        assert!(!policy.should_retry(&OrchestratorError::validation("empty"), 1));
        assert!(!RetryPolicy::no_retry().should_retry(&completion, 1));
    }

    #[test]
    fn request_decodes_optional_session() {
        let request: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(request.message(), "hi");
        assert!(request.session_id().is_none());
    }
}
