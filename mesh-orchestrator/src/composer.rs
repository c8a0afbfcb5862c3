//! Two-stage response composition.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use mesh_adapters::traits::{CompletionRequest, ModelAdapter, PromptMessage};
use mesh_primitives::Tool;
use tracing::{debug, info};

use crate::dispatcher::{ToolDispatcher, ToolInvocationResult};
use crate::error::OrchestratorResult;
use crate::matcher::{CapabilityMatcher, MatchResult};

/// Final answer of a composition together with how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    answer: String,
    tool_results: Vec<ToolInvocationResult>,
}

impl Composition {
    /// Returns the final answer text.
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Consumes the composition, returning the answer text.
    #[must_use]
    pub fn into_answer(self) -> String {
        self.answer
    }

    /// Returns the tool outputs folded into the answer.
    #[must_use]
    pub fn tool_results(&self) -> &[ToolInvocationResult] {
        &self.tool_results
    }

    /// Returns `true` when at least one tool contributed.
    #[must_use]
    pub fn tools_used(&self) -> bool {
        !self.tool_results.is_empty()
    }
}

/// Builds the stage-one system prompt listing every live tool.
#[must_use]
pub fn system_prompt(tools: &[Tool]) -> String {
    let listing = tools
        .iter()
        .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are an AI assistant with access to the following tools:\n\n{listing}\n\n\
         When a user's request requires using these tools, incorporate them into your response.\n\
         If no tools are needed, respond directly to the user's query."
    )
}

/// Builds the fusion conversation from the direct answer and tool outputs.
#[must_use]
pub fn fusion_messages(
    message: &str,
    direct_answer: &str,
    results: &[ToolInvocationResult],
) -> Vec<PromptMessage> {
    let mut context = String::from("Tool results:\n");
    for result in results {
        let _ = writeln!(context, "{} returned: {}", result.tool_name(), result.payload());
    }
    context.push_str("Please provide a final response incorporating these tool results.");

    vec![
        PromptMessage::user(message),
        PromptMessage::assistant(direct_answer),
        PromptMessage::system(context),
    ]
}

/// Drives the direct completion, tool stage, and optional fusion completion.
#[derive(Clone)]
pub struct ResponseComposer {
    adapter: Arc<dyn ModelAdapter>,
    matcher: CapabilityMatcher,
    dispatcher: ToolDispatcher,
    temperature: Option<f32>,
}

impl fmt::Debug for ResponseComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata = self.adapter.metadata();
        f.debug_struct("ResponseComposer")
            .field("provider", &metadata.provider())
            .field("model", &metadata.model())
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

impl ResponseComposer {
    /// Creates a composer.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ModelAdapter>,
        matcher: CapabilityMatcher,
        dispatcher: ToolDispatcher,
    ) -> Self {
        Self {
            adapter,
            matcher,
            dispatcher,
            temperature: None,
        }
    }

    /// Sets the sampling temperature for both completion calls.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Returns the matcher in use.
    #[must_use]
    pub const fn matcher(&self) -> &CapabilityMatcher {
        &self.matcher
    }

    /// Produces the final answer for `message` given the live tool snapshot.
    ///
    /// The direct completion and the tool stage run concurrently. Without
    /// tool output the direct answer is final and no second completion is made.
    ///
    /// # Errors
    ///
    /// Returns [`crate::OrchestratorError::Completion`] when either completion
    /// call fails. Matching and dispatch failures never surface here.
    pub async fn compose(&self, message: &str, tools: &[Tool]) -> OrchestratorResult<Composition> {
        let (direct, tool_results) = tokio::join!(
            self.direct_answer(message, tools),
            self.run_tools(message, tools)
        );
        let direct = direct?;

        if tool_results.is_empty() {
            return Ok(Composition {
                answer: direct,
                tool_results,
            });
        }

        info!(tools = tool_results.len(), "fusing tool results into answer");
        let answer = self.fuse(message, &direct, &tool_results).await?;
        Ok(Composition {
            answer,
            tool_results,
        })
    }

    /// Stage one: answer directly with every live tool described in the prompt.
    ///
    /// # Errors
    ///
    /// Propagates completion failures.
    pub async fn direct_answer(&self, message: &str, tools: &[Tool]) -> OrchestratorResult<String> {
        let messages = vec![
            PromptMessage::system(system_prompt(tools)),
            PromptMessage::user(message),
        ];
        let completion = self.adapter.complete(self.request(messages)?).await?;
        debug!(chars = completion.content().len(), "direct answer received");
        Ok(completion.into_content())
    }

    /// Stage two: fold tool outputs into a final answer.
    ///
    /// # Errors
    ///
    /// Propagates completion failures.
    pub async fn fuse(
        &self,
        message: &str,
        direct_answer: &str,
        results: &[ToolInvocationResult],
    ) -> OrchestratorResult<String> {
        let messages = fusion_messages(message, direct_answer, results);
        let completion = self.adapter.complete(self.request(messages)?).await?;
        Ok(completion.into_content())
    }

    async fn run_tools(&self, message: &str, tools: &[Tool]) -> Vec<ToolInvocationResult> {
        if tools.is_empty() {
            return Vec::new();
        }
        let selected: Vec<Tool> = self
            .matcher
            .match_tools(message, tools)
            .await
            .into_iter()
            .map(MatchResult::into_tool)
            .collect();
        self.dispatcher.dispatch(&selected, message).await
    }

    fn request(&self, messages: Vec<PromptMessage>) -> OrchestratorResult<CompletionRequest> {
        let request = CompletionRequest::new(messages)?;
        Ok(match self.temperature {
            Some(temperature) => request.with_temperature(temperature),
            None => request,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mesh_adapters::traits::{
        AdapterError, AdapterMetadata, AdapterResult, Completion, MessageRole,
    };
    use mesh_primitives::{ToolId, ToolRegistration};
    use serde_json::json;

    use crate::dispatcher::ToolInvoker;
    use crate::error::{OrchestratorError, OrchestratorResult};

    struct StaticAdapter {
        metadata: AdapterMetadata,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl StaticAdapter {
        fn new() -> Self {
            Self {
                metadata: AdapterMetadata::new("static", "static-model"),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelAdapter for StaticAdapter {
        fn metadata(&self) -> &AdapterMetadata {
            &self.metadata
        }

        async fn complete(&self, request: CompletionRequest) -> AdapterResult<Completion> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            Ok(Completion::new(format!("answer {}", requests.len())))
        }
    }

    struct FailingAdapter(AdapterMetadata);

    #[async_trait]
    impl ModelAdapter for FailingAdapter {
        fn metadata(&self) -> &AdapterMetadata {
            &self.0
        }

        async fn complete(&self, _request: CompletionRequest) -> AdapterResult<Completion> {
            Err(AdapterError::transport("connection reset"))
        }
    }

    #[derive(Default)]
    struct CountingInvoker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolInvoker for CountingInvoker {
        async fn invoke(&self, tool: &Tool, _message: &str) -> OrchestratorResult<ToolInvocationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolInvocationResult::new(tool.name(), json!({ "result": 4 })))
        }
    }

    fn calculator() -> Tool {
        Tool::new(
            ToolId::random(),
            ToolRegistration::new(
                "Calculator",
                "Performs arithmetic",
                "http://calculator/api",
                ["arithmetic", "+"],
            )
            .unwrap(),
        )
    }

    fn composer(adapter: Arc<dyn ModelAdapter>, invoker: Arc<CountingInvoker>) -> ResponseComposer {
        ResponseComposer::new(
            adapter,
            CapabilityMatcher::default(),
            ToolDispatcher::new(invoker),
        )
    }

    #[test]
    fn system_prompt_lists_tools() {
        let prompt = system_prompt(&[calculator()]);
        assert!(prompt.starts_with("You are an AI assistant with access to the following tools:\n\n- Calculator: Performs arithmetic\n\n"));
        assert!(prompt.ends_with("respond directly to the user's query."));
    }

    #[test]
    fn fusion_context_lists_results() {
        let messages = fusion_messages(
            "What is 2 + 2?",
            "Let me check.",
            &[ToolInvocationResult::new("Calculator", json!({ "result": 4 }))],
        );
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role(), MessageRole::User);
        assert_eq!(messages[1].role(), MessageRole::Assistant);
        assert_eq!(messages[2].role(), MessageRole::System);
        assert_eq!(
            messages[2].content(),
            "Tool results:\nCalculator returned: {\"result\":4}\nPlease provide a final response incorporating these tool results."
        );
    }

    #[tokio::test]
    async fn unmatched_message_returns_direct_answer() {
        let adapter = Arc::new(StaticAdapter::new());
        let invoker = Arc::new(CountingInvoker::default());
        let composition = composer(adapter.clone(), invoker.clone())
            .compose("tell me a joke", &[calculator()])
            .await
            .unwrap();

        assert_eq!(composition.answer(), "answer 1");
        assert!(!composition.tools_used());
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
        assert_eq!(adapter.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn matched_message_runs_fusion() {
        let adapter = Arc::new(StaticAdapter::new());
        let invoker = Arc::new(CountingInvoker::default());
        let composition = composer(adapter.clone(), invoker.clone())
            .compose("What is 2 + 2?", &[calculator()])
            .await
            .unwrap();

        assert_eq!(composition.answer(), "answer 2");
        assert!(composition.tools_used());
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);

        let requests = adapter.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages()[2].content().contains("Calculator returned"));
    }

    #[tokio::test]
    async fn completion_failure_propagates() {
        let adapter = Arc::new(FailingAdapter(AdapterMetadata::new("failing", "none")));
        let invoker = Arc::new(CountingInvoker::default());
        let err = composer(adapter, invoker)
            .compose("hello", &[])
            .await
            .expect_err("completion fails");
        assert!(matches!(err, OrchestratorError::Completion { .. }));
    }
}
