//! HTTP API tests against a server bound to an ephemeral port.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Uri;
use mesh_adapters::http_client::{RawResponse, build_https_client, get, post_json};
use mesh_adapters::traits::{
    AdapterMetadata, AdapterResult, Completion, CompletionRequest, ModelAdapter,
};
use mesh_history::{ChatHistory, InMemoryHistory};
use mesh_orchestrator::{
    CapabilityMatcher, ChatOrchestrator, HttpToolInvoker, ResponseComposer, ToolDispatcher,
};
use mesh_primitives::{SessionId, ToolRegistration};
use mesh_registry::{
    HttpToolRegistry, InMemoryToolRegistry, LivenessConfig, LivenessReporter, RegistryError,
    ToolRegistry,
};
use mesh_server::{Server, ServerState};
use serde_json::{Value, json};

struct EchoAdapter(AdapterMetadata);

#[async_trait]
impl ModelAdapter for EchoAdapter {
    fn metadata(&self) -> &AdapterMetadata {
        &self.0
    }

    async fn complete(&self, request: CompletionRequest) -> AdapterResult<Completion> {
        let last = request
            .messages()
            .last()
            .map(|message| message.content().to_owned())
            .unwrap_or_default();
        Ok(Completion::new(format!("echo: {last}")))
    }
}

struct Harness {
    server: Server,
    history: Arc<InMemoryHistory>,
}

impl Harness {
    async fn start() -> Self {
        let registry: Arc<dyn ToolRegistry> = Arc::new(InMemoryToolRegistry::new());
        let history = Arc::new(InMemoryHistory::new());
        let composer = ResponseComposer::new(
            Arc::new(EchoAdapter(AdapterMetadata::new("echo", "echo-1"))),
            CapabilityMatcher::default(),
            ToolDispatcher::new(Arc::new(
                HttpToolInvoker::with_timeout(Duration::from_millis(500)).unwrap(),
            )),
        );
        let orchestrator =
            ChatOrchestrator::new(registry, history.clone() as Arc<dyn ChatHistory>, composer);
        let server = Server::start(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Arc::new(ServerState::new(orchestrator)),
        )
        .await
        .unwrap();
        Self { server, history }
    }

    fn base_url(&self) -> String {
        format!("http://{}/", self.server.addr())
    }

    fn uri(&self, path: &str) -> Uri {
        format!("http://{}{path}", self.server.addr()).parse().unwrap()
    }

    fn registry_client(&self) -> HttpToolRegistry {
        HttpToolRegistry::new(self.base_url(), Duration::from_secs(2)).unwrap()
    }

    async fn post(&self, path: &str, body: &Value) -> RawResponse {
        let client = build_https_client().unwrap();
        post_json(
            &client,
            &self.uri(path),
            None,
            serde_json::to_vec(body).unwrap(),
            Duration::from_secs(5),
            "test",
        )
        .await
        .unwrap()
    }

    async fn get(&self, path: &str) -> RawResponse {
        let client = build_https_client().unwrap();
        get(&client, &self.uri(path), Duration::from_secs(5), "test")
            .await
            .unwrap()
    }
}

fn body_json(raw: &RawResponse) -> Value {
    serde_json::from_slice(&raw.body).unwrap()
}

fn registration(name: &str) -> ToolRegistration {
    ToolRegistration::new(
        name,
        "Performs arithmetic",
        "http://127.0.0.1:9/api/calculate",
        ["math", "arithmetic"],
    )
    .unwrap()
}

#[tokio::test]
async fn chat_requires_a_message() {
    let harness = Harness::start().await;
    let raw = harness.post("/api/chat", &json!({ "session_id": null })).await;
    assert_eq!(raw.status.as_u16(), 400);
    assert_eq!(body_json(&raw), json!({ "error": "Message is required" }));
}

#[tokio::test]
async fn chat_rejects_malformed_session() {
    let harness = Harness::start().await;
    let raw = harness
        .post("/api/chat", &json!({ "message": "hi", "session_id": "abc" }))
        .await;
    assert_eq!(raw.status.as_u16(), 400);
    assert!(body_json(&raw)["error"].as_str().unwrap().contains("session"));
}

#[tokio::test]
async fn chat_answers_and_records_turns() {
    let harness = Harness::start().await;
    let session = SessionId::random();
    let raw = harness
        .post(
            "/api/chat",
            &json!({ "message": "hello", "session_id": session.to_string() }),
        )
        .await;
    assert_eq!(raw.status.as_u16(), 200);

    let reply = body_json(&raw);
    assert_eq!(reply["response"], "echo: hello");
    assert_eq!(reply["session_id"], session.to_string());
    assert_eq!(reply["tools_used"], false);
    assert_eq!(harness.history.session_turns(session).await.unwrap().len(), 2);
}

#[tokio::test]
async fn registry_routes_round_trip_through_remote_client() {
    let harness = Harness::start().await;
    let client = harness.registry_client();

    let first = client.register_tool(registration("Calculator")).await.unwrap();
    let again = client.register_tool(registration("Calculator")).await.unwrap();
    assert_eq!(first, again);

    client.record_heartbeat("Calculator").await.unwrap();
    let tools = client.list_active_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name(), "Calculator");
    assert!(tools[0].last_heartbeat().is_some());

    client.deregister_tool("Calculator").await.unwrap();
    assert!(client.list_active_tools().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_tool_heartbeat_is_not_found() {
    let harness = Harness::start().await;
    let err = harness
        .registry_client()
        .record_heartbeat("Ghost")
        .await
        .expect_err("never registered");
    assert!(matches!(err, RegistryError::UnknownTool { name } if name == "Ghost"));
}

#[tokio::test]
async fn register_requires_every_field() {
    let harness = Harness::start().await;
    let raw = harness
        .post("/api/tools/register", &json!({ "name": "Calculator" }))
        .await;
    assert_eq!(raw.status.as_u16(), 400);
    assert_eq!(body_json(&raw), json!({ "error": "Missing required fields" }));
}

#[tokio::test]
async fn register_reply_carries_tool_id() {
    let harness = Harness::start().await;
    let raw = harness
        .post(
            "/api/tools/register",
            &json!({
                "name": "Calculator",
                "description": "Performs arithmetic",
                "endpoint_url": "http://127.0.0.1:9/api/calculate",
                "capabilities": ["math"],
            }),
        )
        .await;
    assert_eq!(raw.status.as_u16(), 200);
    let reply = body_json(&raw);
    assert_eq!(reply["status"], "registered");
    assert!(reply["tool_id"].as_str().is_some());
}

#[tokio::test]
async fn health_reports_registry_connection() {
    let harness = Harness::start().await;
    let raw = harness.get("/api/health").await;
    assert_eq!(raw.status.as_u16(), 200);
    let body = body_json(&raw);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["registry"], "connected");
    assert_eq!(body["database"], "connected");
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn liveness_reporter_announces_and_withdraws() {
    let harness = Harness::start().await;
    let client: Arc<dyn ToolRegistry> = Arc::new(harness.registry_client());
    let config = LivenessConfig::new(
        Duration::from_millis(50),
        Duration::from_millis(10),
        Duration::from_millis(50),
        NonZeroUsize::new(2).unwrap(),
    );
    let reporter =
        LivenessReporter::spawn(client.clone(), registration("Calculator"), config).unwrap();

    let mut listed = Vec::new();
    for _ in 0..50 {
        listed = client.list_active_tools().await.unwrap();
        if !listed.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(listed.len(), 1);

    reporter.shutdown().await.unwrap();
    assert!(client.list_active_tools().await.unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_stops_the_listener() {
    let mut harness = Harness::start().await;
    let uri = harness.uri("/api/health");
    harness.server.shutdown();
    let Harness { server, .. } = harness;
    server.wait().await.unwrap();

    let client = build_https_client().unwrap();
    assert!(get(&client, &uri, Duration::from_millis(500), "test").await.is_err());
}
