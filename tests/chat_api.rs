//! End-to-end tests of the HTTP surface with a scripted model

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use swapchat::assembler::{Credential, RemoteSource, ToolSetAssembler};
use swapchat::config::Config;
use swapchat::identity::BearerIdentity;
use swapchat::llm::{MockLlmClient, MockStep, ToolCall};
use swapchat::registry::{CachedRegistry, HttpConnector, RegistryAuth, RegistryConnector, RegistryError};
use swapchat::server::{AppState, router};
use swapchat::tools::{Tool, ToolError, ToolSet};

const WALLET: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

struct Balance;

#[async_trait]
impl Tool for Balance {
    fn name(&self) -> &str {
        "getBalance"
    }

    fn description(&self) -> &str {
        "Native balance of a wallet"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"address": {"type": "string"}}, "required": ["address"]})
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        Ok(json!({"address": input["address"], "balance": "1000000000000000000"}))
    }
}

fn direct_tools() -> ToolSet {
    let mut set = ToolSet::new();
    set.insert(Arc::new(Balance));
    set
}

fn app(llm: Arc<MockLlmClient>, assembler: ToolSetAssembler, require_session: bool) -> Router {
    let mut config = Config::default();
    config.server.require_session = require_session;
    config.registries.clear();
    let state = AppState::new(&config, assembler, llm, Arc::new(BearerIdentity::new()));
    router(Arc::new(state))
}

fn chat(body: impl Into<Body>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(body.into()).unwrap()
}

fn user_message(text: &str) -> Value {
    json!({"messages": [{"id": "m1", "role": "user", "parts": [{"type": "text", "text": text}]}], "walletAddress": WALLET})
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

/// `data:` payloads of an SSE body
fn data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
        .map(String::from)
        .collect()
}

fn events(body: &str) -> Vec<Value> {
    data_lines(body)
        .iter()
        .filter(|d| d.as_str() != "[DONE]")
        .map(|d| serde_json::from_str(d).unwrap())
        .collect()
}

fn types(events: &[Value]) -> Vec<String> {
    events.iter().map(|e| e["type"].as_str().unwrap().to_string()).collect()
}

#[tokio::test]
async fn test_health_lists_direct_tools() {
    let llm = Arc::new(MockLlmClient::new(vec![]));
    let app = app(llm, ToolSetAssembler::new(direct_tools(), vec![]), true);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, _, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tools"], json!(["getBalance"]));
}

#[tokio::test]
async fn test_missing_session_is_unauthorized() {
    let llm = Arc::new(MockLlmClient::new(vec![MockStep::text("hi")]));
    let app = app(llm.clone(), ToolSetAssembler::new(direct_tools(), vec![]), true);

    let (status, _, body) = send(app, chat(user_message("hi").to_string(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert!(body["error"].is_string());
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_malformed_bodies_are_rejected() {
    let cases = [
        "not json".to_string(),
        "[]".to_string(),
        json!({}).to_string(),
        json!({"messages": "hi"}).to_string(),
        json!({"messages": []}).to_string(),
        json!({"messages": [{"parts": []}]}).to_string(),
        json!({"messages": [{"role": "user", "content": "hi"}], "walletAddress": "0x1234"}).to_string(),
        json!({"messages": [{"role": "user", "content": "hi"}], "model": "gpt-2"}).to_string(),
    ];

    for body in cases {
        let llm = Arc::new(MockLlmClient::new(vec![MockStep::text("hi")]));
        let app = app(llm.clone(), ToolSetAssembler::new(direct_tools(), vec![]), false);
        let (status, _, response) = send(app, chat(body.clone(), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        let response: Value = serde_json::from_str(&response).unwrap();
        assert!(response["error"].as_str().unwrap().starts_with("Invalid request"), "body: {}", body);
        assert_eq!(llm.call_count(), 0);
    }
}

#[tokio::test]
async fn test_text_stream() {
    let llm = Arc::new(MockLlmClient::new(vec![MockStep::text("Hello there")]));
    let app = app(llm.clone(), ToolSetAssembler::new(direct_tools(), vec![]), true);

    let (status, headers, body) = send(app, chat(user_message("hi").to_string(), Some("tok"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[CONTENT_TYPE].to_str().unwrap().starts_with("text/event-stream"));
    assert_eq!(headers["x-vercel-ai-ui-message-stream"], "v1");

    assert_eq!(data_lines(&body).last().map(String::as_str), Some("[DONE]"));
    let events = events(&body);
    assert_eq!(
        types(&events),
        vec!["start", "start-step", "text-start", "text-delta", "text-end", "finish-step", "finish"]
    );
    assert_eq!(events[3]["delta"], "Hello there");

    // The wallet reaches the model through the system instruction
    let request = &llm.requests()[0];
    assert!(request.system.contains(WALLET));
    assert_eq!(request.tools.len(), 1);
}

#[tokio::test]
async fn test_tool_round_trip_and_bad_input() {
    let llm = Arc::new(MockLlmClient::new(vec![
        MockStep::tool_calls(vec![
            ToolCall::new("call_1", "getBalance", json!({"address": WALLET})),
            ToolCall::new("call_2", "getBalance", json!({})),
            ToolCall::new("call_3", "transfer", json!({})),
        ]),
        MockStep::text("Your balance is 1 ETH"),
    ]));
    let app = app(llm.clone(), ToolSetAssembler::new(direct_tools(), vec![]), false);

    let (status, _, body) = send(app, chat(user_message("balance?").to_string(), None)).await;
    assert_eq!(status, StatusCode::OK);
    let events = events(&body);

    let outputs: Vec<&Value> = events
        .iter()
        .filter(|e| {
            let t = e["type"].as_str().unwrap();
            t == "tool-output-available" || t == "tool-output-error"
        })
        .collect();
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs[0]["toolCallId"], "call_1");
    assert_eq!(outputs[0]["output"]["balance"], "1000000000000000000");
    assert_eq!(outputs[1]["type"], "tool-output-error");
    assert!(outputs[1]["errorText"].as_str().unwrap().contains("address"));
    assert_eq!(outputs[2]["errorText"], "Tool not found: transfer");

    assert_eq!(types(&events).last().unwrap(), "finish");
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_engine_failure_before_stream_is_json_error() {
    let llm = Arc::new(MockLlmClient::new(vec![MockStep::fail(500)]));
    let app = app(llm, ToolSetAssembler::new(direct_tools(), vec![]), false);

    let (status, headers, body) = send(app, chat(user_message("hi").to_string(), None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(headers[CONTENT_TYPE].to_str().unwrap().starts_with("application/json"));
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "Language model request failed with status 500");
}

#[tokio::test]
async fn test_engine_failure_mid_stream_is_error_event() {
    let llm = Arc::new(MockLlmClient::new(vec![MockStep::fail_after_text("Let me", 503)]));
    let app = app(llm, ToolSetAssembler::new(direct_tools(), vec![]), false);

    let (status, _, body) = send(app, chat(user_message("hi").to_string(), None)).await;
    assert_eq!(status, StatusCode::OK);
    let events = events(&body);
    let last = events.last().unwrap();
    assert_eq!(last["type"], "error");
    assert_eq!(last["errorText"], "Language model request failed with status 503");
    assert_eq!(data_lines(&body).last().map(String::as_str), Some("[DONE]"));
}

/// A Streamable HTTP MCP hub with one tool
#[derive(Default)]
struct Hub {
    connects: AtomicUsize,
    closes: AtomicUsize,
    calls: AtomicUsize,
    credentials: Mutex<Vec<String>>,
    stall_handshake: AtomicBool,
}

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

async fn hub_post(State(hub): State<Arc<Hub>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let credential = headers
        .get("authorization")
        .or_else(|| headers.get("nansen-api-key"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    hub.credentials.lock().unwrap().push(credential);

    let id = &body["id"];
    match body["method"].as_str() {
        Some("initialize") => {
            let n = hub.connects.fetch_add(1, Ordering::SeqCst) + 1;
            let result = rpc_result(
                id,
                json!({"protocolVersion": "2025-03-26", "capabilities": {"tools": {}}, "serverInfo": {"name": "hub", "version": "1"}}),
            );
            ([("mcp-session-id", format!("session-{}", n))], Json(result)).into_response()
        }
        Some("notifications/initialized") => {
            if hub.stall_handshake.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            StatusCode::ACCEPTED.into_response()
        }
        Some("tools/list") => {
            let result = rpc_result(
                id,
                json!({"tools": [{
                    "name": "walletLabels",
                    "description": "Labels for a wallet",
                    "inputSchema": {"type": "object", "properties": {"address": {"type": "string"}}, "required": ["address"]}
                }]}),
            );
            let body = format!("event: message\ndata: {}\n\n", result);
            ([(CONTENT_TYPE, "text/event-stream")], body).into_response()
        }
        Some("tools/call") => {
            hub.calls.fetch_add(1, Ordering::SeqCst);
            Json(rpc_result(
                id,
                json!({"content": [{"type": "text", "text": "Smart Money"}], "isError": false}),
            ))
            .into_response()
        }
        _ => Json(json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}}))
            .into_response(),
    }
}

async fn hub_delete(State(hub): State<Arc<Hub>>) -> StatusCode {
    hub.closes.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn start_hub() -> (Arc<Hub>, String) {
    start_hub_with(Hub::default()).await
}

async fn start_hub_with(hub: Hub) -> (Arc<Hub>, String) {
    let hub = Arc::new(hub);
    let app = Router::new()
        .route("/mcp", post(hub_post).delete(hub_delete))
        .with_state(hub.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (hub, format!("http://{}/mcp", addr))
}

fn connector(url: &str) -> Arc<HttpConnector> {
    Arc::new(HttpConnector::new(url, Duration::from_secs(2)).unwrap())
}

fn remote_call_script() -> Vec<MockStep> {
    vec![
        MockStep::tool_calls(vec![ToolCall::new("call_1", "walletLabels", json!({"address": WALLET}))]),
        MockStep::text("That wallet is labelled Smart Money"),
    ]
}

#[tokio::test]
async fn test_transient_hub_is_opened_and_closed_per_request() {
    let (hub, url) = start_hub().await;
    let source = RemoteSource::transient("nexus", connector(&url), Credential::PerSession, Duration::from_secs(2));
    let llm = Arc::new(MockLlmClient::new(remote_call_script()));
    let app = app(llm.clone(), ToolSetAssembler::new(direct_tools(), vec![source]), true);

    let (status, _, body) = send(app, chat(user_message("who is this?").to_string(), Some("user-token"))).await;
    assert_eq!(status, StatusCode::OK);

    let events = events(&body);
    let output = events.iter().find(|e| e["type"] == "tool-output-available").unwrap();
    assert_eq!(output["output"]["content"][0]["text"], "Smart Money");

    let offered: Vec<String> = llm.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
    assert_eq!(offered, vec!["getBalance", "walletLabels"]);

    assert_eq!(hub.connects.load(Ordering::SeqCst), 1);
    assert_eq!(hub.calls.load(Ordering::SeqCst), 1);
    assert_eq!(hub.closes.load(Ordering::SeqCst), 1);
    assert!(hub.credentials.lock().unwrap().iter().all(|c| c == "Bearer user-token"));
}

#[tokio::test]
async fn test_session_hub_is_skipped_without_token() {
    let (hub, url) = start_hub().await;
    let source = RemoteSource::transient("nexus", connector(&url), Credential::PerSession, Duration::from_secs(2));
    let llm = Arc::new(MockLlmClient::new(vec![MockStep::text("hi")]));
    let app = app(llm.clone(), ToolSetAssembler::new(direct_tools(), vec![source]), false);

    let (status, _, _) = send(app, chat(user_message("hi").to_string(), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hub.connects.load(Ordering::SeqCst), 0);
    assert_eq!(llm.requests()[0].tools.len(), 1);
}

#[tokio::test]
async fn test_cached_hub_is_shared_across_requests() {
    let (hub, url) = start_hub().await;
    let auth = RegistryAuth::Header {
        name: "NANSEN-API-KEY".to_string(),
        value: "static-key".to_string(),
    };
    let registry = Arc::new(CachedRegistry::new("nansen", connector(&url), auth.clone(), false));
    let source = RemoteSource::cached(registry.clone(), Credential::Static(auth), Duration::from_secs(2));

    let mut script = remote_call_script();
    script.push(MockStep::text("again"));
    let llm = Arc::new(MockLlmClient::new(script));
    let app = app(llm, ToolSetAssembler::new(direct_tools(), vec![source]), false);

    for _ in 0..2 {
        let (status, _, body) = send(app.clone(), chat(user_message("labels").to_string(), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(types(&events(&body)).last().unwrap(), "finish");
    }

    assert_eq!(hub.connects.load(Ordering::SeqCst), 1);
    assert_eq!(hub.closes.load(Ordering::SeqCst), 0);
    assert_eq!(registry.lease_count(), 0);
    assert!(hub.credentials.lock().unwrap().iter().all(|c| c == "static-key"));

    registry.reset().await;
    assert_eq!(hub.closes.load(Ordering::SeqCst), 1);
    assert!(!registry.is_connected());
}

#[tokio::test]
async fn test_unreachable_hub_leaves_direct_tools() {
    let source = RemoteSource::transient(
        "down",
        connector("http://127.0.0.1:9/mcp"),
        Credential::Static(RegistryAuth::None),
        Duration::from_millis(500),
    );
    let llm = Arc::new(MockLlmClient::new(vec![MockStep::text("still here")]));
    let app = app(llm.clone(), ToolSetAssembler::new(direct_tools(), vec![source]), false);

    let (status, _, body) = send(app, chat(user_message("hi").to_string(), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(types(&events(&body)).last().unwrap(), "finish");
    let offered: Vec<String> = llm.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
    assert_eq!(offered, vec!["getBalance"]);
}

#[tokio::test]
async fn test_stalled_handshake_closes_hub_session() {
    let (hub, url) = start_hub_with(Hub {
        stall_handshake: AtomicBool::new(true),
        ..Hub::default()
    })
    .await;
    let connector = HttpConnector::new(&url, Duration::from_millis(300)).unwrap();

    let started = std::time::Instant::now();
    let err = connector.connect(&RegistryAuth::None).await.err().unwrap();
    assert!(matches!(err, RegistryError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(2));

    // The hub handed out a session id before stalling; it was deleted again
    assert_eq!(hub.connects.load(Ordering::SeqCst), 1);
    assert_eq!(hub.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stalled_handshake_contributes_no_tools() {
    let (hub, url) = start_hub_with(Hub {
        stall_handshake: AtomicBool::new(true),
        ..Hub::default()
    })
    .await;
    let source = RemoteSource::transient(
        "stalled",
        Arc::new(HttpConnector::new(&url, Duration::from_millis(300)).unwrap()),
        Credential::Static(RegistryAuth::None),
        Duration::from_millis(300),
    );
    let llm = Arc::new(MockLlmClient::new(vec![MockStep::text("hi")]));
    let app = app(llm.clone(), ToolSetAssembler::new(direct_tools(), vec![source]), false);

    let (status, _, _) = send(app, chat(user_message("hi").to_string(), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(llm.requests()[0].tools.len(), 1);
    assert_eq!(hub.closes.load(Ordering::SeqCst), 1);
}
