//! MCP Streamable HTTP client transport
//!
//! Every JSON-RPC message is POSTed to the hub URL. The hub answers either
//! with a JSON body or with an SSE stream that carries the response; the
//! stream is read only until the matching response arrives.
//!
//! The handshake runs under the connector's own timeout. A session the hub
//! already created is closed again when the handshake fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use serde_json::{Value, json};

use super::protocol::{JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpToolInfo, PROTOCOL_VERSION};
use super::{RegistryAuth, RegistryConnector, RegistryError, RegistrySession};

const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Upper bound on `tools/list` pages followed for one listing
const MAX_LIST_PAGES: usize = 50;

fn auth_headers(auth: &RegistryAuth) -> Result<HeaderMap, RegistryError> {
    let mut headers = HeaderMap::new();
    let invalid = |e: String| RegistryError::Protocol(format!("invalid credential header: {}", e));
    match auth {
        RegistryAuth::Bearer(token) => {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| invalid(e.to_string()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        RegistryAuth::Header { name, value } => {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            headers.insert(name, value);
        }
        RegistryAuth::None => {}
    }
    Ok(headers)
}

/// Shared plumbing for one hub endpoint
#[derive(Clone)]
struct Endpoint {
    http: Client,
    url: String,
    headers: HeaderMap,
    timeout: Duration,
}

impl Endpoint {
    async fn post(&self, session_id: Option<&str>, message: &JsonRpcRequest) -> Result<Response, RegistryError> {
        let mut request = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, ACCEPT_BOTH)
            .json(message);
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Registry {} answered {} to {}: {}", self.url, status.as_u16(), message.method, body);
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Read the response to request `id` from a JSON or SSE body
    async fn read_response(response: Response, id: u64) -> Result<Value, RegistryError> {
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_sse {
            let body: Value = response.json().await?;
            return Self::pick(body, id)
                .ok_or_else(|| RegistryError::Protocol(format!("no response for request {}", id)))?;
        }

        read_event_stream(response.bytes_stream(), id).await
    }

    /// Find the response to `id` in a single message or a batch
    fn pick(body: Value, id: u64) -> Option<Result<Value, RegistryError>> {
        let messages = match body {
            Value::Array(items) => items,
            other => vec![other],
        };
        messages
            .into_iter()
            .filter_map(|m| serde_json::from_value::<JsonRpcResponse>(m).ok())
            .find(|r| r.answers(id))
            .map(|r| r.into_result().map_err(RegistryError::from))
    }
}

/// Read `text/event-stream` events until the response to request `id` arrives
async fn read_event_stream<S, B, E>(body: S, id: u64) -> Result<Value, RegistryError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut events = std::pin::pin!(body.eventsource());
    while let Some(event) = events.next().await {
        let event = event.map_err(|e| RegistryError::Protocol(format!("bad event stream: {}", e)))?;
        let Ok(message) = serde_json::from_str::<Value>(&event.data) else {
            log::debug!("Skipping non-JSON registry event");
            continue;
        };
        if let Some(result) = Endpoint::pick(message, id) {
            return result;
        }
    }
    Err(RegistryError::Protocol(format!("stream ended before response to request {}", id)))
}

/// Connector for one Streamable HTTP hub
pub struct HttpConnector {
    http: Client,
    url: String,
    client_name: String,
    timeout: Duration,
}

impl HttpConnector {
    /// `timeout` bounds the handshake and each session close
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let http = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            timeout,
        })
    }

    /// Read the initialize result and send `notifications/initialized`
    async fn handshake(&self, session: &HttpSession, response: Response) -> Result<(), RegistryError> {
        let server = Endpoint::read_response(response, 0).await?;
        log::debug!(
            "Connected to {} ({}), session {:?}",
            self.url,
            server["serverInfo"]["name"].as_str().unwrap_or("unknown server"),
            session.session_id
        );

        session
            .endpoint
            .post(session.session_id.as_deref(), &JsonRpcRequest::notification("notifications/initialized"))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RegistryConnector for HttpConnector {
    async fn connect(&self, auth: &RegistryAuth) -> Result<Arc<dyn RegistrySession>, RegistryError> {
        let endpoint = Endpoint {
            http: self.http.clone(),
            url: self.url.clone(),
            headers: auth_headers(auth)?,
            timeout: self.timeout,
        };

        let init = JsonRpcRequest::new(
            0,
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": self.client_name, "version": env!("CARGO_PKG_VERSION")}
            }),
        );
        let deadline = tokio::time::Instant::now() + self.timeout;
        let response = tokio::time::timeout_at(deadline, endpoint.post(None, &init))
            .await
            .map_err(|_| RegistryError::Timeout(self.timeout))??;
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // From here on the hub may hold a session that must not be leaked
        let session = HttpSession {
            endpoint,
            session_id,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };
        let outcome = match tokio::time::timeout_at(deadline, self.handshake(&session, response)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RegistryError::Timeout(self.timeout)),
        };
        if let Err(e) = outcome {
            log::warn!("Handshake with {} failed: {}", self.url, e);
            session.close().await;
            return Err(e);
        }
        Ok(Arc::new(session))
    }
}

/// An initialized MCP session
pub struct HttpSession {
    endpoint: Endpoint,
    session_id: Option<String>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HttpSession {
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Protocol("session is closed".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let response = self.endpoint.post(self.session_id.as_deref(), &request).await?;
        Endpoint::read_response(response, id).await
    }
}

#[async_trait]
impl RegistrySession for HttpSession {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, RegistryError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(c) => json!({"cursor": c}),
                None => json!({}),
            };
            let page: ListToolsResult = serde_json::from_value(self.rpc("tools/list", params).await?)
                .map_err(|e| RegistryError::Protocol(format!("bad tools/list result: {}", e)))?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        log::warn!("Stopped following tools/list cursors from {} after {} pages", self.endpoint.url, MAX_LIST_PAGES);
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, RegistryError> {
        self.rpc("tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(id) = &self.session_id else {
            return;
        };

        let result = self
            .endpoint
            .http
            .delete(&self.endpoint.url)
            .headers(self.endpoint.headers.clone())
            .header(SESSION_HEADER, id)
            .timeout(self.endpoint.timeout)
            .send()
            .await;
        match result {
            Ok(response) => log::debug!("Closed session {} on {}: {}", id, self.endpoint.url, response.status()),
            Err(e) => log::debug!("Failed to close session {} on {}: {}", id, self.endpoint.url, e),
        }
    }
}
