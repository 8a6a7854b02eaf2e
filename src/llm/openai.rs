//! OpenAI API client implementation
//!
//! This module implements the LlmClient trait for OpenAI-compatible
//! `/chat/completions` endpoints with `stream: true`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource, retry::Never};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::client::{LlmClient, LlmError};
use super::streaming::{StreamChunk, StreamParser, parse_sse_data};
use super::types::{CompletionRequest, CompletionResponse, ContentBlock, Message, Role};

/// OpenAI API base URL
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Default model to use
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default max tokens
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for the OpenAI client
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: OPENAI_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(30),
        }
    }
}

/// OpenAI API client
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    config: OpenAiConfig,
}

impl OpenAiClient {
    /// Create a client with an explicit API key
    pub fn with_api_key(api_key: impl Into<String>, config: OpenAiConfig) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey {
                env_var: "OPENAI_API_KEY".to_string(),
            });
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Build the request body for the chat completions API
    fn build_request(&self, request: &CompletionRequest) -> Value {
        let model = request.model.as_ref().unwrap_or(&self.config.model);
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);

        let mut messages = Vec::new();
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        for message in &request.messages {
            messages.extend(to_openai_messages(message));
        }

        let mut body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": messages
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_openai_schema()).collect();
            body["tools"] = json!(tools);
        }

        body
    }
}

/// Convert one message into OpenAI wire messages.
///
/// Tool results become one `tool` message each; everything else maps 1:1.
fn to_openai_messages(message: &Message) -> Vec<Value> {
    match message.role {
        Role::System => vec![json!({"role": "system", "content": message.text_content()})],
        Role::User => vec![json!({"role": "user", "content": message.text_content()})],
        Role::Assistant => {
            let text = message.text_content();
            let tool_calls: Vec<Value> = message
                .tool_uses()
                .into_iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.input.to_string()
                        }
                    })
                })
                .collect();

            let mut out = json!({"role": "assistant", "content": if text.is_empty() { Value::Null } else { json!(text) }});
            if !tool_calls.is_empty() {
                out["tool_calls"] = json!(tool_calls);
            }
            vec![out]
        }
        Role::Tool => message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult {
                    tool_use_id, content, ..
                } => Some(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": match content {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }
                })),
                _ => None,
            })
            .collect(),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request);
        let builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body);

        let mut source =
            EventSource::new(builder).map_err(|e| LlmError::EventSource(format!("Cannot build request: {}", e)))?;
        source.set_retry_policy(Box::new(Never));

        let mut parser = StreamParser::new();

        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => log::debug!("Model stream opened"),
                Ok(Event::Message(message)) => {
                    if message.data.trim() == "[DONE]" {
                        break;
                    }
                    let Some(chunk) = parse_sse_data(&message.data) else {
                        log::warn!("Skipping unparsable model chunk");
                        continue;
                    };
                    if let Some(err) = chunk.get("error") {
                        source.close();
                        return Err(LlmError::InvalidResponse(err.to_string()));
                    }
                    for out in parser.process_chunk(&chunk) {
                        if chunk_tx.send(out).await.is_err() {
                            source.close();
                            return Err(LlmError::Cancelled);
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    source.close();
                    let message = response.text().await.unwrap_or_default();
                    log::error!("Model API error {}: {}", status, message);
                    return Err(LlmError::ApiError {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(e) => {
                    source.close();
                    return Err(LlmError::EventSource(e.to_string()));
                }
            }
        }
        source.close();

        Ok(parser.finish())
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}
