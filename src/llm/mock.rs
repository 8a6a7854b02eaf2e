//! Scripted LLM client for tests and offline runs

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::client::{LlmClient, LlmError};
use super::streaming::StreamChunk;
use super::types::{CompletionRequest, CompletionResponse, ToolCall};

/// One scripted completion step
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Stream the chunks, then return the response
    Respond {
        chunks: Vec<StreamChunk>,
        response: CompletionResponse,
    },
    /// Stream the chunks, then fail with an API error
    Fail { chunks: Vec<StreamChunk>, status: u16 },
    /// Never finish
    Hang,
}

impl MockStep {
    /// A step that streams `text` and ends the turn
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::Respond {
            chunks: vec![StreamChunk::Text(text.clone())],
            response: CompletionResponse::text(text),
        }
    }

    /// A step that requests the given tool calls
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        let mut chunks = Vec::new();
        for call in &calls {
            chunks.push(StreamChunk::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
            });
            chunks.push(StreamChunk::ToolInput {
                id: call.id.clone(),
                input_delta: call.input.to_string(),
            });
        }
        Self::Respond {
            chunks,
            response: CompletionResponse::tool_use(calls),
        }
    }

    /// A step that fails before producing output
    pub fn fail(status: u16) -> Self {
        Self::Fail {
            chunks: Vec::new(),
            status,
        }
    }

    /// A step that streams some text and then fails
    pub fn fail_after_text(text: impl Into<String>, status: u16) -> Self {
        Self::Fail {
            chunks: vec![StreamChunk::Text(text.into())],
            status,
        }
    }
}

/// LLM client that replays a fixed script and records every request
#[derive(Debug, Default)]
pub struct MockLlmClient {
    steps: Mutex<VecDeque<MockStep>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of completion steps requested
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

async fn send_all(chunks: Vec<StreamChunk>, chunk_tx: &mpsc::Sender<StreamChunk>) -> Result<(), LlmError> {
    for chunk in chunks {
        chunk_tx.send(chunk).await.map_err(|_| LlmError::Cancelled)?;
    }
    Ok(())
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let step = self.steps.lock().ok().and_then(|mut s| s.pop_front());

        match step {
            Some(MockStep::Respond { chunks, response }) => {
                send_all(chunks, &chunk_tx).await?;
                Ok(response)
            }
            Some(MockStep::Fail { chunks, status }) => {
                send_all(chunks, &chunk_tx).await?;
                Err(LlmError::ApiError {
                    status,
                    message: "scripted failure".to_string(),
                })
            }
            Some(MockStep::Hang) => {
                std::future::pending::<()>().await;
                Err(LlmError::Cancelled)
            }
            None => Err(LlmError::InvalidResponse("mock script exhausted".to_string())),
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use serde_json::json;

    #[tokio::test]
    async fn test_text_step_streams_and_returns() {
        let client = MockLlmClient::new(vec![MockStep::text("hello")]);
        let (tx, mut rx) = mpsc::channel(8);

        let response = client.stream(CompletionRequest::new("sys"), tx).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(rx.recv().await, Some(StreamChunk::Text("hello".to_string())));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_call_step() {
        let call = ToolCall::new("c1", "getQuote", json!({"amount": "1"}));
        let client = MockLlmClient::new(vec![MockStep::tool_calls(vec![call])]);
        let (tx, mut rx) = mpsc::channel(8);

        let response = client.stream(CompletionRequest::new("sys"), tx).await.unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert!(matches!(rx.recv().await, Some(StreamChunk::ToolCall { .. })));
        assert!(matches!(rx.recv().await, Some(StreamChunk::ToolInput { .. })));
    }

    #[tokio::test]
    async fn test_fail_step() {
        let client = MockLlmClient::new(vec![MockStep::fail(503)]);
        let (tx, _rx) = mpsc::channel(8);
        let err = client.stream(CompletionRequest::new("sys"), tx).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels() {
        let client = MockLlmClient::new(vec![MockStep::text("hello")]);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let err = client.stream(CompletionRequest::new("sys"), tx).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_exhausted_script() {
        let client = MockLlmClient::new(vec![]);
        let (tx, _rx) = mpsc::channel(8);
        assert!(client.stream(CompletionRequest::new("sys"), tx).await.is_err());
    }
}
