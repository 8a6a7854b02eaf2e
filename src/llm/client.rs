//! Core LLM client trait and error definitions

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::streaming::StreamChunk;
use super::types::{CompletionRequest, CompletionResponse};

/// Stateless LLM client - each call is one completion step
///
/// Chunks are pushed to `chunk_tx` as they arrive; the returned response
/// carries the step's full text and its assembled tool calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Streaming completion for one step
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;

    /// Default model name
    fn model(&self) -> &str;
}

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("Event source error: {0}")]
    EventSource(String),

    #[error("Stream consumer went away")]
    Cancelled,
}

impl LlmError {
    /// HTTP status of the failed call, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::ApiError { status, .. } => Some(*status),
            LlmError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the failure came from the consumer side
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}
