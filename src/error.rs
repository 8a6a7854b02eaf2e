//! Error types for swapchat
//!
//! Request-level failures live here. Failures local to a single tool call are
//! `ToolError`s (see `tools`) and never escalate to a request failure.

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// All request-level errors that can occur while serving a chat
#[derive(Debug, Error)]
pub enum ChatError {
    /// Bad caller input (400)
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A remote tool source could not be reached; folded into "zero tools"
    #[error("Registry {source_name} unavailable: {reason}")]
    RegistryUnavailable { source_name: String, reason: String },

    /// The model-completion call itself failed
    #[error("Engine failure: {0}")]
    Engine(#[from] LlmError),

    /// The request ran past its wall-clock ceiling
    #[error("Request exceeded {0:?}")]
    Timeout(Duration),

    /// The client went away mid-stream
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

impl ChatError {
    /// Whether this error is the caller's fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::Validation(_))
    }

    /// Message safe to show a client; upstream bodies stay in the logs
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Validation(_) => self.to_string(),
            ChatError::Engine(e) => match e.status() {
                Some(status) => format!("Language model request failed with status {}", status),
                None => "Language model request failed".to_string(),
            },
            ChatError::Timeout(limit) => format!("Request exceeded {}s limit", limit.as_secs()),
            ChatError::RegistryUnavailable { source_name, .. } => {
                format!("Tool source {} is unavailable", source_name)
            }
            _ => "Failed to process request".to_string(),
        }
    }
}

/// Result type alias for swapchat operations
pub type Result<T> = std::result::Result<T, ChatError>;
