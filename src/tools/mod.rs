//! Tool system - callable tools, the per-request tool set, and the 1inch adapters
//!
//! A tool is anything the model can call by name: a direct REST adapter or a
//! tool discovered on a remote MCP hub. Both sit behind the same trait so the
//! chat loop never knows where a tool came from.

mod amount;
mod oneinch;
mod set;
mod validate;

pub use amount::{Amount, AmountError};
pub use oneinch::{OneInchClient, SwapParams, SwapTool, SwapToolKind, TransactionPayload, is_address};
pub use set::ToolSet;
pub use validate::validate_tool_input;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ToolDefinition;

/// A tool that can be called by the LLM
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the model's tool call name)
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, input: Value) -> Result<Value, ToolError>;

    /// Definition handed to the model
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.input_schema())
    }
}

/// Errors local to one tool call; surfaced as an output error, never a request failure
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input for {tool}: {message}")]
    Validation { tool: String, message: String },

    #[error("{service} request failed: {message}")]
    Upstream {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Remote tool {registry} failed: {message}")]
    Remote { registry: String, message: String },
}

impl ToolError {
    pub fn validation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Text put into a tool output error event
    ///
    /// Upstream failures report only service and status; the body stays in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ToolError::Upstream { service, status, .. } => match status {
                Some(status) => format!("{} request failed with status {}", service, status),
                None => format!("{} request failed", service),
            },
            ToolError::Remote { registry, .. } => format!("Remote tool call to {} failed", registry),
            other => other.to_string(),
        }
    }
}
