//! Remote tool registries - MCP hubs reached over Streamable HTTP
//!
//! A registry source is connected either per request (transient) or once per
//! process through [`CachedRegistry`]. Either way its failures stay inside
//! this module as [`RegistryError`]; the assembler decides to degrade.

mod cache;
mod protocol;
mod remote_tool;
mod transport;

pub use cache::{CachedLease, CachedRegistry};
pub use protocol::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpToolInfo, PROTOCOL_VERSION};
pub use remote_tool::{RemoteTool, remote_tool_set};
pub use transport::{HttpConnector, HttpSession};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Credential presented to a hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryAuth {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// A static header such as an API key
    Header { name: String, value: String },
    None,
}

/// Errors talking to a remote registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry returned status {status}")]
    Status { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl From<JsonRpcError> for RegistryError {
    fn from(e: JsonRpcError) -> Self {
        RegistryError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// A live session with one hub
#[async_trait]
pub trait RegistrySession: Send + Sync {
    /// All tools the hub advertises
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, RegistryError>;

    /// Invoke a tool; the hub's result is returned as is
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, RegistryError>;

    /// End the session; safe to call more than once
    async fn close(&self);
}

/// Opens sessions with one hub
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    async fn connect(&self, auth: &RegistryAuth) -> Result<Arc<dyn RegistrySession>, RegistryError>;
}
