//! Tools discovered on a remote hub

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::RegistrySession;
use super::protocol::McpToolInfo;
use crate::tools::{Tool, ToolError, ToolSet};

/// A hub tool exposed through the local [`Tool`] trait
pub struct RemoteTool {
    info: McpToolInfo,
    registry: String,
    session: Arc<dyn RegistrySession>,
}

impl RemoteTool {
    pub fn new(info: McpToolInfo, registry: impl Into<String>, session: Arc<dyn RegistrySession>) -> Self {
        Self {
            info,
            registry: registry.into(),
            session,
        }
    }

    /// Name of the registry this tool came from
    pub fn registry(&self) -> &str {
        &self.registry
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        self.info.description.as_deref().unwrap_or("")
    }

    fn input_schema(&self) -> Value {
        if self.info.input_schema.is_object() {
            self.info.input_schema.clone()
        } else {
            json!({"type": "object", "properties": {}})
        }
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        self.session.call_tool(&self.info.name, input).await.map_err(|e| {
            log::error!("Remote tool {} on {} failed: {}", self.info.name, self.registry, e);
            ToolError::Remote {
                registry: self.registry.clone(),
                message: e.to_string(),
            }
        })
    }
}

/// Wrap every advertised tool of one session
pub fn remote_tool_set(registry: &str, session: &Arc<dyn RegistrySession>, infos: Vec<McpToolInfo>) -> ToolSet {
    infos
        .into_iter()
        .map(|info| Arc::new(RemoteTool::new(info, registry, Arc::clone(session))) as Arc<dyn Tool>)
        .collect()
}
