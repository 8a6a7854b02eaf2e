//! Events of the UI message stream
//!
//! One JSON object per SSE `data:` line; the stream ends with `data: [DONE]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header announcing the stream protocol to the client
pub const STREAM_PROTOCOL_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const STREAM_PROTOCOL_VERSION: &str = "v1";

/// Terminal SSE payload
pub const DONE: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatEvent {
    #[serde(rename_all = "camelCase")]
    Start { message_id: String },
    StartStep,
    TextStart { id: String },
    TextDelta { id: String, delta: String },
    TextEnd { id: String },
    ReasoningStart { id: String },
    ReasoningDelta { id: String, delta: String },
    ReasoningEnd { id: String },
    #[serde(rename_all = "camelCase")]
    SourceUrl {
        source_id: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        title: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolInputStart { tool_call_id: String, tool_name: String },
    #[serde(rename_all = "camelCase")]
    ToolInputDelta { tool_call_id: String, input_text_delta: String },
    #[serde(rename_all = "camelCase")]
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolOutputAvailable { tool_call_id: String, output: Value },
    #[serde(rename_all = "camelCase")]
    ToolOutputError { tool_call_id: String, error_text: String },
    FinishStep,
    Finish,
    #[serde(rename_all = "camelCase")]
    Error { error_text: String },
}

impl ChatEvent {
    /// Serialized `data:` payload
    pub fn to_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("Failed to serialize chat event: {}", e);
            r#"{"type":"error","errorText":"Failed to serialize event"}"#.to_string()
        })
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Finish | ChatEvent::Error { .. })
    }
}
