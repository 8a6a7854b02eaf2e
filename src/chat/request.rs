//! Inbound chat request parsing and validation
//!
//! The body is `{messages, walletAddress?, model?}` where `messages` are UI
//! messages made of typed parts. Everything is checked before any tool
//! assembly or model call happens.

use serde_json::Value;

use crate::error::{ChatError, Result};
use crate::llm::{ContentBlock, Message, Role, ToolResult};
use crate::tools::is_address;

/// Lifecycle state of a tool part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

impl ToolState {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "input-streaming" => Some(ToolState::InputStreaming),
            "input-available" => Some(ToolState::InputAvailable),
            "output-available" => Some(ToolState::OutputAvailable),
            "output-error" => Some(ToolState::OutputError),
            _ => None,
        }
    }
}

/// A tool invocation recorded in a UI message
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolState,
    pub input: Value,
    pub output: Option<Value>,
    pub error_text: Option<String>,
}

/// One part of a UI message
#[derive(Debug, Clone, PartialEq)]
pub enum UiPart {
    Text(String),
    Reasoning(String),
    SourceUrl { url: String, title: Option<String> },
    Tool(ToolPart),
    StepStart,
    /// Files and custom data parts; carried but not sent to the model
    Other(String),
}

impl UiPart {
    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        let kind = value["type"].as_str().ok_or("part has no type")?;
        let string = |field: &str| -> std::result::Result<String, String> {
            value[field]
                .as_str()
                .map(String::from)
                .ok_or_else(|| format!("{} part requires a string {}", kind, field))
        };

        match kind {
            "text" => Ok(UiPart::Text(string("text")?)),
            "reasoning" => Ok(UiPart::Reasoning(string("text")?)),
            "source-url" => Ok(UiPart::SourceUrl {
                url: string("url")?,
                title: value["title"].as_str().map(String::from),
            }),
            "step-start" => Ok(UiPart::StepStart),
            "dynamic-tool" => Self::tool(value, string("toolName")?),
            other => match other.strip_prefix("tool-") {
                Some(name) if !name.is_empty() => Self::tool(value, name.to_string()),
                _ => Ok(UiPart::Other(other.to_string())),
            },
        }
    }

    fn tool(value: &Value, tool_name: String) -> std::result::Result<Self, String> {
        let tool_call_id = value["toolCallId"]
            .as_str()
            .filter(|id| !id.is_empty())
            .ok_or("tool part requires a toolCallId")?
            .to_string();
        let state = value["state"]
            .as_str()
            .and_then(ToolState::parse)
            .ok_or_else(|| format!("tool part {} has an unknown state", tool_call_id))?;

        Ok(UiPart::Tool(ToolPart {
            tool_call_id,
            tool_name,
            state,
            input: value.get("input").cloned().unwrap_or(Value::Null),
            output: value.get("output").cloned(),
            error_text: value["errorText"].as_str().map(String::from),
        }))
    }
}

/// A message as sent by the browser
#[derive(Debug, Clone, PartialEq)]
pub struct UiMessage {
    pub id: Option<String>,
    pub role: Role,
    pub parts: Vec<UiPart>,
}

impl UiMessage {
    fn from_value(index: usize, value: &Value) -> Result<Self> {
        let invalid = |what: String| ChatError::Validation(format!("message {} {}", index, what));

        if !value.is_object() {
            return Err(invalid("is not an object".to_string()));
        }

        let role = match value["role"].as_str() {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            Some("system") => Role::System,
            Some(other) => return Err(invalid(format!("has unsupported role {}", other))),
            None => return Err(invalid("has no role".to_string())),
        };

        let mut parts = match &value["parts"] {
            Value::Array(items) => items
                .iter()
                .map(UiPart::from_value)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(invalid)?,
            Value::Null => Vec::new(),
            _ => return Err(invalid("parts must be an array".to_string())),
        };

        // Legacy shape: a single content string
        match &value["content"] {
            Value::String(text) if parts.is_empty() => parts.push(UiPart::Text(text.clone())),
            Value::String(_) | Value::Null => {}
            _ if parts.is_empty() => return Err(invalid("content must be a string".to_string())),
            _ => {}
        }

        Ok(Self {
            id: value["id"].as_str().map(String::from),
            role,
            parts,
        })
    }

    fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                UiPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A validated chat request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<UiMessage>,
    pub wallet_address: Option<String>,
    pub model: Option<String>,
}

impl ChatRequest {
    /// Parse and validate a raw body; `allows_model` decides which models may be selected
    pub fn parse(body: &[u8], allows_model: impl Fn(&str) -> bool) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ChatError::Validation(format!("body is not valid JSON: {}", e)))?;
        if !value.is_object() {
            return Err(ChatError::Validation("body must be a JSON object".to_string()));
        }

        let messages = match &value["messages"] {
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .enumerate()
                .map(|(i, m)| UiMessage::from_value(i, m))
                .collect::<Result<Vec<_>>>()?,
            Value::Array(_) => return Err(ChatError::Validation("messages array must not be empty".to_string())),
            _ => return Err(ChatError::Validation("messages array required".to_string())),
        };

        let wallet_address = match &value["walletAddress"] {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) if is_address(s) => Some(s.clone()),
            _ => {
                return Err(ChatError::Validation(
                    "walletAddress must be a 0x-prefixed 20-byte hex address".to_string(),
                ));
            }
        };

        let model = match &value["model"] {
            Value::Null => None,
            Value::String(m) if allows_model(m) => Some(m.clone()),
            Value::String(m) => return Err(ChatError::Validation(format!("Unsupported model: {}", m))),
            _ => return Err(ChatError::Validation("model must be a string".to_string())),
        };

        Ok(Self {
            messages,
            wallet_address,
            model,
        })
    }

    /// Convert UI history to model messages
    ///
    /// Assistant messages split at `step-start`: each step yields one
    /// assistant message (text and tool uses) followed by one tool message
    /// with the results. Unfinished tool parts and reasoning are dropped.
    pub fn to_model_messages(&self) -> Vec<Message> {
        let mut out = Vec::new();
        for message in &self.messages {
            match message.role {
                Role::Assistant => push_assistant_steps(&message.parts, &mut out),
                role => {
                    let text = message.text();
                    if !text.is_empty() {
                        out.push(Message {
                            role,
                            content: vec![ContentBlock::Text { text }],
                        });
                    }
                }
            }
        }
        out
    }
}

fn push_assistant_steps(parts: &[UiPart], out: &mut Vec<Message>) {
    for step in parts.split(|p| matches!(p, UiPart::StepStart)) {
        let mut blocks = Vec::new();
        let mut results = Vec::new();

        for part in step {
            match part {
                UiPart::Text(text) if !text.is_empty() => blocks.push(ContentBlock::Text { text: text.clone() }),
                UiPart::Tool(tool) => {
                    let result = match (tool.state, &tool.output) {
                        (ToolState::OutputAvailable, Some(output)) => {
                            ToolResult::success(&tool.tool_call_id, output.clone())
                        }
                        (ToolState::OutputError, _) => ToolResult::error(
                            &tool.tool_call_id,
                            tool.error_text.clone().unwrap_or_else(|| "Tool failed".to_string()),
                        ),
                        _ => continue,
                    };
                    blocks.push(ContentBlock::ToolUse {
                        id: tool.tool_call_id.clone(),
                        name: tool.tool_name.clone(),
                        input: tool.input.clone(),
                    });
                    results.push(result.into_block());
                }
                _ => {}
            }
        }

        if !blocks.is_empty() {
            out.push(Message {
                role: Role::Assistant,
                content: blocks,
            });
        }
        if !results.is_empty() {
            out.push(Message {
                role: Role::Tool,
                content: results,
            });
        }
    }
}
