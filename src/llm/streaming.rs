//! Streaming support for LLM responses.
//!
//! Provides the chunk type pushed to consumers while a completion step is in
//! flight and the parser that turns OpenAI
//! `chat.completion.chunk` payloads into chunks and a final response.

use serde_json::Value;

use crate::id::generate_part_id;

use super::types::{CompletionResponse, StopReason, ToolCall, Usage};

/// Chunk types emitted to consumers during streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text content delta
    Text(String),
    /// Reasoning content delta
    Reasoning(String),
    /// A cited source
    Source {
        /// Source URL
        url: String,
        /// Optional title
        title: Option<String>,
    },
    /// Tool call started
    ToolCall {
        /// Unique tool call ID
        id: String,
        /// Name of the tool being called
        name: String,
    },
    /// Tool input JSON delta
    ToolInput {
        /// Tool call ID this input belongs to
        id: String,
        /// Partial JSON input
        input_delta: String,
    },
}

/// Parse the data field of one SSE event.
///
/// Returns `None` for the `[DONE]` sentinel, blank data and non-JSON payloads.
pub fn parse_sse_data(data: &str) -> Option<Value> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    serde_json::from_str(data).ok()
}

/// A tool call whose arguments are still arriving
#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// State tracker for parsing streaming responses.
#[derive(Debug, Default)]
pub struct StreamParser {
    /// Accumulated text content
    pub text_content: String,
    /// Tool calls keyed by their stream index
    tool_calls: Vec<(u64, PartialToolCall)>,
    /// Finish reason, once seen
    pub finish_reason: Option<StopReason>,
    /// Usage, if the provider reported it
    pub usage: Usage,
}

impl StreamParser {
    /// Create a new stream parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one `chat.completion.chunk` and emit chunks.
    pub fn process_chunk(&mut self, chunk: &Value) -> Vec<StreamChunk> {
        let mut out = Vec::new();

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            self.usage = Usage::new(
                usage["prompt_tokens"].as_u64().unwrap_or(0),
                usage["completion_tokens"].as_u64().unwrap_or(0),
            );
        }

        let Some(choice) = chunk["choices"].as_array().and_then(|c| c.first()) else {
            return out;
        };
        let delta = &choice["delta"];

        let reasoning = delta["reasoning_content"].as_str().or_else(|| delta["reasoning"].as_str());
        if let Some(r) = reasoning.filter(|r| !r.is_empty()) {
            out.push(StreamChunk::Reasoning(r.to_string()));
        }

        if let Some(text) = delta["content"].as_str().filter(|t| !t.is_empty()) {
            self.text_content.push_str(text);
            out.push(StreamChunk::Text(text.to_string()));
        }

        if let Some(annotations) = delta["annotations"].as_array() {
            for annotation in annotations {
                let citation = &annotation["url_citation"];
                if let Some(url) = citation["url"].as_str() {
                    out.push(StreamChunk::Source {
                        url: url.to_string(),
                        title: citation["title"].as_str().map(String::from),
                    });
                }
            }
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                out.extend(self.process_tool_call_delta(call));
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(StopReason::from_openai(reason));
        }

        out
    }

    fn process_tool_call_delta(&mut self, call: &Value) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        let index = call["index"].as_u64().unwrap_or(self.tool_calls.len() as u64);
        let function = &call["function"];

        let position = match self.tool_calls.iter().position(|(i, _)| *i == index) {
            Some(pos) => pos,
            None => {
                let id = match call["id"].as_str().filter(|id| !id.is_empty()) {
                    Some(id) => id.to_string(),
                    None => generate_part_id("call"),
                };
                let partial = PartialToolCall {
                    id,
                    name: function["name"].as_str().unwrap_or_default().to_string(),
                    arguments: String::new(),
                };
                out.push(StreamChunk::ToolCall {
                    id: partial.id.clone(),
                    name: partial.name.clone(),
                });
                self.tool_calls.push((index, partial));
                self.tool_calls.len() - 1
            }
        };

        let partial = &mut self.tool_calls[position].1;
        if let Some(args) = function["arguments"].as_str().filter(|a| !a.is_empty()) {
            partial.arguments.push_str(args);
            out.push(StreamChunk::ToolInput {
                id: partial.id.clone(),
                input_delta: args.to_string(),
            });
        }

        out
    }

    /// Finish the step and build the response.
    ///
    /// Arguments that are not valid JSON are kept as a raw string so that
    /// input validation rejects them per call instead of failing the step.
    pub fn finish(self) -> CompletionResponse {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .map(|(_, partial)| {
                let input = if partial.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&partial.arguments).unwrap_or(Value::String(partial.arguments))
                };
                ToolCall::new(partial.id, partial.name, input)
            })
            .collect();

        let stop_reason = match self.finish_reason {
            Some(reason) => reason,
            None if !tool_calls.is_empty() => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };

        CompletionResponse {
            content: self.text_content,
            tool_calls,
            stop_reason,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(delta: Value) -> Value {
        json!({"choices": [{"index": 0, "delta": delta, "finish_reason": null}]})
    }

    #[test]
    fn test_text_delta() {
        let mut parser = StreamParser::new();
        let chunks = parser.process_chunk(&delta(json!({"content": "Hello"})));

        assert_eq!(chunks, vec![StreamChunk::Text("Hello".to_string())]);
        assert_eq!(parser.text_content, "Hello");
    }

    #[test]
    fn test_empty_content_emits_nothing() {
        let mut parser = StreamParser::new();
        let chunks = parser.process_chunk(&delta(json!({"role": "assistant", "content": ""})));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_reasoning_delta() {
        let mut parser = StreamParser::new();
        let chunks = parser.process_chunk(&delta(json!({"reasoning_content": "thinking"})));
        assert_eq!(chunks, vec![StreamChunk::Reasoning("thinking".to_string())]);
        assert!(parser.text_content.is_empty());
    }

    #[test]
    fn test_url_citation_becomes_source() {
        let mut parser = StreamParser::new();
        let chunks = parser.process_chunk(&delta(json!({
            "annotations": [{"type": "url_citation", "url_citation": {"url": "https://1inch.io", "title": "1inch"}}]
        })));
        assert_eq!(
            chunks,
            vec![StreamChunk::Source {
                url: "https://1inch.io".to_string(),
                title: Some("1inch".to_string()),
            }]
        );
    }

    #[test]
    fn test_tool_call_accumulates_arguments() {
        let mut parser = StreamParser::new();

        let start = parser.process_chunk(&delta(json!({
            "tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                "function": {"name": "getQuote", "arguments": ""}}]
        })));
        assert_eq!(
            start,
            vec![StreamChunk::ToolCall {
                id: "call_1".to_string(),
                name: "getQuote".to_string(),
            }]
        );

        let input = parser.process_chunk(&delta(json!({
            "tool_calls": [{"index": 0, "function": {"arguments": "{\"amount\":"}}]
        })));
        assert_eq!(
            input,
            vec![StreamChunk::ToolInput {
                id: "call_1".to_string(),
                input_delta: "{\"amount\":".to_string(),
            }]
        );

        parser.process_chunk(&delta(json!({
            "tool_calls": [{"index": 0, "function": {"arguments": "\"100\"}"}}]
        })));
        parser.process_chunk(&json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}));

        let response = parser.finish();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].input, json!({"amount": "100"}));
    }

    #[test]
    fn test_parallel_tool_calls_keep_order() {
        let mut parser = StreamParser::new();
        parser.process_chunk(&delta(json!({
            "tool_calls": [
                {"index": 0, "id": "a", "function": {"name": "first", "arguments": "{}"}},
                {"index": 1, "id": "b", "function": {"name": "second", "arguments": "{}"}}
            ]
        })));

        let response = parser.finish();
        let names: Vec<_> = response.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_invalid_arguments_kept_raw() {
        let mut parser = StreamParser::new();
        parser.process_chunk(&delta(json!({
            "tool_calls": [{"index": 0, "id": "a", "function": {"name": "x", "arguments": "{broken"}}]
        })));
        let response = parser.finish();
        assert_eq!(response.tool_calls[0].input, json!("{broken"));
    }

    #[test]
    fn test_usage_chunk() {
        let mut parser = StreamParser::new();
        parser.process_chunk(&json!({"choices": [], "usage": {"prompt_tokens": 12, "completion_tokens": 3}}));
        assert_eq!(parser.usage, Usage::new(12, 3));
    }

    #[test]
    fn test_finish_without_reason_defaults_to_end_turn() {
        let mut parser = StreamParser::new();
        parser.process_chunk(&delta(json!({"content": "done"})));
        let response = parser.finish();
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.content, "done");
    }

    #[test]
    fn test_parse_sse_data() {
        assert_eq!(parse_sse_data("[DONE]"), None);
        assert_eq!(parse_sse_data(""), None);
        assert_eq!(parse_sse_data("not json"), None);
        assert_eq!(parse_sse_data("{\"a\":1}"), Some(json!({"a": 1})));
    }

    #[test]
    fn test_tool_call_without_id_gets_generated_id() {
        let mut parser = StreamParser::new();
        let first = parser.process_chunk(&delta(json!({
            "tool_calls": [{"index": 0, "function": {"name": "getQuote", "arguments": "{\"amount\""}}]
        })));
        let second = parser.process_chunk(&delta(json!({
            "tool_calls": [{"index": 0, "function": {"arguments": ":\"1\"}"}}]
        })));

        let StreamChunk::ToolCall { id, name } = &first[0] else {
            panic!("expected tool call chunk, got {:?}", first[0]);
        };
        assert!(id.starts_with("call"));
        assert!(id.len() > "call".len());
        assert_eq!(name, "getQuote");
        assert!(matches!(&second[0], StreamChunk::ToolInput { id: input_id, .. } if input_id == id));

        let response = parser.finish();
        assert_eq!(&response.tool_calls[0].id, id);
        assert_eq!(response.tool_calls[0].input, json!({"amount": "1"}));
    }

    #[test]
    fn test_unnamed_calls_get_distinct_ids() {
        let mut parser = StreamParser::new();
        parser.process_chunk(&delta(json!({
            "tool_calls": [
                {"index": 0, "id": "", "function": {"name": "a"}},
                {"index": 1, "function": {"name": "b"}}
            ]
        })));
        let response = parser.finish();
        assert_ne!(response.tool_calls[0].id, response.tool_calls[1].id);
        assert!(!response.tool_calls[0].id.is_empty());
    }
}
