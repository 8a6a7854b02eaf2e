//! LLM Client Layer - OpenAI-compatible streaming completions
//!
//! This module provides:
//! - Message types for LLM communication
//! - LlmClient trait for API abstraction
//! - OpenAiClient implementation
//! - Streaming support
//! - A scripted client for tests

pub mod client;
pub mod mock;
pub mod openai;
pub mod streaming;
pub mod types;

pub use client::{LlmClient, LlmError};
pub use mock::{MockLlmClient, MockStep};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use streaming::{StreamChunk, StreamParser, parse_sse_data};
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, Role, StopReason, ToolCall, ToolDefinition,
    ToolResult, Usage,
};
