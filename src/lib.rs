//! Swapchat - a tool-augmented chat server
//!
//! Streams model output to a chat client while the model calls tools: direct
//! 1inch swap adapters and tools discovered on remote MCP hubs. Each request
//! gets its own tool set, assembled from every available source.

pub mod assembler;
pub mod chat;
pub mod config;
pub mod error;
pub mod id;
pub mod identity;
pub mod llm;
pub mod registry;
pub mod server;
pub mod tools;

pub use error::{ChatError, Result};
