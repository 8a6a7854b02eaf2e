//! Chat turn handling - request parsing, the step loop, and the UI event stream

mod events;
mod orchestrator;
mod request;

pub use events::{ChatEvent, DONE, STREAM_PROTOCOL_HEADER, STREAM_PROTOCOL_VERSION};
pub use orchestrator::{ChatOrchestrator, ChatTurn, EventSink, system_prompt};
pub use request::{ChatRequest, ToolPart, ToolState, UiMessage, UiPart};
