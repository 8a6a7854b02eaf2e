//! The chat orchestration loop
//!
//! Drives the model step by step, forwards its output as UI stream events,
//! executes requested tools, and feeds their results back until the model
//! stops calling tools or the step limit is reached.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;

use super::events::ChatEvent;
use crate::assembler::LeaseGuard;
use crate::error::{ChatError, Result};
use crate::id::{generate_message_id, generate_part_id};
use crate::llm::{
    CompletionRequest, CompletionResponse, ContentBlock, LlmClient, Message, Role, StreamChunk, ToolCall, ToolResult,
};
use crate::tools::{ToolError, ToolSet, validate_tool_input};

/// Buffer between the model stream and the event forwarder
const CHUNK_BUFFER: usize = 64;

/// Build the system instruction for one request
pub fn system_prompt(wallet_address: Option<&str>) -> String {
    let wallet = match wallet_address {
        Some(address) => format!("The user's connected wallet address is {}.", address),
        None => "The user has not connected a wallet yet; ask them to connect one before preparing transactions."
            .to_string(),
    };
    format!(
        "You are a helpful assistant for token swaps and on-chain wallet analytics. {} \
         Amounts are integer strings in the token's smallest unit. When you prepare a transaction, \
         return its payload for the user to review and sign; never claim a transaction was sent.",
        wallet
    )
}

/// Everything the loop needs for one request
pub struct ChatTurn {
    pub system: String,
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub tools: ToolSet,
}

/// Emits events to the client
///
/// `start` goes out ahead of the first event. Deferred events are held back
/// until something else is sent, so a failure before the model produced any
/// output leaves the stream untouched.
pub struct EventSink {
    tx: mpsc::Sender<ChatEvent>,
    message_id: String,
    pending: Vec<ChatEvent>,
    started: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            tx,
            message_id: generate_message_id(),
            pending: Vec::new(),
            started: false,
        }
    }

    /// Whether any event has reached the client channel
    pub fn started(&self) -> bool {
        self.started
    }

    /// Hold an event until the next send or flush
    pub fn defer(&mut self, event: ChatEvent) {
        self.pending.push(event);
    }

    /// Send the held events
    pub async fn flush(&mut self) -> Result<()> {
        if !self.started {
            self.started = true;
            let start = ChatEvent::Start {
                message_id: self.message_id.clone(),
            };
            self.emit(start).await?;
        }
        for event in std::mem::take(&mut self.pending) {
            self.emit(event).await?;
        }
        Ok(())
    }

    pub async fn send(&mut self, event: ChatEvent) -> Result<()> {
        self.flush().await?;
        self.emit(event).await
    }

    /// Drop held events without sending them
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    async fn emit(&self, event: ChatEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| ChatError::ClientDisconnected)
    }
}

/// Open text and reasoning parts of the current step
#[derive(Default)]
struct StepParts {
    text_id: Option<String>,
    reasoning_id: Option<String>,
}

impl StepParts {
    async fn forward(&mut self, chunk: StreamChunk, sink: &mut EventSink) -> Result<()> {
        match chunk {
            StreamChunk::Text(delta) => {
                let id = match &self.text_id {
                    Some(id) => id.clone(),
                    None => {
                        let id = generate_part_id("txt");
                        sink.send(ChatEvent::TextStart { id: id.clone() }).await?;
                        self.text_id = Some(id.clone());
                        id
                    }
                };
                sink.send(ChatEvent::TextDelta { id, delta }).await
            }
            StreamChunk::Reasoning(delta) => {
                let id = match &self.reasoning_id {
                    Some(id) => id.clone(),
                    None => {
                        let id = generate_part_id("rsn");
                        sink.send(ChatEvent::ReasoningStart { id: id.clone() }).await?;
                        self.reasoning_id = Some(id.clone());
                        id
                    }
                };
                sink.send(ChatEvent::ReasoningDelta { id, delta }).await
            }
            StreamChunk::Source { url, title } => {
                sink.send(ChatEvent::SourceUrl {
                    source_id: generate_part_id("src"),
                    url,
                    title,
                })
                .await
            }
            StreamChunk::ToolCall { id, name } => {
                sink.send(ChatEvent::ToolInputStart {
                    tool_call_id: id,
                    tool_name: name,
                })
                .await
            }
            StreamChunk::ToolInput { id, input_delta } => {
                sink.send(ChatEvent::ToolInputDelta {
                    tool_call_id: id,
                    input_text_delta: input_delta,
                })
                .await
            }
        }
    }

    async fn close(&mut self, sink: &mut EventSink) -> Result<()> {
        if let Some(id) = self.reasoning_id.take() {
            sink.send(ChatEvent::ReasoningEnd { id }).await?;
        }
        if let Some(id) = self.text_id.take() {
            sink.send(ChatEvent::TextEnd { id }).await?;
        }
        Ok(())
    }
}

/// Resolve, validate and run one tool call
async fn execute_call(tools: &ToolSet, call: &ToolCall) -> std::result::Result<Value, ToolError> {
    let tool = tools.get(&call.name).ok_or_else(|| ToolError::NotFound {
        name: call.name.clone(),
    })?;
    validate_tool_input(call, &tool.input_schema())?;
    tool.execute(call.input.clone()).await
}

/// Runs chat turns against one model client
pub struct ChatOrchestrator {
    llm: Arc<dyn LlmClient>,
    max_steps: usize,
    max_tokens: u32,
    max_duration: Duration,
}

impl ChatOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, max_steps: usize, max_tokens: u32, max_duration: Duration) -> Self {
        Self {
            llm,
            max_steps: max_steps.max(1),
            max_tokens,
            max_duration,
        }
    }

    /// Run a turn to completion, then release its leases and emit the terminal event
    ///
    /// Returns the failure when it happened before anything was streamed, so
    /// the caller can answer with a plain error response instead.
    pub async fn handle(&self, turn: ChatTurn, leases: LeaseGuard, tx: mpsc::Sender<ChatEvent>) -> Result<()> {
        let mut sink = EventSink::new(tx);

        let outcome = match tokio::time::timeout(self.max_duration, self.run(turn, &mut sink)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ChatError::Timeout(self.max_duration)),
        };

        leases.release().await;

        match outcome {
            Ok(()) => {
                // Client may be gone already; nothing left to clean up
                let _ = sink.send(ChatEvent::Finish).await;
                Ok(())
            }
            Err(ChatError::ClientDisconnected) => {
                log::info!("Client disconnected mid-stream");
                Err(ChatError::ClientDisconnected)
            }
            Err(e) if sink.started() => {
                log::error!("Chat failed mid-stream: {}", e);
                // Only the failed step's start-step can still be held; drop it
                sink.discard();
                let _ = sink
                    .send(ChatEvent::Error {
                        error_text: e.client_message(),
                    })
                    .await;
                Err(e)
            }
            Err(e) => {
                log::error!("Chat failed before streaming: {}", e);
                Err(e)
            }
        }
    }

    /// The step loop
    pub async fn run(&self, turn: ChatTurn, sink: &mut EventSink) -> Result<()> {
        let ChatTurn {
            system,
            mut messages,
            model,
            tools,
        } = turn;
        let definitions = tools.definitions();

        for step in 1..=self.max_steps {
            let request = CompletionRequest::new(system.clone())
                .with_messages(messages.clone())
                .with_tools(definitions.clone())
                .with_max_tokens(self.max_tokens)
                .with_model(model.clone());

            let response = self.stream_step(request, sink).await?;
            log::debug!(
                "Step {} finished: {:?}, {} tool calls, {} tokens",
                step,
                response.stop_reason,
                response.tool_calls.len(),
                response.usage.total()
            );

            if response.tool_calls.is_empty() {
                sink.send(ChatEvent::FinishStep).await?;
                return Ok(());
            }

            let results = self.run_tools(&tools, &response.tool_calls, sink).await?;
            sink.send(ChatEvent::FinishStep).await?;

            let mut assistant = Vec::new();
            if !response.content.is_empty() {
                assistant.push(ContentBlock::Text {
                    text: response.content.clone(),
                });
            }
            assistant.extend(response.tool_calls.iter().map(|call| ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            }));
            messages.push(Message {
                role: Role::Assistant,
                content: assistant,
            });
            messages.push(Message {
                role: Role::Tool,
                content: results.into_iter().map(ToolResult::into_block).collect(),
            });
        }

        log::warn!("Stopped after {} steps with tool calls still pending", self.max_steps);
        Ok(())
    }

    /// Stream one model step to the client and return its response
    async fn stream_step(&self, request: CompletionRequest, sink: &mut EventSink) -> Result<CompletionResponse> {
        sink.defer(ChatEvent::StartStep);

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let mut parts = StepParts::default();

        let forward = {
            let sink = &mut *sink;
            let parts = &mut parts;
            async move {
                let mut chunk_rx = chunk_rx;
                while let Some(chunk) = chunk_rx.recv().await {
                    parts.forward(chunk, sink).await?;
                }
                Ok::<(), ChatError>(())
            }
        };

        // A failed forward drops the receiver, which cancels the model stream
        let (response, forwarded) = tokio::join!(self.llm.stream(request, chunk_tx), forward);
        forwarded?;
        let response = response?;

        sink.flush().await?;
        parts.close(sink).await?;
        Ok(response)
    }

    /// Execute one step's tool calls concurrently and emit outputs in call order
    async fn run_tools(&self, tools: &ToolSet, calls: &[ToolCall], sink: &mut EventSink) -> Result<Vec<ToolResult>> {
        for call in calls {
            sink.send(ChatEvent::ToolInputAvailable {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                input: call.input.clone(),
            })
            .await?;
        }

        let outcomes = join_all(calls.iter().map(|call| execute_call(tools, call))).await;

        let mut results = Vec::with_capacity(calls.len());
        for (call, outcome) in calls.iter().zip(outcomes) {
            match outcome {
                Ok(output) => {
                    log::info!("Tool {} ({}) succeeded", call.name, call.id);
                    sink.send(ChatEvent::ToolOutputAvailable {
                        tool_call_id: call.id.clone(),
                        output: output.clone(),
                    })
                    .await?;
                    results.push(ToolResult::success(&call.id, output));
                }
                Err(e) => {
                    log::warn!("Tool {} ({}) failed: {}", call.name, call.id, e);
                    let error_text = e.client_message();
                    sink.send(ChatEvent::ToolOutputError {
                        tool_call_id: call.id.clone(),
                        error_text: error_text.clone(),
                    })
                    .await?;
                    results.push(ToolResult::error(&call.id, error_text));
                }
            }
        }
        Ok(results)
    }
}
