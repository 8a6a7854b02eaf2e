//! Chat and health handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::AppState;
use super::auth::CallerSession;
use super::error::ApiError;
use crate::assembler::RequestContext;
use crate::chat::{ChatEvent, ChatRequest, ChatTurn, DONE, STREAM_PROTOCOL_HEADER, STREAM_PROTOCOL_VERSION, system_prompt};

/// Events buffered between the chat task and the response body
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Tools available without contacting any registry
    pub tools: Vec<String>,
    pub registries: Vec<String>,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tools: state.assembler.direct_tools().names().into_iter().map(String::from).collect(),
        registries: state.assembler.source_names().into_iter().map(String::from).collect(),
    })
}

/// POST /api/chat
///
/// Validation and the wait for the first event happen before any header is
/// sent, so failures up to that point are answered with `{error}`. After
/// that the stream itself carries the terminal `finish` or `error` event.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(CallerSession(session)): Extension<CallerSession>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = ChatRequest::parse(&body, |model| state.models.allows(model))?;
    log::info!(
        "Chat request: {} messages, wallet {}",
        request.messages.len(),
        request.wallet_address.as_deref().unwrap_or("none")
    );

    let ctx = RequestContext {
        session,
        wallet_address: request.wallet_address.clone(),
    };
    let (tools, leases) = state.assembler.assemble(&ctx).await.into_parts();
    log::debug!("Assembled {} tools for request", tools.len());

    let turn = ChatTurn {
        system: system_prompt(ctx.wallet_address.as_deref()),
        messages: request.to_model_messages(),
        model: request.model,
        tools,
    };

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.handle(turn, leases, tx).await });

    let first = match rx.recv().await {
        Some(event) => event,
        None => {
            return match task.await {
                Ok(Err(e)) => Err(e.into()),
                Ok(Ok(())) => Err(ApiError::internal("Chat ended without output")),
                Err(e) => {
                    log::error!("Chat task panicked: {}", e);
                    Err(ApiError::internal("Failed to process request"))
                }
            };
        }
    };

    Ok(stream_response(first, rx))
}

/// Build the SSE response from the first event and the rest of the channel
fn stream_response(first: ChatEvent, rx: mpsc::Receiver<ChatEvent>) -> Response {
    let events = tokio_stream::once(first)
        .chain(ReceiverStream::new(rx))
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_data())))
        .chain(tokio_stream::once(Ok(Event::default().data(DONE))));

    (
        [(
            HeaderName::from_static(STREAM_PROTOCOL_HEADER),
            HeaderValue::from_static(STREAM_PROTOCOL_VERSION),
        )],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}
