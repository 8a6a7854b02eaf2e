//! Session resolution for inbound requests

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::AppState;
use super::error::ApiError;
use crate::identity::Session;

/// The session resolved for a request, if any
#[derive(Debug, Clone, Default)]
pub struct CallerSession(pub Option<Session>);

/// Resolve the caller's session and reject anonymous callers when a session is required
pub async fn resolve_session(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Response {
    let session = state.identity.current_session(request.headers()).await;

    if session.is_none() && state.require_session {
        log::debug!("Rejecting {} without a session", request.uri().path());
        return ApiError::unauthorized().into_response();
    }

    request.extensions_mut().insert(CallerSession(session));
    next.run(request).await
}
