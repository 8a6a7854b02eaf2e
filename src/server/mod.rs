//! HTTP surface - router, shared state, and the serve loop

mod auth;
mod chat;
mod error;

pub use auth::{CallerSession, resolve_session};
pub use chat::{HealthResponse, chat_handler, health_handler};
pub use error::ApiError;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use eyre::{Context, Result, eyre};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::assembler::ToolSetAssembler;
use crate::chat::ChatOrchestrator;
use crate::config::{Config, Credentials, LlmConfig};
use crate::identity::{BearerIdentity, IdentityProvider};
use crate::llm::{LlmClient, OpenAiClient, OpenAiConfig};

/// State shared by all handlers
pub struct AppState {
    pub assembler: Arc<ToolSetAssembler>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Model selection rules for incoming requests
    pub models: LlmConfig,
    pub require_session: bool,
}

impl AppState {
    pub fn new(
        config: &Config,
        assembler: ToolSetAssembler,
        llm: Arc<dyn LlmClient>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let orchestrator = ChatOrchestrator::new(
            llm,
            config.llm.max_steps,
            config.llm.max_tokens,
            Duration::from_secs(config.server.max_duration_secs),
        );
        Self {
            assembler: Arc::new(assembler),
            orchestrator: Arc::new(orchestrator),
            identity,
            models: config.llm.clone(),
            require_session: config.server.require_session,
        }
    }

    /// Wire the production collaborators described by `config`
    pub fn from_config(config: &Config, credentials: &Credentials) -> Result<Self> {
        let api_key = credentials
            .llm_api_key
            .clone()
            .ok_or_else(|| eyre!("{} is not set", config.llm.api_key_env))?;
        let llm = OpenAiClient::with_api_key(
            api_key,
            OpenAiConfig {
                base_url: config.llm.base_url.clone(),
                model: config.llm.model.clone(),
                max_tokens: config.llm.max_tokens,
                timeout: Duration::from_millis(config.llm.timeout_ms),
            },
        )
        .context("Failed to create language model client")?;

        let assembler = ToolSetAssembler::from_config(config, credentials).context("Failed to build tool sources")?;

        Ok(Self::new(
            config,
            assembler,
            Arc::new(llm),
            Arc::new(BearerIdentity::new()),
        ))
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let chat = Router::new()
        .route("/api/chat", post(chat_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_session));

    Router::new()
        .route("/health", get(health_handler))
        .merge(chat)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until ctrl-c, then close cached registry sessions
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    log::info!("Shutting down; closing registry sessions");
    state.assembler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
