//! HTTP surface: the chat page, the chat WebSocket and status endpoints.

pub mod ws;

use crate::error::{ChatpilotError, Result};
use crate::state::AppState;
use axum::{extract::State, response::Html, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

pub type ApiState = Arc<AppState>;

const INDEX_HTML: &str = include_str!("index.html");

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws::ws_handler))
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active_sessions: usize,
    pub provider: String,
    pub model: String,
    pub headless: bool,
    pub version: &'static str,
}

async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let provider = state.engine.interpreter().provider();
    Json(StatusResponse {
        active_sessions: state.sessions.active_count(),
        provider: provider.name().to_string(),
        model: provider.model().to_string(),
        headless: state.config.browser.headless,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Router plus CORS and a bound on in-flight HTTP requests.
/// Chat sessions are bounded separately by `AppState::session_slots`.
/// Used by run_server and by integration tests.
pub fn app(state: ApiState) -> Router {
    use tower::limit::ConcurrencyLimitLayer;
    let max_connections = state.config.server.max_connections.max(1);
    router(state)
        .layer(ConcurrencyLimitLayer::new(max_connections))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([axum::http::Method::GET])
                .allow_headers([axum::http::header::CONTENT_TYPE]),
        )
}

/// Bind and serve until Ctrl-C
pub async fn run_server(state: ApiState) -> Result<()> {
    let addr = state.config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ChatpilotError::Server(format!("Failed to bind {}: {}", addr, e)))?;
    serve(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve(listener: tokio::net::TcpListener, state: ApiState) -> Result<()> {
    let local = listener.local_addr()?;
    let app = app(state);
    tracing::info!("Chatpilot listening on http://{}", local);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ChatpilotError::Server(e.to_string()))?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
