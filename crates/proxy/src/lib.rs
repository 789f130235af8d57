//! HTTP proxy layer — axum router, route handlers, and error mapping.
//!
//! Exposes an OpenAI-compatible `/v1/chat/completions` endpoint backed by the
//! Kimi web chat, a `/v1/models` listing, and a refresh-token liveness check.

mod bearer;
mod chat;
mod error;
mod models;
mod token;

pub use bearer::{RefreshToken, split_tokens};
pub use error::ApiError;

use axum::{
    Router,
    routing::{get, post},
};
use kimi_bridge_config::Config;
use kimi_bridge_provider::{Completions, RetryPolicy};
use kimi_bridge_types::ChatBackend;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

/// Shared application state passed to all route handlers.
pub struct AppState {
    /// Upstream operations, used directly by the token check.
    pub backend: Arc<dyn ChatBackend>,
    /// Completion orchestrator wrapping the same backend.
    pub completions: Completions,
}

impl AppState {
    /// Creates a new shared application state wrapped in an `Arc`.
    ///
    /// Background cleanup is spawned on `tasks`; the caller drains it on
    /// shutdown.
    pub fn new(config: &Config, backend: Arc<dyn ChatBackend>, tasks: TaskTracker) -> Arc<Self> {
        let completions = Completions::new(
            Arc::clone(&backend),
            RetryPolicy::from(&config.retry),
            tasks,
            config.upstream.decoy_requests,
        );
        Arc::new(Self {
            backend,
            completions,
        })
    }
}

/// Build an HTTP client, optionally configured with a proxy URL.
#[must_use]
pub fn build_http_client(proxy_url: Option<&str>) -> rquest::Client {
    if let Some(url) = proxy_url {
        match rquest::Proxy::all(url) {
            Ok(proxy) => {
                return rquest::Client::builder()
                    .proxy(proxy)
                    .build()
                    .unwrap_or_else(|_| rquest::Client::new());
            }
            Err(e) => {
                tracing::warn!(url = url, error = %e, "invalid proxy_url, using direct connection");
            }
        }
    }
    rquest::Client::new()
}

/// Build the full axum router.
///
/// Routes:
/// - POST /v1/chat/completions
/// - GET  /v1/models
/// - POST /token/check
/// - GET  /ping
pub fn make_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/token/check", post(token::check_token))
        .route("/ping", get(ping))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn ping() -> &'static str {
    "pong"
}
