//! Refresh-token liveness check.

use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct TokenCheck {
    pub token: String,
}

/// Handles `POST /token/check` with `{ "token": "..." }`, answering `{ "live": bool }`.
///
/// # Errors
///
/// Returns [`ApiError`] only if the backend itself fails; a dead token is
/// reported as `live: false`.
pub async fn check_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenCheck>,
) -> Result<Json<Value>, ApiError> {
    let live = state.backend.token_live(body.token.trim()).await?;
    tracing::info!(live, "token checked");
    Ok(Json(json!({ "live": live })))
}
