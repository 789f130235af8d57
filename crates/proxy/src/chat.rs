//! Chat completions handler.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderName, header},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt as _;
use kimi_bridge_types::{ChatRequest, traits::ProviderResponse};
use std::sync::Arc;

use crate::{AppState, bearer::RefreshToken, error::ApiError};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Handles `POST /v1/chat/completions` requests.
///
/// Returns either a complete JSON response or an SSE stream, depending on
/// `stream` in the request body.
///
/// # Errors
///
/// Returns [`ApiError`] if no refresh token was supplied or every attempt
/// against the upstream failed.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    RefreshToken(refresh_token): RefreshToken,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    tracing::info!(
        model = %request.model,
        stream = request.stream,
        messages = request.messages.len(),
        "chat completion request"
    );

    match state.completions.chat_completion(&request, &refresh_token).await? {
        ProviderResponse::Complete(json) => Ok(Json(json).into_response()),
        ProviderResponse::Stream(byte_stream) => {
            let body = Body::from_stream(byte_stream.map_err(|e| std::io::Error::other(e.to_string())));
            Ok((
                [
                    (header::CONTENT_TYPE, "text/event-stream"),
                    (header::CACHE_CONTROL, "no-cache"),
                    (X_ACCEL_BUFFERING, "no"),
                ],
                body,
            )
                .into_response())
        }
    }
}
