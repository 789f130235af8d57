//! API error type that maps [`BridgeError`] variants to HTTP status codes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kimi_bridge_types::BridgeError;
use serde_json::json;

/// Wrapper around [`BridgeError`] that implements [`IntoResponse`].
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl ApiError {
    /// Returns `(status, error_type, error_code)` for the wrapped error.
    fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match &self.0 {
            BridgeError::AuthInvalid => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_api_key",
            ),
            BridgeError::StreamBusy => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "stream_in_progress",
            ),
            BridgeError::FileInvalid(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_file",
            ),
            BridgeError::FileTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "invalid_request_error",
                "file_too_large",
            ),
            BridgeError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
            ),
            BridgeError::RequestFailed(_) | BridgeError::Http(_) => {
                (StatusCode::BAD_GATEWAY, "server_error", "upstream_error")
            }
            BridgeError::StreamMalformed(_) => (
                StatusCode::BAD_GATEWAY,
                "server_error",
                "malformed_upstream_response",
            ),
            BridgeError::Serialization(_) | BridgeError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, error_code) = self.classify();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        let msg = self.0.to_string();
        (
            status,
            Json(json!({
                "error": {
                    "message": msg,
                    "type": error_type,
                    "code": error_code,
                }
            })),
        )
            .into_response()
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}
