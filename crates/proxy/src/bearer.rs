//! Refresh-token extraction from the `Authorization` header.
//!
//! Clients pass one or more refresh tokens as `Bearer tok1,tok2,...`; each
//! request uses one of them at random.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use kimi_bridge_types::BridgeError;
use rand::seq::SliceRandom as _;

use crate::error::ApiError;

/// Splits an `Authorization` header value into its refresh tokens.
#[must_use]
pub fn split_tokens(header: &str) -> Vec<&str> {
    let value = header.trim();
    let value = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value);
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

/// A refresh token chosen from the request's bearer list.
#[derive(Debug, Clone)]
pub struct RefreshToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for RefreshToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let tokens = split_tokens(header);
        tokens
            .choose(&mut rand::thread_rng())
            .map(|t| Self((*t).to_string()))
            .ok_or(ApiError(BridgeError::AuthInvalid))
    }
}
