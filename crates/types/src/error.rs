//! Unified error type for the kimi-bridge workspace.

use thiserror::Error;

/// Enumerates all error kinds that can occur across kimi-bridge crates.
///
/// The type is `Clone` so that a single credential refresh outcome can be
/// handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// The upstream rejected the access credential, or it has expired.
    #[error("access credential rejected or expired")]
    AuthInvalid,

    /// Generic upstream rejection, carrying the upstream message.
    #[error("upstream request failed: {0}")]
    RequestFailed(String),

    /// The upstream already has a completion stream in flight for this account.
    #[error("a completion stream is already in progress for this account")]
    StreamBusy,

    /// The attachment could not be fetched or decoded.
    #[error("invalid attachment: {0}")]
    FileInvalid(String),

    /// The attachment exceeds the configured byte ceiling.
    #[error("attachment too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    /// An upstream stream event could not be decoded.
    #[error("malformed upstream event: {0}")]
    StreamMalformed(String),

    /// The caller's request is unusable as given.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(String),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(feature = "rquest")]
impl From<rquest::Error> for BridgeError {
    fn from(e: rquest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl BridgeError {
    /// Returns `true` if the upstream refused the credential in use.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthInvalid)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BridgeError>;
