//! Async traits shared across all kimi-bridge crates.
//!
//! Every cross-crate abstraction is defined here so that higher layers depend
//! only on `kimi-bridge-types`, not on each other.

use crate::{AccessCredential, BridgeError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use serde_json::Value;
use std::pin::Pin;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// A pinned, sendable stream of SSE byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Exchanges a refresh credential for a fresh access credential.
///
/// Implementations perform exactly one network call per invocation; callers
/// are responsible for collapsing concurrent refreshes.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<AccessCredential>;
}

/// Maps an attachment URL (remote or `data:`) to an upstream file reference id.
#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BridgeError::FileInvalid`] if the resource cannot be fetched
    /// or decoded, and [`BridgeError::FileTooLarge`] if it exceeds the size
    /// ceiling. Both are reported before any upload is attempted.
    async fn resolve(&self, url: &str, refresh_token: &str) -> Result<String>;
}

/// The upstream web-chat operations the completion orchestrator drives.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open an ephemeral session labelled `name`, returning its id.
    async fn open_session(&self, name: &str, refresh_token: &str) -> Result<String>;

    /// Delete a session. Callers treat failure as advisory.
    async fn close_session(&self, session_id: &str, refresh_token: &str) -> Result<()>;

    /// Upload an attachment and return the reference id to send in `refs`.
    async fn resolve_attachment(&self, url: &str, refresh_token: &str) -> Result<String>;

    /// Start a completion inside `session_id` and return the raw SSE byte stream.
    async fn stream_completion(
        &self,
        session_id: &str,
        refresh_token: &str,
        payload: Value,
    ) -> Result<ByteStream>;

    /// Report whether `refresh_token` can still obtain a working access credential.
    async fn token_live(&self, refresh_token: &str) -> Result<bool>;

    /// Issue a request the web client would normally make, to keep the
    /// session looking like a browser. Failures are meaningless to callers.
    async fn send_decoy(&self, _refresh_token: &str) -> Result<()> {
        Ok(())
    }
}

/// The response produced by a completion.
pub enum ProviderResponse {
    /// A complete, non-streaming JSON response.
    Complete(Value),
    /// A streaming SSE byte stream of translated chunks.
    Stream(ByteStream),
}
