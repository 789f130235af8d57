//! Core types and traits for the kimi-bridge workspace.
//!
//! This crate defines the shared abstractions used across all layers of the
//! bridge: the error taxonomy, the OpenAI-style request model, access
//! credentials, and the async traits each layer implements.

pub mod chat;
pub mod error;
pub mod token;
pub mod traits;

pub use chat::{ChatMessage, ChatRequest, ContentPart, MessageContent, UrlRef};
pub use error::BridgeError;
pub use token::{AccessCredential, unix_now};
pub use traits::{
    AttachmentResolver, ByteStream, ChatBackend, CredentialRefresher, ProviderResponse,
};
