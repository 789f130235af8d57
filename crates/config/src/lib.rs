//! Configuration loading for the kimi-bridge server.
//!
//! Uses figment to layer built-in defaults, an optional YAML file, and
//! `BRIDGE_`-prefixed environment variables.

pub mod schema;

pub use schema::{AttachmentConfig, Config, LogConfig, RetryConfig, UpstreamConfig};
