//! Upstream backend and completion orchestration.
//!
//! [`KimiBackend`] implements [`ChatBackend`](kimi_bridge_types::ChatBackend)
//! against the web-chat endpoints; [`Completions`] drives a backend through
//! attachment upload, session lifecycle, stream translation and retry.

pub mod attachment;
pub mod completion;
pub mod http_util;
pub mod kimi;
pub mod registry;
pub mod retry;
pub mod session;

pub use attachment::KimiAttachments;
pub use completion::Completions;
pub use http_util::{UpstreamHttp, check_result};
pub use kimi::KimiBackend;
pub use registry::kimi_models;
pub use retry::RetryPolicy;
pub use session::SessionGuard;
