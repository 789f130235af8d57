//! Ephemeral upstream chat sessions.
//!
//! Every completion attempt opens its own session and deletes it once the
//! response has been consumed. Deletion runs in the background through a
//! [`SessionGuard`] so callers never wait on it, and its failure is only
//! logged: the upstream refuses to delete sessions it flagged for review.

use crate::http_util::UpstreamHttp;
use kimi_bridge_types::{
    BridgeError, ChatBackend,
    traits::Result,
};
use rquest::Method;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

/// Label the web client gives new conversations.
pub const DEFAULT_SESSION_NAME: &str = "未命名会话";

/// Opens a session and returns its id.
///
/// # Errors
///
/// Returns [`BridgeError::RequestFailed`] if the upstream rejects the call
/// or omits the id.
pub async fn create_session(http: &UpstreamHttp, name: &str, refresh_token: &str) -> Result<String> {
    let builder = http
        .request(Method::POST, "/api/chat", "/", refresh_token)
        .await?
        .json(&json!({"name": name, "is_example": false}));
    let body = http.send_json(builder, refresh_token).await?;
    body.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::RequestFailed("session response missing id".into()))
}

/// Deletes a session.
///
/// # Errors
///
/// Propagates transport and upstream errors; callers treat them as advisory.
pub async fn delete_session(http: &UpstreamHttp, session_id: &str, refresh_token: &str) -> Result<()> {
    let builder = http
        .request(
            Method::DELETE,
            &format!("/api/chat/{session_id}"),
            &format!("/chat/{session_id}"),
            refresh_token,
        )
        .await?;
    http.send_json(builder, refresh_token).await?;
    Ok(())
}

/// Owns an open session and schedules its deletion when dropped.
///
/// Dropping happens when a buffered completion finishes, when an attempt
/// fails after the session was opened, or when a streaming response body is
/// dropped (completed or abandoned by the client).
pub struct SessionGuard {
    backend: Arc<dyn ChatBackend>,
    tasks: TaskTracker,
    session_id: String,
    refresh_token: String,
}

impl SessionGuard {
    #[must_use]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        tasks: TaskTracker,
        session_id: String,
        refresh_token: String,
    ) -> Self {
        Self {
            backend,
            tasks,
            session_id,
            refresh_token,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let session_id = std::mem::take(&mut self.session_id);
        let refresh_token = std::mem::take(&mut self.refresh_token);
        let backend = Arc::clone(&self.backend);
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(%session_id, "no runtime available, leaving session open");
            return;
        };
        self.tasks.spawn_on(
            async move {
                match backend.close_session(&session_id, &refresh_token).await {
                    Ok(()) => tracing::debug!(%session_id, "session deleted"),
                    Err(e) => tracing::warn!(%session_id, error = %e, "session cleanup failed"),
                }
            },
            &handle,
        );
    }
}
