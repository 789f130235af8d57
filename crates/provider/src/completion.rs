//! Completion orchestration.
//!
//! One attempt: resolve attachments, open a session, start the upstream
//! stream, translate it. The whole attempt is wrapped in [`RetryPolicy`], so
//! a retry opens a fresh session. Each session is owned by a
//! [`SessionGuard`] that schedules its deletion on drop.

use crate::{
    retry::RetryPolicy,
    session::{DEFAULT_SESSION_NAME, SessionGuard},
};
use bytes::Bytes;
use futures_core::Stream;
use futures_util::future::try_join_all;
use kimi_bridge_translate::{create_trans_stream, prepare_messages, receive_stream};
use kimi_bridge_types::{
    BridgeError, ChatBackend, ChatRequest,
    traits::{ByteStream, ProviderResponse, Result},
};
use serde_json::{Value, json};
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio_util::task::TaskTracker;

/// Drives completions against a [`ChatBackend`].
pub struct Completions {
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    tasks: TaskTracker,
    decoy: bool,
}

impl Completions {
    /// `tasks` receives session cleanup and decoy requests; the server
    /// drains it on shutdown.
    #[must_use]
    pub fn new(backend: Arc<dyn ChatBackend>, retry: RetryPolicy, tasks: TaskTracker, decoy: bool) -> Self {
        Self {
            backend,
            retry,
            tasks,
            decoy,
        }
    }

    #[must_use]
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Dispatches on `request.stream`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidRequest`] for an empty conversation,
    /// otherwise the error of the final attempt.
    pub async fn chat_completion(
        &self,
        request: &ChatRequest,
        refresh_token: &str,
    ) -> Result<ProviderResponse> {
        if request.messages.is_empty() {
            return Err(BridgeError::InvalidRequest("messages must not be empty".into()));
        }
        if request.stream {
            self.create_completion_stream(request, refresh_token)
                .await
                .map(ProviderResponse::Stream)
        } else {
            self.create_completion(request, refresh_token)
                .await
                .map(ProviderResponse::Complete)
        }
    }

    /// Buffered completion: returns one `chat.completion` object.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn create_completion(&self, request: &ChatRequest, refresh_token: &str) -> Result<Value> {
        self.retry
            .run("completion", move || async move {
                let (session, upstream) = self.start(request, refresh_token).await?;
                receive_stream(&request.model, session.id(), upstream).await
            })
            .await
    }

    /// Streaming completion: returns `OpenAI` SSE frames.
    ///
    /// Only establishing the stream is retried; once frames flow, failures
    /// end the stream with `[DONE]`.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn create_completion_stream(
        &self,
        request: &ChatRequest,
        refresh_token: &str,
    ) -> Result<ByteStream> {
        self.retry
            .run("completion stream", move || async move {
                let (session, upstream) = self.start(request, refresh_token).await?;
                let frames = create_trans_stream(&request.model, session.id(), upstream);
                Ok(Box::pin(SessionBound {
                    inner: frames,
                    _session: session,
                }) as ByteStream)
            })
            .await
    }

    async fn start(&self, request: &ChatRequest, refresh_token: &str) -> Result<(SessionGuard, ByteStream)> {
        if self.decoy {
            self.spawn_decoy(refresh_token);
        }

        // Attachments are resolved first so a bad file never leaves a session behind.
        let refs = try_join_all(
            request
                .attachment_urls()
                .into_iter()
                .map(|url| self.backend.resolve_attachment(url, refresh_token)),
        )
        .await?;

        let session_id = self.backend.open_session(DEFAULT_SESSION_NAME, refresh_token).await?;
        let session = SessionGuard::new(
            Arc::clone(&self.backend),
            self.tasks.clone(),
            session_id,
            refresh_token.to_string(),
        );
        tracing::info!(
            session_id = session.id(),
            model = %request.model,
            stream = request.stream,
            refs = refs.len(),
            "completion started"
        );

        let payload = json!({
            "messages": prepare_messages(&request.messages),
            "refs": refs,
            "use_search": request.use_search,
        });
        let upstream = self
            .backend
            .stream_completion(session.id(), refresh_token, payload)
            .await?;
        Ok((session, upstream))
    }

    fn spawn_decoy(&self, refresh_token: &str) {
        let backend = Arc::clone(&self.backend);
        let refresh_token = refresh_token.to_string();
        self.tasks.spawn(async move {
            if let Err(e) = backend.send_decoy(&refresh_token).await {
                tracing::debug!(error = %e, "decoy request failed");
            }
        });
    }
}

/// Keeps the session open for as long as the client holds the stream.
struct SessionBound {
    inner: ByteStream,
    _session: SessionGuard,
}

impl Stream for SessionBound {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}
