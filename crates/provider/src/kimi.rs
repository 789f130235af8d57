//! Kimi web-chat backend.
//!
//! Implements [`ChatBackend`] on top of the endpoints the web client uses.
//! Auth: `Authorization: Bearer {access}` where the access credential is
//! obtained from the caller's refresh token via the shared
//! [`CredentialCoordinator`].

use crate::{attachment::KimiAttachments, http_util::UpstreamHttp, session};
use async_trait::async_trait;
use kimi_bridge_auth::CredentialCoordinator;
use kimi_bridge_config::Config;
use kimi_bridge_types::{
    AttachmentResolver, BridgeError, ChatBackend,
    traits::{ByteStream, Result},
};
use rand::seq::SliceRandom as _;
use rquest::{Client, Method};
use serde_json::{Value, json};
use std::sync::Arc;

const USER_PATH: &str = "/api/user";

/// Requests the web client issues on its own while a tab is open.
const DECOYS: &[(&str, &str)] = &[
    ("GET", USER_PATH),
    ("GET", "/api/chat_1m/user/status"),
    ("POST", "/api/chat/list"),
];

/// Backend for the Kimi web chat.
pub struct KimiBackend {
    http: UpstreamHttp,
    attachments: KimiAttachments,
}

impl KimiBackend {
    #[must_use]
    pub fn new(http: Client, coordinator: Arc<CredentialCoordinator>, config: &Config) -> Self {
        let http = UpstreamHttp::new(http, coordinator, &config.upstream);
        let attachments = KimiAttachments::new(http.clone(), config.attachments.max_bytes);
        Self { http, attachments }
    }
}

#[async_trait]
impl ChatBackend for KimiBackend {
    async fn open_session(&self, name: &str, refresh_token: &str) -> Result<String> {
        let id = session::create_session(&self.http, name, refresh_token).await?;
        tracing::debug!(session_id = %id, "session opened");
        Ok(id)
    }

    async fn close_session(&self, session_id: &str, refresh_token: &str) -> Result<()> {
        session::delete_session(&self.http, session_id, refresh_token).await
    }

    async fn resolve_attachment(&self, url: &str, refresh_token: &str) -> Result<String> {
        self.attachments.resolve(url, refresh_token).await
    }

    async fn stream_completion(
        &self,
        session_id: &str,
        refresh_token: &str,
        payload: Value,
    ) -> Result<ByteStream> {
        let builder = self
            .http
            .request(
                Method::POST,
                &format!("/api/chat/{session_id}/completion/stream"),
                &format!("/chat/{session_id}"),
                refresh_token,
            )
            .await?
            .timeout(self.http.stream_timeout())
            .header("accept", "text/event-stream")
            .json(&payload);
        let resp = builder.send().await?;

        let is_event_stream = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));
        if resp.status().is_success() && is_event_stream {
            return Ok(UpstreamHttp::byte_stream(resp));
        }

        // Errors arrive as JSON; anything that survives validation is still
        // not a stream.
        self.http.read_checked(resp, refresh_token).await?;
        Err(BridgeError::RequestFailed(
            "completion endpoint did not return an event stream".into(),
        ))
    }

    async fn token_live(&self, refresh_token: &str) -> Result<bool> {
        let probe = async {
            self.http.coordinator().refresh(refresh_token).await?;
            let builder = self
                .http
                .request(Method::GET, USER_PATH, "/", refresh_token)
                .await?;
            self.http.send_json(builder, refresh_token).await
        };
        match probe.await {
            Ok(user) => Ok(user.is_object()),
            Err(e) => {
                tracing::debug!(error = %e, "token liveness probe failed");
                Ok(false)
            }
        }
    }

    async fn send_decoy(&self, refresh_token: &str) -> Result<()> {
        let Some(&(method, path)) = DECOYS.choose(&mut rand::thread_rng()) else {
            return Ok(());
        };
        let builder = if method == "POST" {
            self.http
                .request(Method::POST, path, "/", refresh_token)
                .await?
                .json(&json!({"offset": 0, "size": 50}))
        } else {
            self.http
                .request(Method::GET, path, "/", refresh_token)
                .await?
        };
        self.http.send_json(builder, refresh_token).await?;
        tracing::trace!(path, "decoy request sent");
        Ok(())
    }
}
