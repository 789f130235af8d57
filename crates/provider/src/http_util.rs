//! Shared HTTP plumbing for upstream calls.
//!
//! Every authenticated request goes through [`UpstreamHttp`]: acquire an
//! access credential, attach browser headers, send, then validate the body
//! with [`check_result`].

use futures_util::StreamExt as _;
use kimi_bridge_auth::{CredentialCoordinator, kimi::apply_browser_headers};
use kimi_bridge_config::UpstreamConfig;
use kimi_bridge_types::{
    BridgeError,
    traits::{ByteStream, Result},
};
use rquest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

const TOKEN_INVALID: &str = "auth.token.invalid";
const STREAM_PUSHING: &str = "chat.user_stream_pushing";

/// Validates an upstream response.
///
/// - `401` evicts the cached access credential and fails with
///   [`BridgeError::AuthInvalid`].
/// - An empty body is a successful, empty result ([`Value::Null`]).
/// - A body carrying `error_type` is mapped to an error; `auth.token.invalid`
///   also evicts the cached credential.
/// - Any other non-success status fails with [`BridgeError::RequestFailed`].
///
/// # Errors
///
/// See the mapping above.
pub fn check_result(
    coordinator: &CredentialCoordinator,
    refresh_token: &str,
    status: u16,
    body: Option<Value>,
) -> Result<Value> {
    if status == 401 {
        coordinator.evict(refresh_token);
        return Err(BridgeError::AuthInvalid);
    }
    let Some(body) = body else {
        return Ok(Value::Null);
    };
    if let Some(error_type) = body.get("error_type").and_then(Value::as_str) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(error_type)
            .to_string();
        return Err(match error_type {
            TOKEN_INVALID => {
                coordinator.evict(refresh_token);
                BridgeError::RequestFailed(message)
            }
            STREAM_PUSHING => BridgeError::StreamBusy,
            _ => BridgeError::RequestFailed(message),
        });
    }
    if (200..300).contains(&status) {
        Ok(body)
    } else {
        Err(BridgeError::RequestFailed(format!(
            "upstream returned {status}: {body}"
        )))
    }
}

/// Authenticated client for the upstream web API.
#[derive(Clone)]
pub struct UpstreamHttp {
    http: Client,
    coordinator: Arc<CredentialCoordinator>,
    base_url: String,
    metadata_timeout: Duration,
    stream_timeout: Duration,
}

impl UpstreamHttp {
    #[must_use]
    pub fn new(http: Client, coordinator: Arc<CredentialCoordinator>, config: &UpstreamConfig) -> Self {
        Self {
            http,
            coordinator,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            metadata_timeout: config.metadata_timeout(),
            stream_timeout: config.stream_timeout(),
        }
    }

    /// Returns a reference to the inner HTTP client for unauthenticated requests.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.http
    }

    #[must_use]
    pub fn coordinator(&self) -> &CredentialCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    #[must_use]
    pub fn stream_timeout(&self) -> Duration {
        self.stream_timeout
    }

    /// Builds an authenticated request with the metadata timeout.
    ///
    /// `referer_path` is appended to the base URL for the `referer` header.
    ///
    /// # Errors
    ///
    /// Propagates credential refresh failures.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        referer_path: &str,
        refresh_token: &str,
    ) -> Result<RequestBuilder> {
        let access = self.coordinator.acquire_access(refresh_token).await?;
        let builder = self
            .http
            .request(method, self.url(path))
            .header("referer", self.url(referer_path))
            .timeout(self.metadata_timeout);
        Ok(apply_browser_headers(builder, &self.base_url, &access))
    }

    /// Sends a request, reads the body, and runs it through [`check_result`].
    ///
    /// # Errors
    ///
    /// Returns a transport error if the request fails to send, otherwise
    /// whatever [`check_result`] decides.
    pub async fn send_json(&self, builder: RequestBuilder, refresh_token: &str) -> Result<Value> {
        let resp = builder.send().await?;
        self.read_checked(resp, refresh_token).await
    }

    /// Reads the body of an already-received response and validates it.
    ///
    /// # Errors
    ///
    /// See [`check_result`].
    pub async fn read_checked(&self, resp: Response, refresh_token: &str) -> Result<Value> {
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        check_result(&self.coordinator, refresh_token, status, parse_body(&bytes))
    }

    /// Converts an `rquest::Response` into a `ByteStream`.
    #[must_use]
    pub fn byte_stream(resp: Response) -> ByteStream {
        Box::pin(resp.bytes_stream().map(|r| r.map_err(BridgeError::from)))
    }
}

/// Empty bodies become `None`; non-JSON text is kept as a JSON string so it
/// still shows up in error messages.
fn parse_body(bytes: &[u8]) -> Option<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    )
}
