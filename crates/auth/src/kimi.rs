//! Kimi web-chat token refresh and browser emulation headers.
//!
//! The web client authenticates with a long-lived refresh token and trades it
//! for a short-lived access token at [`REFRESH_PATH`]. Every upstream call
//! carries the same header set a desktop Chrome tab would send.
use async_trait::async_trait;
use kimi_bridge_config::UpstreamConfig;
use kimi_bridge_types::{
    AccessCredential, BridgeError, CredentialRefresher, traits::Result,
};
use rquest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

pub const REFRESH_PATH: &str = "/api/auth/token/refresh";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const SEC_CH_UA: &str =
    r#""Chromium";v="124", "Google Chrome";v="124", "Not-A.Brand";v="99""#;

#[must_use]
pub fn browser_headers(base_url: &str) -> Vec<(&'static str, String)> {
    vec![
        ("accept", "*/*".to_string()),
        ("accept-language", "zh-CN,zh;q=0.9,en;q=0.8".to_string()),
        ("origin", base_url.to_string()),
        ("r-timezone", "Asia/Shanghai".to_string()),
        ("sec-ch-ua", SEC_CH_UA.to_string()),
        ("sec-ch-ua-mobile", "?0".to_string()),
        ("sec-ch-ua-platform", "\"Windows\"".to_string()),
        ("sec-fetch-dest", "empty".to_string()),
        ("sec-fetch-mode", "cors".to_string()),
        ("sec-fetch-site", "same-origin".to_string()),
        ("user-agent", USER_AGENT.to_string()),
    ]
}

/// Applies [`browser_headers`] plus a bearer `authorization` header.
#[must_use]
pub fn apply_browser_headers(
    builder: RequestBuilder,
    base_url: &str,
    bearer: &str,
) -> RequestBuilder {
    browser_headers(base_url)
        .into_iter()
        .fold(builder, |b, (name, value)| b.header(name, value))
        .header("authorization", format!("Bearer {bearer}"))
}

/// Builds an [`AccessCredential`] from a refresh response body.
///
/// # Errors
///
/// Returns [`BridgeError::RequestFailed`] if `access_token` is missing.
pub fn parse_refresh_response(json: &Value, ttl_secs: u64) -> Result<AccessCredential> {
    let access = json
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BridgeError::RequestFailed("refresh response missing access_token".into()))?;
    Ok(AccessCredential::new(access, ttl_secs))
}

/// Decodes a raw refresh response body.
///
/// # Errors
///
/// Returns [`BridgeError::Serialization`] if the body is not JSON, or
/// whatever [`parse_refresh_response`] reports for a well-formed body.
pub fn parse_refresh_body(body: &[u8], ttl_secs: u64) -> Result<AccessCredential> {
    let json: Value = serde_json::from_slice(body)?;
    parse_refresh_response(&json, ttl_secs)
}

/// Exchanges refresh tokens for access tokens over HTTP.
pub struct KimiRefresher {
    http: Client,
    base_url: String,
    ttl_secs: u64,
    timeout: Duration,
}

impl KimiRefresher {
    pub fn new(http: Client, config: &UpstreamConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ttl_secs: config.access_token_ttl_secs,
            timeout: config.metadata_timeout(),
        }
    }
}

#[async_trait]
impl CredentialRefresher for KimiRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<AccessCredential> {
        let url = format!("{}{REFRESH_PATH}", self.base_url);
        let builder = self
            .http
            .get(&url)
            .header("referer", format!("{}/", self.base_url))
            .timeout(self.timeout);
        let resp = apply_browser_headers(builder, &self.base_url, refresh_token)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 {
            return Err(BridgeError::AuthInvalid);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BridgeError::RequestFailed(format!(
                "token refresh returned {status}: {text}"
            )));
        }
        let body = resp.bytes().await?;
        parse_refresh_body(&body, self.ttl_secs)
    }
}
