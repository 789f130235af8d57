//! Attachment ingestion.
//!
//! An attachment URL is either a `data:` URL carrying base64 content or a
//! remote http(s) URL. Either way the content is loaded and size-checked
//! locally before anything is sent upstream, then pushed through the web
//! client's upload flow:
//!
//! 1. `POST /api/pre-sign-url` → pre-signed object storage URL
//! 2. `PUT` the bytes to that URL
//! 3. `POST /api/file` registers the object and yields the file id
//! 4. `POST /api/file/parse_process` (documents only) starts server-side parsing
//!
//! The file id is what the completion request lists in `refs`.

use crate::http_util::UpstreamHttp;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt as _;
use kimi_bridge_types::{AttachmentResolver, BridgeError, traits::Result};
use rquest::Method;
use serde_json::{Value, json};
use uuid::Uuid;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Loaded attachment content, ready for upload.
#[derive(Debug)]
struct Payload {
    name: String,
    mime: String,
    bytes: Bytes,
}

impl Payload {
    fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

fn ensure_size(size: u64, limit: u64) -> Result<()> {
    if size > limit {
        Err(BridgeError::FileTooLarge { size, limit })
    } else {
        Ok(())
    }
}

/// Drains `body` into memory, failing as soon as the running total passes
/// `limit` so an oversized body is never fully buffered.
async fn collect_capped<S>(body: S, limit: u64) -> Result<Bytes>
where
    S: Stream<Item = Result<Bytes>>,
{
    let mut body = std::pin::pin!(body);
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        ensure_size((buf.len() + chunk.len()) as u64, limit)?;
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

fn extension_for(mime: &str) -> String {
    match mime {
        "image/jpeg" => "jpg".into(),
        "text/plain" => "txt".into(),
        _ => mime
            .split_once('/')
            .map(|(_, sub)| sub.split(['+', ';', '.', '-']).next().unwrap_or_default())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin")
            .to_string(),
    }
}

fn file_name_from_url(url: &str, mime: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let after_host = path
        .split_once("://")
        .map_or(path, |(_, rest)| rest.split_once('/').map_or("", |(_, p)| p));
    match after_host.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{}.{}", Uuid::new_v4(), extension_for(mime)),
    }
}

fn decode_data_url(url: &str, limit: u64) -> Result<Payload> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| BridgeError::FileInvalid("not a data URL".into()))?;
    let (mime, data) = rest
        .split_once(";base64,")
        .ok_or_else(|| BridgeError::FileInvalid("data URL is not base64 encoded".into()))?;
    let mime = if mime.is_empty() { FALLBACK_MIME } else { mime };
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| BridgeError::FileInvalid(format!("undecodable data URL: {e}")))?;
    ensure_size(bytes.len() as u64, limit)?;
    Ok(Payload {
        name: format!("{}.{}", Uuid::new_v4(), extension_for(mime)),
        mime: mime.to_string(),
        bytes: Bytes::from(bytes),
    })
}

fn str_field(body: &Value, field: &str) -> Result<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::RequestFailed(format!("upload response missing {field}")))
}

/// [`AttachmentResolver`] backed by the upstream upload flow.
#[derive(Clone)]
pub struct KimiAttachments {
    http: UpstreamHttp,
    max_bytes: u64,
}

impl KimiAttachments {
    #[must_use]
    pub fn new(http: UpstreamHttp, max_bytes: u64) -> Self {
        Self { http, max_bytes }
    }

    async fn load(&self, url: &str) -> Result<Payload> {
        if kimi_bridge_types::chat::is_data_url(url) {
            return decode_data_url(url, self.max_bytes);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(BridgeError::FileInvalid(format!(
                "unsupported attachment URL: {url}"
            )));
        }
        self.fetch_remote(url).await
    }

    async fn fetch_remote(&self, url: &str) -> Result<Payload> {
        let client = self.http.client();
        let timeout = self.http.stream_timeout();

        // Servers that refuse HEAD are still checked after the download.
        let head = client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| BridgeError::FileInvalid(format!("attachment unreachable: {e}")))?;
        if head.status().is_success() {
            let declared = head
                .headers()
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(size) = declared {
                ensure_size(size, self.max_bytes)?;
            }
        }

        let resp = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| BridgeError::FileInvalid(format!("attachment unreachable: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BridgeError::FileInvalid(format!(
                "attachment fetch returned {status}"
            )));
        }
        let mime = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map_or(FALLBACK_MIME, str::trim)
            .to_string();
        if let Some(size) = resp.content_length() {
            ensure_size(size, self.max_bytes)?;
        }
        let body = resp.bytes_stream().map(|chunk| {
            chunk.map_err(|e| BridgeError::FileInvalid(format!("attachment download failed: {e}")))
        });
        let bytes = collect_capped(body, self.max_bytes).await?;
        Ok(Payload {
            name: file_name_from_url(url, &mime),
            mime,
            bytes,
        })
    }

    async fn upload(&self, payload: Payload, refresh_token: &str) -> Result<String> {
        let http = &self.http;

        let presign = http
            .request(Method::POST, "/api/pre-sign-url", "/", refresh_token)
            .await?
            .json(&json!({"action": "file", "name": payload.name}));
        let signed = http.send_json(presign, refresh_token).await?;
        let upload_url = str_field(&signed, "url")?;
        let object_name = str_field(&signed, "object_name")?;

        let resp = http
            .client()
            .put(&upload_url)
            .header("content-type", payload.mime.as_str())
            .timeout(http.stream_timeout())
            .body(payload.bytes.clone())
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BridgeError::RequestFailed(format!(
                "attachment upload returned {status}"
            )));
        }

        let kind = if payload.is_image() { "image" } else { "file" };
        let register = http
            .request(Method::POST, "/api/file", "/", refresh_token)
            .await?
            .json(&json!({"type": kind, "name": payload.name, "object_name": object_name}));
        let file = http.send_json(register, refresh_token).await?;
        let file_id = str_field(&file, "id")?;

        if !payload.is_image() {
            let parse = http
                .request(Method::POST, "/api/file/parse_process", "/", refresh_token)
                .await?
                .timeout(http.stream_timeout())
                .json(&json!({"ids": [file_id]}));
            http.send_json(parse, refresh_token).await?;
        }

        tracing::debug!(%file_id, name = %payload.name, size = payload.bytes.len(), "attachment uploaded");
        Ok(file_id)
    }
}

#[async_trait]
impl AttachmentResolver for KimiAttachments {
    async fn resolve(&self, url: &str, refresh_token: &str) -> Result<String> {
        let payload = self.load(url).await?;
        self.upload(payload, refresh_token).await
    }
}
