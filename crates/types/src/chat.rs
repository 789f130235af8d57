//! Strongly-typed OpenAI-compatible chat completion request.
//!
//! Message content is validated at the API boundary into a tagged union of
//! content parts, so later stages never probe loosely-typed JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

fn default_true() -> bool {
    true
}

fn default_role() -> String {
    "user".to_string()
}

/// A strongly-typed OpenAI-compatible chat completion request body.
///
/// Fields the bridge does not act on (e.g. `temperature`) are captured in
/// [`extra`](Self::extra) and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model identifier (e.g. `"kimi"`, `"kimi-silent_search"`).
    pub model: String,
    /// Whether to use streaming SSE mode.
    #[serde(default)]
    pub stream: bool,
    /// The conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Whether the upstream may run a web search for this completion.
    #[serde(default = "default_true")]
    pub use_search: bool,
    /// All remaining fields not captured above.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ChatRequest {
    /// Attachment URLs carried by the newest message, in order.
    ///
    /// Only the newest message is addressable upstream, so attachments on
    /// earlier turns are not uploaded again.
    #[must_use]
    pub fn attachment_urls(&self) -> Vec<&str> {
        self.messages
            .last()
            .map(|m| m.attachment_urls().collect())
            .unwrap_or_default()
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

impl ChatMessage {
    /// Convenience constructor for a plain-text message.
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(MessageContent::Text(text.into())),
        }
    }

    /// Iterates the URLs of every file or image part in this message.
    pub fn attachment_urls(&self) -> impl Iterator<Item = &str> {
        self.parts().iter().filter_map(ContentPart::attachment_url)
    }

    /// Returns `true` if the message carries a file or image part.
    #[must_use]
    pub fn has_attachment(&self) -> bool {
        self.attachment_urls().next().is_some()
    }

    fn parts(&self) -> &[ContentPart] {
        match &self.content {
            Some(MessageContent::Parts(parts)) => parts,
            _ => &[],
        }
    }
}

/// Message content: either a plain string or an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One element of a multi-part message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        #[serde(default)]
        text: String,
    },
    File {
        file_url: UrlRef,
    },
    ImageUrl {
        image_url: UrlRef,
    },
    /// Any part type the bridge does not understand.
    #[serde(other)]
    Unknown,
}

impl ContentPart {
    /// The referenced URL for file and image parts.
    #[must_use]
    pub fn attachment_url(&self) -> Option<&str> {
        match self {
            Self::File { file_url: r } | Self::ImageUrl { image_url: r } => Some(&r.url),
            Self::Text { .. } | Self::Unknown => None,
        }
    }

    /// Returns `true` for attachments whose payload is inlined as a `data:` URL.
    #[must_use]
    pub fn is_inline_attachment(&self) -> bool {
        self.attachment_url().is_some_and(is_data_url)
    }
}

/// A `{ "url": ... }` reference, remote or base64-inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRef {
    pub url: String,
}

/// Returns `true` if `url` is a base64 `data:` URL.
#[must_use]
pub fn is_data_url(url: &str) -> bool {
    url.starts_with("data:") && url.contains(";base64,")
}
