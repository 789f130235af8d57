//! Collapses a multi-turn conversation into one upstream prompt.
//!
//! The upstream completion endpoint only treats the newest message as the
//! prompt, so the whole history is rendered as `role:text` lines inside a
//! single user message, with a steering hint placed right before the newest
//! turn.

use kimi_bridge_types::{ChatMessage, ContentPart, MessageContent};
use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;

/// Hint inserted when the newest message carries a file or image.
pub const LATEST_ATTACHMENT_HINT: &str =
    "Focus on the file and message the user sent most recently.";
/// Hint inserted otherwise.
pub const LATEST_MESSAGE_HINT: &str = "Focus on the user's most recent message.";

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://[-A-Za-z0-9+&@#/%?=~_|!:,.;]+[-A-Za-z0-9+&@#/%=~_|]")
        .expect("URL pattern is valid")
});

/// Wraps bare URLs in the marker tag the web client itself emits, so the
/// upstream parser treats them as references rather than prose.
#[must_use]
pub fn wrap_urls(text: &str) -> String {
    URL_PATTERN
        .replace_all(text, r#"<url id="" type="url" status="" title="" wc="">${0}</url>"#)
        .into_owned()
}

/// Renders `messages` into the single-element `messages` array sent upstream.
///
/// Inline base64 attachments are never rendered; they reach the upstream as
/// uploaded file references instead.
#[must_use]
pub fn prepare_messages(messages: &[ChatMessage]) -> Value {
    let mut content = String::new();
    if let Some((last, history)) = messages.split_last() {
        for message in history {
            render(message, &mut content);
        }
        let hint = if last.has_attachment() {
            LATEST_ATTACHMENT_HINT
        } else {
            LATEST_MESSAGE_HINT
        };
        push_line(&mut content, "system", hint);
        render(last, &mut content);
    }
    json!([{ "role": "user", "content": content }])
}

fn render(message: &ChatMessage, out: &mut String) {
    match &message.content {
        Some(MessageContent::Text(text)) => push_line(out, &message.role, &wrap_urls(text)),
        Some(MessageContent::Parts(parts)) => {
            for part in parts.iter().filter(|p| !p.is_inline_attachment()) {
                if let ContentPart::Text { text } = part {
                    push_line(out, &message.role, text);
                }
            }
        }
        None => {}
    }
}

fn push_line(out: &mut String, role: &str, text: &str) {
    out.push_str(role);
    out.push(':');
    out.push_str(text);
    out.push('\n');
}
