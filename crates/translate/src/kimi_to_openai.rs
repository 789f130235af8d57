//! Translates the Kimi completion event stream into `OpenAI` chat completion format.
//!
//! The upstream speaks SSE whose `data:` payloads are JSON objects tagged by
//! an `event` field. One interpretation core ([`interpret`]) drives two modes:
//!
//! - [`receive_stream`] buffers everything into one `chat.completion` object.
//! - [`create_trans_stream`] re-emits `chat.completion.chunk` frames live.
//!
//! Upstream event mapping:
//! - `cmpl`         → text delta
//! - `search_plus`  → citation, when `msg.type == "get_res"` and the model is not silent
//! - `all_done`     → terminal
//! - `error`        → terminal, with [`REFUSAL_NOTICE`] appended
//! - anything else  → ignored
//!
//! Only the first terminal event is acted upon; nothing after it is read.

use bytes::Bytes;
use eventsource_stream::{EventStream, EventStreamError, Eventsource as _};
use futures_util::{StreamExt as _, stream};
use kimi_bridge_types::{BridgeError, ByteStream, traits::Result, unix_now};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::fmt::Write as _;

/// Models whose name contains this marker search without showing citations.
pub const SILENT_SEARCH_MARKER: &str = "silent_search";

/// Appended when the upstream stops generation for content-policy reasons.
pub const REFUSAL_NOTICE: &str =
    "\n[Generation was stopped because the content did not pass review. Let's talk about something else.]";

const SEARCH_RESULTS_HEADER: &str = "\n\nSearch results from:\n";
const DONE_FRAME: &str = "data: [DONE]\n\n";

/// What a single event asks the translator to do.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Text(String),
    Citation { title: String, url: String },
    Finish { refused: bool },
    Skip,
}

fn is_silent_search(model: &str) -> bool {
    model.contains(SILENT_SEARCH_MARKER)
}

/// Cuts a delta at the first U+FFFD.
///
/// Invalid UTF-8 from the wire has already been replaced by [`lossy_utf8`],
/// so the rest of that delta is dropped rather than repaired.
fn truncate_at_replacement(text: &str) -> &str {
    text.find('\u{FFFD}').map_or(text, |i| &text[..i])
}

fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

/// Decodes one `data:` payload. Only undecodable JSON is an error; valid JSON
/// of an unrecognised shape is skipped.
fn interpret(data: &str, silent_search: bool) -> Result<Step> {
    if data.trim().is_empty() {
        return Ok(Step::Skip);
    }
    let event: Value =
        serde_json::from_str(data).map_err(|e| BridgeError::StreamMalformed(e.to_string()))?;
    Ok(match str_field(&event, "event") {
        Some("cmpl") => str_field(&event, "text")
            .map_or(Step::Skip, |text| Step::Text(truncate_at_replacement(text).to_string())),
        Some("search_plus") => match event.get("msg") {
            Some(msg) if !silent_search && str_field(msg, "type") == Some("get_res") => {
                Step::Citation {
                    title: str_field(msg, "title").unwrap_or_default().to_string(),
                    url: str_field(msg, "url").unwrap_or_default().to_string(),
                }
            }
            _ => Step::Skip,
        },
        Some("all_done") => Step::Finish { refused: false },
        Some("error") => Step::Finish { refused: true },
        _ => Step::Skip,
    })
}

/// Decodes `bytes` onto the end of `carry` lossily. Complete characters are
/// returned, invalid sequences become U+FFFD, and a trailing incomplete
/// sequence stays in `carry` for the next chunk.
fn decode_lossy(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let mut out = String::with_capacity(carry.len());
    let mut rest: &[u8] = carry;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                rest = &[];
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        out.push('\u{FFFD}');
                        rest = &after[len..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }
    let tail = rest.to_vec();
    *carry = tail;
    out
}

/// Re-encodes the upstream byte stream as valid UTF-8 so SSE framing never
/// fails on a bad byte. A dangling partial character at end of stream
/// becomes a single U+FFFD.
fn lossy_utf8(upstream: ByteStream) -> ByteStream {
    Box::pin(stream::unfold(
        (upstream, Vec::new(), false),
        |(mut upstream, mut carry, done)| async move {
            if done {
                return None;
            }
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    let text = decode_lossy(&mut carry, &chunk);
                    Some((Ok::<_, BridgeError>(Bytes::from(text)), (upstream, carry, false)))
                }
                Some(Err(e)) => Some((Err(e), (upstream, carry, false))),
                None if carry.is_empty() => None,
                None => {
                    carry.clear();
                    Some((Ok(Bytes::from_static("\u{FFFD}".as_bytes())), (upstream, carry, true)))
                }
            }
        },
    ))
}

fn event_error(e: EventStreamError<BridgeError>) -> BridgeError {
    match e {
        EventStreamError::Transport(e) => e,
        other => BridgeError::StreamMalformed(other.to_string()),
    }
}

/// The upstream reports no token counts; these fixed values keep clients
/// that require a `usage` object working.
fn placeholder_usage() -> Value {
    json!({"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2})
}

/// Identity shared by every object emitted for one completion.
struct ChunkMeta {
    id: String,
    model: String,
    created: u64,
}

impl ChunkMeta {
    fn new(model: &str, session_id: &str) -> Self {
        Self {
            id: session_id.to_string(),
            model: model.to_string(),
            created: unix_now(),
        }
    }

    fn frame(&self, delta: &Value, finish_reason: Option<&str>) -> Bytes {
        let chunk = json!({
            "id": &self.id,
            "model": &self.model,
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
            "created": self.created,
        });
        Bytes::from(format!("data: {chunk}\n\n"))
    }

    fn last_frame(&self, delta: &Value) -> Bytes {
        let chunk = json!({
            "id": &self.id,
            "model": &self.model,
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": delta, "finish_reason": "stop"}],
            "usage": placeholder_usage(),
            "created": self.created,
        });
        Bytes::from(format!("data: {chunk}\n\n"))
    }

    fn completion(&self, content: String) -> Value {
        json!({
            "id": &self.id,
            "model": &self.model,
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": placeholder_usage(),
            "created": self.created,
        })
    }
}

/// Consumes the whole upstream stream and returns one `chat.completion` object.
///
/// A stream that closes without a terminal event still resolves, with
/// whatever content arrived.
///
/// # Errors
///
/// Returns the transport error if the byte stream fails, and
/// [`BridgeError::StreamMalformed`] if an event payload cannot be decoded.
pub async fn receive_stream(model: &str, session_id: &str, stream: ByteStream) -> Result<Value> {
    let meta = ChunkMeta::new(model, session_id);
    let silent_search = is_silent_search(model);
    let mut events = lossy_utf8(stream).eventsource();
    let mut content = String::new();
    let mut citations = String::new();

    while let Some(event) = events.next().await {
        let event = event.map_err(event_error)?;
        match interpret(&event.data, silent_search)? {
            Step::Text(text) => content.push_str(&text),
            Step::Citation { title, url } => {
                let _ = writeln!(citations, "{title}({url})");
            }
            Step::Finish { refused } => {
                if refused {
                    content.push_str(REFUSAL_NOTICE);
                }
                if !citations.is_empty() {
                    content.push_str(SEARCH_RESULTS_HEADER);
                    content.push_str(&citations);
                }
                return Ok(meta.completion(content));
            }
            Step::Skip => {}
        }
    }

    tracing::debug!(session_id, "upstream stream closed without a terminal event");
    Ok(meta.completion(content))
}

struct TransState {
    events: EventStream<ByteStream>,
    meta: ChunkMeta,
    silent_search: bool,
    /// Set after a citation chunk; the next text chunk starts on a new line.
    after_citation: bool,
    pending: VecDeque<Bytes>,
    closed: bool,
}

impl TransState {
    fn apply(&mut self, data: &str) {
        match interpret(data, self.silent_search) {
            Ok(Step::Text(text)) => {
                let content = if std::mem::take(&mut self.after_citation) {
                    format!("\n{text}")
                } else {
                    text
                };
                let frame = self.meta.frame(&json!({"content": content}), None);
                self.pending.push_back(frame);
            }
            Ok(Step::Citation { title, url }) => {
                self.after_citation = true;
                let line = format!("Searching {title}({url}) ...\n");
                let frame = self.meta.frame(&json!({"content": line}), None);
                self.pending.push_back(frame);
            }
            Ok(Step::Finish { refused }) => {
                let delta = if refused {
                    json!({"content": REFUSAL_NOTICE})
                } else {
                    json!({})
                };
                let frame = self.meta.last_frame(&delta);
                self.pending.push_back(frame);
                self.close();
            }
            Ok(Step::Skip) => {}
            Err(e) => {
                // Bytes are already on the wire; end cleanly instead of failing.
                tracing::error!(session_id = %self.meta.id, error = %e, "malformed upstream event, closing stream");
                self.close();
            }
        }
    }

    fn close(&mut self) {
        self.pending.push_back(Bytes::from_static(DONE_FRAME.as_bytes()));
        self.closed = true;
    }
}

/// Wraps the raw upstream stream and re-emits it as `OpenAI` SSE frames,
/// always ending with `data: [DONE]`.
///
/// The first frame is an empty assistant-role delta. Transport failures and
/// undecodable events end the stream with `[DONE]` instead of an error.
#[must_use]
pub fn create_trans_stream(model: &str, session_id: &str, stream: ByteStream) -> ByteStream {
    let meta = ChunkMeta::new(model, session_id);
    let mut pending = VecDeque::new();
    pending.push_back(meta.frame(&json!({"role": "assistant", "content": ""}), None));

    let state = TransState {
        events: lossy_utf8(stream).eventsource(),
        meta,
        silent_search: is_silent_search(model),
        after_citation: false,
        pending,
        closed: false,
    };

    Box::pin(stream::unfold(state, |mut s| async move {
        loop {
            if let Some(frame) = s.pending.pop_front() {
                return Some((Ok::<_, BridgeError>(frame), s));
            }
            if s.closed {
                return None;
            }
            match s.events.next().await {
                Some(Ok(event)) => s.apply(&event.data),
                Some(Err(e)) => {
                    tracing::warn!(session_id = %s.meta.id, error = %event_error(e), "upstream stream failed, closing");
                    s.close();
                }
                None => {
                    tracing::debug!(session_id = %s.meta.id, "upstream stream closed without a terminal event");
                    s.close();
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(event: &Value) -> String {
        format!("data: {event}\n\n")
    }

    fn cmpl(text: &str) -> String {
        sse(&json!({"event": "cmpl", "text": text, "view": "cmpl"}))
    }

    fn search(title: &str, url: &str) -> String {
        sse(&json!({"event": "search_plus", "msg": {"type": "get_res", "title": title, "url": url}}))
    }

    fn all_done() -> String {
        sse(&json!({"event": "all_done"}))
    }

    fn error() -> String {
        sse(&json!({"event": "error", "error_type": "content_filter"}))
    }

    fn byte_stream(chunks: Vec<String>) -> ByteStream {
        let items: Vec<Result<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
        Box::pin(stream::iter(items))
    }

    async fn frames(model: &str, chunks: Vec<String>) -> Vec<String> {
        create_trans_stream(model, "sess-1", byte_stream(chunks))
            .map(|r| String::from_utf8(r.unwrap().to_vec()).unwrap())
            .collect()
            .await
    }

    fn frame_json(frame: &str) -> Value {
        let body = frame
            .strip_prefix("data: ")
            .and_then(|f| f.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(body).unwrap()
    }

    fn delta_content(frame: &str) -> Value {
        frame_json(frame)["choices"][0]["delta"]["content"].clone()
    }

    async fn buffered(model: &str, chunks: Vec<String>) -> Result<Value> {
        receive_stream(model, "sess-1", byte_stream(chunks)).await
    }

    fn message_content(v: &Value) -> &str {
        v["choices"][0]["message"]["content"].as_str().unwrap()
    }

    // ── interpretation core ─────────────────────────────────────────────

    #[test]
    fn test_interpret_variants() {
        assert_eq!(
            interpret(r#"{"event":"cmpl","text":"hi"}"#, false).unwrap(),
            Step::Text("hi".into())
        );
        assert_eq!(
            interpret(r#"{"event":"all_done"}"#, false).unwrap(),
            Step::Finish { refused: false }
        );
        assert_eq!(
            interpret(r#"{"event":"error","error_type":"x"}"#, false).unwrap(),
            Step::Finish { refused: true }
        );
        assert_eq!(
            interpret(r#"{"event":"resp","id":"abc"}"#, false).unwrap(),
            Step::Skip
        );
        assert_eq!(
            interpret(r#"{"event":"search_plus","msg":{"type":"start"}}"#, false).unwrap(),
            Step::Skip
        );
        assert_eq!(interpret("  ", false).unwrap(), Step::Skip);
    }

    #[test]
    fn test_interpret_silent_search_drops_citation() {
        let data = r#"{"event":"search_plus","msg":{"type":"get_res","title":"t","url":"u"}}"#;
        assert_eq!(
            interpret(data, false).unwrap(),
            Step::Citation {
                title: "t".into(),
                url: "u".into()
            }
        );
        assert_eq!(interpret(data, true).unwrap(), Step::Skip);
    }

    #[test]
    fn test_interpret_malformed() {
        let err = interpret("{not json", false).unwrap_err();
        assert!(matches!(err, BridgeError::StreamMalformed(_)));
    }

    #[test]
    fn test_truncate_at_replacement() {
        assert_eq!(truncate_at_replacement("ab\u{FFFD}cd"), "ab");
        assert_eq!(truncate_at_replacement("你好\u{FFFD}"), "你好");
        assert_eq!(truncate_at_replacement("\u{FFFD}x"), "");
        assert_eq!(truncate_at_replacement("clean"), "clean");
    }

    #[test]
    fn test_interpret_skips_unrecognised_shapes() {
        assert_eq!(interpret(r#"{"id":"x"}"#, false).unwrap(), Step::Skip);
        assert_eq!(interpret(r#"{"event":"cmpl","text":5}"#, false).unwrap(), Step::Skip);
        assert_eq!(interpret(r#"{"event":"search_plus","msg":"oops"}"#, false).unwrap(), Step::Skip);
        assert_eq!(interpret(r#"{"event":42}"#, false).unwrap(), Step::Skip);
        assert_eq!(interpret("[1,2]", false).unwrap(), Step::Skip);
    }

    #[test]
    fn test_decode_lossy_carries_partial_sequence() {
        let mut carry = Vec::new();
        let bytes = "你好".as_bytes();
        assert_eq!(decode_lossy(&mut carry, &bytes[..2]), "");
        assert_eq!(carry.len(), 2);
        assert_eq!(decode_lossy(&mut carry, &bytes[2..]), "你好");
        assert!(carry.is_empty());
    }

    #[test]
    fn test_decode_lossy_replaces_invalid_bytes() {
        let mut carry = Vec::new();
        assert_eq!(decode_lossy(&mut carry, b"ab\xE4cd\xFFe"), "ab\u{FFFD}cd\u{FFFD}e");
        assert!(carry.is_empty());
    }

    /// A `cmpl` event whose text holds a stray lead byte.
    fn cmpl_with_stray_byte() -> Bytes {
        let mut raw = br#"data: {"event":"cmpl","text":"ab"#.to_vec();
        raw.push(0xE4);
        raw.extend_from_slice(b"cd\"}\n\n");
        Bytes::from(raw)
    }

    fn raw_stream(items: Vec<Bytes>) -> ByteStream {
        Box::pin(stream::iter(items.into_iter().map(Ok::<_, BridgeError>)))
    }

    // ── buffered mode ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_buffered_concatenates_deltas() {
        let out = buffered("kimi", vec![cmpl("Hel"), cmpl("lo"), all_done()])
            .await
            .unwrap();
        assert_eq!(message_content(&out), "Hello");
        assert_eq!(out["object"], "chat.completion");
        assert_eq!(out["id"], "sess-1");
        assert_eq!(out["model"], "kimi");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["choices"][0]["message"]["role"], "assistant");
        assert_eq!(out["usage"]["total_tokens"], 2);
    }

    #[tokio::test]
    async fn test_buffered_error_appends_notice() {
        let out = buffered("kimi", vec![cmpl("Hi"), error()]).await.unwrap();
        assert_eq!(message_content(&out), format!("Hi{REFUSAL_NOTICE}"));
    }

    #[tokio::test]
    async fn test_buffered_citation_block_in_order() {
        let out = buffered(
            "kimi",
            vec![
                search("Alpha", "https://a.example"),
                search("Beta", "https://b.example"),
                cmpl("answer"),
                all_done(),
            ],
        )
        .await
        .unwrap();
        assert_eq!(
            message_content(&out),
            "answer\n\nSearch results from:\nAlpha(https://a.example)\nBeta(https://b.example)\n"
        );
    }

    #[tokio::test]
    async fn test_buffered_silent_search_hides_citations() {
        let out = buffered(
            "kimi-silent_search",
            vec![search("Alpha", "https://a.example"), cmpl("answer"), all_done()],
        )
        .await
        .unwrap();
        assert_eq!(message_content(&out), "answer");
    }

    #[tokio::test]
    async fn test_buffered_close_without_terminal_resolves() {
        let out = buffered("kimi", vec![cmpl("part"), cmpl("ial")]).await.unwrap();
        assert_eq!(message_content(&out), "partial");
    }

    #[tokio::test]
    async fn test_buffered_malformed_event_fails() {
        let err = buffered("kimi", vec![cmpl("a"), "data: {oops\n\n".to_string(), all_done()])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::StreamMalformed(_)));
    }

    #[tokio::test]
    async fn test_buffered_transport_error_fails() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from(cmpl("a"))),
            Err(BridgeError::Http("connection reset".into())),
        ];
        let err = receive_stream("kimi", "s", Box::pin(stream::iter(items)))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Http(_)));
    }

    #[tokio::test]
    async fn test_buffered_ignores_events_after_terminal() {
        let out = buffered("kimi", vec![cmpl("a"), all_done(), cmpl("b"), error()])
            .await
            .unwrap();
        assert_eq!(message_content(&out), "a");
    }

    #[tokio::test]
    async fn test_buffered_truncates_at_replacement_char() {
        let out = buffered("kimi", vec![cmpl("ab\u{FFFD}cd"), cmpl("ef"), all_done()])
            .await
            .unwrap();
        assert_eq!(message_content(&out), "abef");
    }

    #[tokio::test]
    async fn test_buffered_reassembles_split_multibyte() {
        let raw = cmpl("你好").into_bytes();
        // Split inside the three-byte encoding of the first character.
        let at = raw.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&raw[..at])),
            Ok(Bytes::copy_from_slice(&raw[at..])),
            Ok(Bytes::from(all_done())),
        ];
        let out = receive_stream("kimi", "s", Box::pin(stream::iter(items)))
            .await
            .unwrap();
        assert_eq!(message_content(&out), "你好");
    }

    #[tokio::test]
    async fn test_buffered_invalid_utf8_truncates_and_continues() {
        let items = vec![
            Bytes::from(cmpl("Hi ")),
            cmpl_with_stray_byte(),
            Bytes::from(cmpl("more")),
            Bytes::from(all_done()),
        ];
        let out = receive_stream("kimi", "s", raw_stream(items)).await.unwrap();
        assert_eq!(message_content(&out), "Hi abmore");
    }

    #[tokio::test]
    async fn test_buffered_skips_event_without_tag() {
        let out = buffered("kimi", vec![cmpl("Hi"), sse(&json!({"id": "x"})), all_done()])
            .await
            .unwrap();
        assert_eq!(message_content(&out), "Hi");
    }

    #[tokio::test]
    async fn test_buffered_dangling_partial_char_at_close() {
        let mut tail = cmpl("ok").into_bytes();
        tail.extend_from_slice(&[0xE4, 0xBD]);
        let out = receive_stream("kimi", "s", raw_stream(vec![Bytes::from(tail)]))
            .await
            .unwrap();
        assert_eq!(message_content(&out), "ok");
    }

    // ── streaming mode ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_stream_error_sequence() {
        let out = frames("kimi", vec![cmpl("Hi"), error()]).await;
        assert_eq!(out.len(), 4);

        let init = frame_json(&out[0]);
        assert_eq!(init["object"], "chat.completion.chunk");
        assert_eq!(init["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(init["choices"][0]["delta"]["content"], "");
        assert!(init["choices"][0]["finish_reason"].is_null());

        assert_eq!(delta_content(&out[1]), "Hi");

        let last = frame_json(&out[2]);
        assert_eq!(last["choices"][0]["delta"]["content"], REFUSAL_NOTICE);
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert!(last["usage"].is_object());

        assert_eq!(out[3], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_stream_all_done_empty_final_delta() {
        let out = frames("kimi", vec![cmpl("Hel"), cmpl("lo"), all_done()]).await;
        assert_eq!(out.len(), 5);
        assert_eq!(delta_content(&out[1]), "Hel");
        assert_eq!(delta_content(&out[2]), "lo");
        let last = frame_json(&out[3]);
        assert_eq!(last["choices"][0]["delta"], json!({}));
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["id"], "sess-1");
        assert_eq!(out[4], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_stream_citations_then_newline_once() {
        let out = frames(
            "kimi-search",
            vec![
                search("Alpha", "https://a.example"),
                search("Beta", "https://b.example"),
                cmpl("x"),
                cmpl("y"),
                all_done(),
            ],
        )
        .await;
        assert_eq!(out.len(), 7);
        assert_eq!(delta_content(&out[1]), "Searching Alpha(https://a.example) ...\n");
        assert_eq!(delta_content(&out[2]), "Searching Beta(https://b.example) ...\n");
        assert_eq!(delta_content(&out[3]), "\nx");
        assert_eq!(delta_content(&out[4]), "y");
        assert_eq!(out[6], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_stream_silent_search_emits_no_citation() {
        let out = frames(
            "kimi-silent_search",
            vec![search("Alpha", "https://a.example"), cmpl("x"), all_done()],
        )
        .await;
        assert_eq!(out.len(), 4);
        assert_eq!(delta_content(&out[1]), "x");
    }

    #[tokio::test]
    async fn test_stream_close_without_terminal_emits_done() {
        let out = frames("kimi", vec![cmpl("a")]).await;
        assert_eq!(out.len(), 3);
        assert_eq!(delta_content(&out[1]), "a");
        assert_eq!(out[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_stream_malformed_event_ends_gracefully() {
        let out = frames(
            "kimi",
            vec![cmpl("a"), "data: {oops\n\n".to_string(), cmpl("never")],
        )
        .await;
        assert_eq!(out.len(), 3);
        assert_eq!(delta_content(&out[1]), "a");
        assert_eq!(out[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_stream_transport_error_emits_done() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from(cmpl("a"))),
            Err(BridgeError::Http("connection reset".into())),
            Ok(Bytes::from(cmpl("b"))),
        ];
        let out: Vec<String> = create_trans_stream("kimi", "s", Box::pin(stream::iter(items)))
            .map(|r| String::from_utf8(r.unwrap().to_vec()).unwrap())
            .collect()
            .await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_stream_ignores_events_after_terminal() {
        let out = frames("kimi", vec![all_done(), cmpl("late"), error()]).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_stream_skips_unknown_events() {
        let out = frames(
            "kimi",
            vec![
                sse(&json!({"event": "req", "id": "1"})),
                sse(&json!({"event": "ping"})),
                cmpl("a"),
                all_done(),
            ],
        )
        .await;
        assert_eq!(out.len(), 4);
        assert_eq!(delta_content(&out[1]), "a");
    }

    #[tokio::test]
    async fn test_stream_skips_event_without_tag() {
        let out = frames("kimi", vec![cmpl("Hi"), sse(&json!({"id": "x"})), all_done()]).await;
        assert_eq!(out.len(), 4);
        assert_eq!(delta_content(&out[1]), "Hi");
        assert_eq!(frame_json(&out[2])["choices"][0]["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn test_stream_invalid_utf8_truncates_and_continues() {
        let items = vec![
            Bytes::from(cmpl("Hi ")),
            cmpl_with_stray_byte(),
            Bytes::from(cmpl("more")),
            Bytes::from(all_done()),
        ];
        let out: Vec<String> = create_trans_stream("kimi", "s", raw_stream(items))
            .map(|r| String::from_utf8(r.unwrap().to_vec()).unwrap())
            .collect()
            .await;
        assert_eq!(out.len(), 6);
        assert_eq!(delta_content(&out[1]), "Hi ");
        assert_eq!(delta_content(&out[2]), "ab");
        assert_eq!(delta_content(&out[3]), "more");
        assert_eq!(frame_json(&out[4])["choices"][0]["finish_reason"], "stop");
        assert_eq!(out[5], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_stream_truncates_at_replacement_char() {
        let out = frames("kimi", vec![cmpl("ok\u{FFFD}garbage"), all_done()]).await;
        assert_eq!(delta_content(&out[1]), "ok");
    }
}
