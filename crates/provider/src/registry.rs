//! Model registry.
//!
//! Every model is served by the same web chat; the name only changes how the
//! response is rendered (`silent_search` hides citations).

/// Model identifiers advertised on `/v1/models`.
pub const MODELS: &[&str] = &[
    "kimi",
    "kimi-search",
    "kimi-research",
    "kimi-k1",
    "kimi-math",
    "kimi-silent_search",
];

/// Returns the list of advertised model identifiers.
#[must_use]
pub fn kimi_models() -> Vec<String> {
    MODELS.iter().map(|m| (*m).to_string()).collect()
}
