//! Models listing handler — returns available models in `OpenAI` format.

use axum::Json;
use kimi_bridge_provider::kimi_models;
use serde_json::{Value, json};

/// Handles `GET /v1/models` requests.
pub async fn list_models() -> Json<Value> {
    let data: Vec<Value> = kimi_models()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": 0,
                "owned_by": "kimi-bridge",
            })
        })
        .collect();

    Json(json!({
        "object": "list",
        "data": data,
    }))
}
