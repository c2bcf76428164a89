use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /v1/models`: the static list of six model ids the router and the
/// pass-through path understand (§6) — the three routed tiers, the two
/// aliases that select among them, and one legacy id accepted for
/// pass-through compatibility with older Anthropic SDK defaults.
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let routing = &state.settings.routing;
    let models = [
        routing.opus_model.clone(),
        routing.sonnet_model.clone(),
        routing.haiku_model.clone(),
        "default".to_string(),
        "auto".to_string(),
        "claude-3-5-haiku-20241022".to_string(),
    ];

    Json(json!({
        "object": "list",
        "data": models.into_iter().map(|id| json!({"id": id, "object": "model"})).collect::<Vec<_>>(),
    }))
}
