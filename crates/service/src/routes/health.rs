use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Backs `GET /`, `GET /v1/health` and `GET /api/v1/health` (§6): all three
/// paths return the same liveness snapshot.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "gateway-service",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "native_tools_enabled": state.settings.native_tools_enabled,
        "summary_cache_entries": state.summary_cache.len(),
        "pending_context_tasks": state.context_manager.pending_count(),
    }))
}
