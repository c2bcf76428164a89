use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

/// `GET /admin/routing/stats` (§4.5, §6): exposes the running tally of
/// routing decisions as percentages, for operators tuning
/// `BASE_OPUS_PROBABILITY` without reading logs.
pub async fn routing_stats(State(state): State<AppState>) -> Response {
    let stats = state.router_stats.lock().expect("router stats mutex poisoned");
    let (opus_pct, sonnet_pct, haiku_pct, passthrough_pct) = stats.percentages();

    Json(json!({
        "total_requests": stats.total,
        "opus_percent": opus_pct,
        "sonnet_percent": sonnet_pct,
        "haiku_percent": haiku_pct,
        "passthrough_percent": passthrough_pct,
        "opus_degraded": stats.opus_degraded,
    }))
    .into_response()
}

/// `POST /admin/routing/reset` (§6): zeroes the routing stats counters.
pub async fn reset_routing_stats(State(state): State<AppState>) -> Response {
    *state.router_stats.lock().expect("router stats mutex poisoned") = crate::state::RouterStats::default();
    Json(json!({"status": "ok"})).into_response()
}

/// `GET /admin/config` (§6): a snapshot of the live, operator-tunable
/// settings (history thresholds plus the fixed startup configuration).
pub async fn config_snapshot(State(state): State<AppState>) -> Response {
    let history = state.current_history_config();
    Json(json!({
        "history": {
            "max_messages": history.max_messages,
            "max_chars": history.max_chars,
            "summary_threshold_chars": history.summary_threshold_chars,
            "keep_recent": history.keep_recent,
            "retry_max_messages": history.retry_max_messages,
            "max_retries": history.max_retries,
            "estimate_threshold_chars": history.estimate_threshold_chars,
        },
        "routing_enabled": state.settings.routing.enabled,
        "continuation_enabled": state.settings.continuation.enabled,
        "native_tools_enabled": state.settings.native_tools_enabled,
        "context_enhancement_enabled": state.settings.context_enhancement.enabled,
    }))
    .into_response()
}

/// `GET /admin/async-summary/stats` (§6, §4.8): a snapshot of the
/// background context-extraction task manager.
pub async fn async_summary_stats(State(state): State<AppState>) -> Response {
    let (started, completed, dropped_pending_full) = state.context_manager.stats_snapshot();
    Json(json!({
        "pending_tasks": state.context_manager.pending_count(),
        "max_pending_tasks": state.settings.async_summary.max_pending_tasks,
        "started": started,
        "completed": completed,
        "dropped_pending_full": dropped_pending_full,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct HistoryConfigPatch {
    pub max_messages: Option<usize>,
    pub max_chars: Option<usize>,
    pub summary_threshold_chars: Option<usize>,
    pub keep_recent: Option<usize>,
}

/// `POST /admin/config/history` (§6): allows an operator to retune the
/// bounded-context thresholds at runtime without a restart. Only the
/// history-manager knobs are mutable; everything else (auth, pool sizing)
/// stays fixed at startup per §5.
pub async fn patch_history_config(
    State(state): State<AppState>,
    Json(patch): Json<HistoryConfigPatch>,
) -> Response {
    let mut history = state.history_config.write().expect("history config lock poisoned");
    if let Some(v) = patch.max_messages {
        history.max_messages = v;
    }
    if let Some(v) = patch.max_chars {
        history.max_chars = v;
    }
    if let Some(v) = patch.summary_threshold_chars {
        history.summary_threshold_chars = v;
    }
    if let Some(v) = patch.keep_recent {
        history.keep_recent = v;
    }

    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}
