use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::model::Request;
use gateway_core::token;
use serde_json::json;

use crate::state::AppState;

/// `POST /v1/messages/count_tokens` (§11 supplemented feature): estimates
/// token usage with the same dual-rate heuristic used for history-bound
/// decisions, rather than a flat `chars / 4`.
pub async fn count_tokens(State(_state): State<AppState>, Json(request): Json<Request>) -> Response {
    let mut messages = request.messages;
    if let Some(system) = request.system {
        messages.insert(
            0,
            gateway_core::model::Message { role: gateway_core::model::Role::System, content: system },
        );
    }

    let estimated = token::estimate_messages_tokens(&messages);
    Json(json!({"input_tokens": estimated})).into_response()
}
