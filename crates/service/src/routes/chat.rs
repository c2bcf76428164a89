use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::error::GatewayError;
use gateway_core::router::{self, RoutingInput};
use gateway_core::session::{self, SessionIdentity};
use gateway_core::translator::{self, kiro};
use serde_json::{json, Value};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::state::AppState;

/// `POST /v1/chat/completions`: the OpenAI-compatible surface (§6). Ingests
/// an OpenAI-shaped body, converts it to the canonical request model, and
/// reuses the same Kiro round trip the Anthropic surface uses, translating
/// the reply back to OpenAI's shape on the way out.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let mut request = translator::openai_request_to_canonical(&body);

    let identity = SessionIdentity {
        conversation_id: header_str(&headers, "x-conversation-id"),
        client_id: header_str(&headers, "x-client-id"),
    };
    let session_id = session::generate_session_id(&request.messages, &identity);

    let span = info_span!("chat_completions", request_id = %request_id, session_id = %session_id);
    async move {
        info!(model = %request.model, "handling chat completions request");

        let mut decision = router::route(
            &RoutingInput {
                requested_model: &request.model,
                session_id: &session_id,
                messages: &request.messages,
                tool_executions_this_session: 0,
                thinking_requested: request.thinking.is_some(),
            },
            &state.settings.routing,
        );
        let _opus_permit = crate::routes::messages::downgrade_if_opus_saturated(&state, &mut decision);
        state.router_stats.lock().expect("router stats mutex poisoned").record(&decision, &state.settings);
        request.model = decision.routed_model.clone();

        match crate::routes::messages::call_kiro_with_error_retry(&state, &request, &request_id).await {
            Ok(raw) => {
                let converted = kiro::convert_kiro_response_to_anthropic(&raw);
                let text: String = converted
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        gateway_core::model::ContentBlock::Text { text } => Some(text.clone()),
                        _ => None,
                    })
                    .collect();

                let finish_reason = match converted.stop_reason.as_str() {
                    "max_tokens" => "length",
                    "tool_use" => "tool_calls",
                    _ => "stop",
                };

                Json(json!({
                    "id": format!("chatcmpl-{request_id}"),
                    "object": "chat.completion",
                    "model": request.model,
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": text},
                        "finish_reason": finish_reason,
                    }],
                }))
                .into_response()
            }
            Err(err) => error_response(err),
        }
    }
    .instrument(span)
    .await
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn error_response(err: GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_openai_body())).into_response()
}
