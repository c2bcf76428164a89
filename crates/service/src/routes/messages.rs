use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use std::time::Duration;

use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream;
use gateway_core::continuation::{self, StopReason};
use gateway_core::error::GatewayError;
use gateway_core::history;
use gateway_core::model::{ContentBlock, Message, MessageContent, Request, Role};
use gateway_core::router::{self, RoutingInput};
use gateway_core::session::{self, SessionIdentity};
use gateway_core::translator::kiro;
use serde_json::json;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::sse::frame_anthropic_event;
use crate::state::AppState;
use crate::upstream;

/// `POST /v1/messages`: the Anthropic Messages API surface (§6). Applies
/// history trimming, model routing and continuation splicing before handing
/// off to the Kiro-native upstream, then translates the reply back.
pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<Request>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let identity = SessionIdentity {
        conversation_id: header_str(&headers, "x-conversation-id"),
        client_id: header_str(&headers, "x-client-id"),
    };
    let session_id = session::generate_session_id(&request.messages, &identity);

    let span = info_span!("messages", request_id = %request_id, session_id = %session_id);
    async move {
        info!(model = %request.model, stream = request.stream, "handling messages request");

        apply_history_strategy(&mut request, &state, &session_id, &request_id).await;

        let mut decision = router::route(
            &RoutingInput {
                requested_model: &request.model,
                session_id: &session_id,
                messages: &request.messages,
                tool_executions_this_session: count_tool_executions(&request.messages),
                thinking_requested: request.thinking.is_some(),
            },
            &state.settings.routing,
        );
        let _opus_permit = downgrade_if_opus_saturated(&state, &mut decision);
        state.router_stats.lock().expect("router stats mutex poisoned").record(&decision, &state.settings);
        request.model = decision.routed_model.clone();

        if request.stream {
            handle_streaming(state, request, request_id).await
        } else {
            handle_buffered(state, request, request_id).await.into_response()
        }
    }
    .instrument(span)
    .await
}

/// If the router picked Opus, try to reserve a concurrency slot; on
/// saturation downgrade the decision to Sonnet with reason `opus_degraded`
/// (§4.5). Returns the held permit, if any, so the caller can keep it alive
/// for the request's lifetime.
pub(crate) fn downgrade_if_opus_saturated(
    state: &AppState,
    decision: &mut gateway_core::model::RoutingDecision,
) -> Option<tokio::sync::OwnedSemaphorePermit> {
    if decision.routed_model != state.settings.routing.opus_model {
        return None;
    }
    match state.try_acquire_opus_permit() {
        Some(permit) => Some(permit),
        None => {
            state.router_stats.lock().expect("router stats mutex poisoned").record_opus_degraded();
            decision.routed_model = state.settings.routing.sonnet_model.clone();
            decision.reason = "opus_degraded".to_string();
            None
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn count_tool_executions(messages: &[Message]) -> usize {
    messages
        .iter()
        .flat_map(|m| m.blocks())
        .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
        .count()
}

async fn apply_history_strategy(request: &mut Request, state: &AppState, session_id: &str, request_id: &str) {
    let config = state.current_history_config();
    if !history::needs_trimming(&request.messages, &config) {
        return;
    }

    let messages = std::mem::take(&mut request.messages);

    let outcome = if history::total_chars(&messages) > config.summary_threshold_chars {
        history::smart_summary(messages, &config)
    } else {
        history::auto_truncate(messages, &config)
    };

    if outcome.summary_needed {
        let summary = if let Some(cached) = state.summary_cache.get(session_id) {
            cached.summary
        } else {
            let generated = generate_summary(state, &outcome.dropped_messages, request_id)
                .await
                .unwrap_or_else(|| "(summary unavailable)".to_string());
            state.summary_cache.put(
                session_id,
                gateway_core::model::SummaryCacheEntry {
                    summary: generated.clone(),
                    old_history_count: outcome.dropped_count,
                    old_history_chars: outcome.dropped_chars,
                    updated_at: chrono::Utc::now(),
                },
            );
            generated
        };
        let mut summarized = vec![summary_message(&summary)];
        summarized.extend(outcome.messages);
        request.messages = summarized;
        return;
    }

    request.messages = outcome.messages;
}

/// Calls the configured summarization model on the messages a trimming pass
/// dropped (`SMART_SUMMARY`, §4.2). Returns `None` on any upstream failure or
/// timeout so the caller can fall back to a placeholder rather than fail the
/// whole turn over a summary.
async fn generate_summary(state: &AppState, dropped: &[Message], request_id: &str) -> Option<String> {
    if dropped.is_empty() {
        return None;
    }

    let transcript: String = dropped
        .iter()
        .map(|m| format!("{:?}: {}", m.role, kiro::extract_text_content(&m.blocks())))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = Request {
        model: state.settings.async_summary.model.clone(),
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Text(format!(
                "Summarize the conversation below in a few sentences, preserving any decisions and facts a later turn would need:\n\n{transcript}"
            )),
        }],
        system: None,
        tools: Vec::new(),
        tool_choice: None,
        max_tokens: 512,
        temperature: None,
        top_p: None,
        top_k: None,
        stop_sequences: Vec::new(),
        stream: false,
        metadata: None,
        thinking: None,
    };

    let kiro_request = kiro::convert_anthropic_to_kiro(&prompt);
    let kiro_body = json!({
        "modelId": kiro_request.model_id,
        "systemPrompt": kiro_request.system_prompt,
        "history": kiro_request.history,
        "tools": kiro_request.tools,
        "maxTokens": prompt.max_tokens,
    });

    let timeout = Duration::from_secs(state.settings.async_summary.task_timeout_secs);
    let raw = match tokio::time::timeout(timeout, upstream::call_kiro(state, &kiro_body, request_id)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(err)) => {
            tracing::warn!(%err, "summary generation failed");
            return None;
        }
        Err(_) => {
            tracing::warn!("summary generation timed out");
            return None;
        }
    };

    let converted = kiro::convert_kiro_response_to_anthropic(&raw);
    let summary = kiro::extract_text_content(&converted.content);
    if summary.trim().is_empty() {
        None
    } else {
        Some(summary)
    }
}

fn summary_message(summary: &str) -> Message {
    Message {
        role: Role::User,
        content: MessageContent::Text(format!("Summary of earlier conversation:\n{summary}")),
    }
}

async fn handle_buffered(state: AppState, request: Request, request_id: String) -> Response {
    let input_tokens = gateway_core::token::estimate_messages_tokens(&request.messages);
    match run_with_continuations(&state, request.clone(), &request_id).await {
        Ok(converted) => {
            let body = render_anthropic_message(&request_id, &request.model, &converted, input_tokens);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// Dispatches the initial turn to the Kiro upstream, reshrinking the history
/// and resubmitting if the upstream rejects the request for exceeding its
/// context window (`ERROR_RETRY`, §4.2/§7), up to `max_retries` attempts.
pub(crate) async fn call_kiro_with_error_retry(
    state: &AppState,
    request: &Request,
    request_id: &str,
) -> Result<serde_json::Value, GatewayError> {
    let history_config = state.current_history_config();
    let mut messages = request.messages.clone();
    let mut retry_count = 0u32;

    loop {
        let turn = Request { messages: messages.clone(), ..request.clone() };
        let kiro_request = kiro::convert_anthropic_to_kiro(&turn);
        let kiro_body = json!({
            "modelId": kiro_request.model_id,
            "systemPrompt": kiro_request.system_prompt,
            "history": kiro_request.history,
            "tools": kiro_request.tools,
            "maxTokens": turn.max_tokens,
        });

        match upstream::call_kiro(state, &kiro_body, request_id).await {
            Ok(raw) => return Ok(raw),
            Err(GatewayError::Upstream { message, .. })
                if retry_count < history_config.max_retries
                    && history::is_content_length_error(&message) =>
            {
                tracing::warn!(retry_count, %message, "upstream rejected request for context length, shrinking history");
                let outcome = history::error_retry(messages, &history_config, retry_count);
                messages = outcome.messages;
                retry_count += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn run_with_continuations(
    state: &AppState,
    request: Request,
    request_id: &str,
) -> Result<kiro::KiroResponse, GatewayError> {
    let raw = call_kiro_with_error_retry(state, &request, request_id).await?;
    let mut converted = kiro::convert_kiro_response_to_anthropic(&raw);

    let mut attempts = 0;
    let mut consecutive_failures = 0;
    let config = &state.settings.continuation;

    loop {
        let text: String = converted
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let stop_reason = match converted.stop_reason.as_str() {
            "max_tokens" => StopReason::MaxTokens,
            "tool_use" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        };
        // The Kiro HTTP call has already completed by the time `raw`/`converted`
        // exist at this layer, so stream interruption never applies here.
        let truncation = continuation::detect_truncation(&text, true, stop_reason, config);

        if !truncation.is_truncated || !continuation::should_continue(attempts, consecutive_failures, config) {
            break;
        }
        if !continuation::is_valid_for_continuation(&text, config) {
            break;
        }

        attempts += 1;
        let mut follow_up = request.clone();
        follow_up.max_tokens = config.continuation_max_tokens;
        follow_up.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(converted.content.clone()),
        });
        follow_up.messages.push(Message {
            role: Role::User,
            content: MessageContent::Text("Continue exactly where you left off.".to_string()),
        });

        let follow_up_kiro = kiro::convert_anthropic_to_kiro(&follow_up);
        let follow_up_body = json!({
            "modelId": follow_up_kiro.model_id,
            "systemPrompt": follow_up_kiro.system_prompt,
            "history": follow_up_kiro.history,
            "tools": follow_up_kiro.tools,
            "maxTokens": follow_up.max_tokens,
        });

        match upstream::call_kiro(state, &follow_up_body, request_id).await {
            Ok(raw_continuation) => {
                consecutive_failures = 0;
                let continuation_converted = kiro::convert_kiro_response_to_anthropic(&raw_continuation);
                let continuation_text: String = continuation_converted
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.clone()),
                        _ => None,
                    })
                    .collect();

                let merged_text = continuation::merge_continuation(&text, &continuation_text, 2000);
                converted.content = vec![ContentBlock::Text { text: merged_text }];
                converted.content.extend(
                    continuation_converted.content.into_iter().filter(|b| !matches!(b, ContentBlock::Text { .. })),
                );
                converted.stop_reason = continuation_converted.stop_reason;
            }
            Err(err) => {
                consecutive_failures += 1;
                if let GatewayError::Upstream { kind, .. } = &err {
                    if !kind.is_retryable() {
                        break;
                    }
                }
            }
        }
    }

    // Never surface a raw max_tokens stop reason to the client (§4.7, §7): the
    // continuation engine either resolved it above or is giving up, and either
    // way the client should see a clean end_turn rather than an apparent error.
    if converted.stop_reason == "max_tokens" {
        converted.stop_reason = "end_turn".to_string();
    }

    Ok(converted)
}

fn render_anthropic_message(
    id: &str,
    model: &str,
    response: &kiro::KiroResponse,
    input_tokens: u32,
) -> serde_json::Value {
    let output_tokens = gateway_core::token::estimate_content_tokens(&response.content).max(1);
    json!({
        "id": format!("msg_{}", id.replace('-', "")),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": response.content,
        "stop_reason": response.stop_reason,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
        },
    })
}

async fn handle_streaming(state: AppState, request: Request, request_id: String) -> Response {
    let config = state.settings.streaming.clone();
    let message_id = format!("msg_{}", request_id.replace('-', ""));
    let model = request.model.clone();

    let result = run_with_continuations(&state, request, &request_id).await;

    let events: Vec<Result<axum::response::sse::Event, std::convert::Infallible>> = match result {
        Ok(converted) => {
            let stop_reason = converted.stop_reason.clone();
            let output_tokens = gateway_core::token::estimate_content_tokens(&converted.content).max(1);

            let mut events = vec![Ok(frame_anthropic_event(&gateway_core::streaming::StreamEvent::MessageStart {
                id: message_id,
                model,
            }))];
            for event in stream_content_block_events(&converted.content, &config) {
                events.push(Ok(frame_anthropic_event(&event)));
            }
            events.push(Ok(frame_anthropic_event(&gateway_core::streaming::StreamEvent::MessageDelta {
                stop_reason,
                output_tokens,
            })));
            events.push(Ok(frame_anthropic_event(&gateway_core::streaming::StreamEvent::MessageStop)));
            events
        }
        Err(err) => vec![Ok(crate::sse::frame_error_event(err.to_anthropic_body()))],
    };

    Sse::new(stream::iter(events))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
        .into_response()
}

/// Emits a full `ContentBlockStart`/delta-run/`ContentBlockStop` sequence per
/// block in `content` (§4.6), rather than chunking only the first text block.
/// The upstream Kiro call has already completed by this point, so this
/// simulates the deltas a genuinely incremental stream would have produced.
fn stream_content_block_events(
    content: &[ContentBlock],
    config: &gateway_core::config::StreamingConfig,
) -> Vec<gateway_core::streaming::StreamEvent> {
    use gateway_core::streaming::{chunk_text_deltas, chunk_thinking_deltas, chunk_tool_json_deltas, StreamEvent};

    let mut events = Vec::new();
    for (index, block) in content.iter().enumerate() {
        match block {
            ContentBlock::Text { text } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    block: ContentBlock::Text { text: String::new() },
                });
                events.extend(chunk_text_deltas(index, text, config));
                events.push(StreamEvent::ContentBlockStop { index });
            }
            ContentBlock::Thinking { thinking } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    block: ContentBlock::Thinking { thinking: String::new() },
                });
                events.extend(chunk_thinking_deltas(index, thinking, config));
                events.push(StreamEvent::ContentBlockStop { index });
            }
            ContentBlock::ToolUse { id, name, input } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    block: ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: serde_json::Value::Object(Default::default()),
                    },
                });
                events.extend(chunk_tool_json_deltas(index, &input.to_string(), config));
                events.push(StreamEvent::ContentBlockStop { index });
            }
            other => {
                events.push(StreamEvent::ContentBlockStart { index, block: other.clone() });
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }
    }
    events
}

fn error_response(err: GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_anthropic_body())).into_response()
}
