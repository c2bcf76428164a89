use axum::response::sse::Event;
use gateway_core::streaming::StreamEvent;
use serde_json::json;

/// Frames a normalized [`StreamEvent`] as an Anthropic-shaped SSE event:
/// `event: <name>` plus a `data:` line carrying the matching JSON payload.
pub fn frame_anthropic_event(event: &StreamEvent) -> Event {
    match event {
        StreamEvent::MessageStart { id, model } => Event::default().event("message_start").data(
            json!({
                "type": "message_start",
                "message": {"id": id, "type": "message", "role": "assistant", "model": model, "content": []}
            })
            .to_string(),
        ),
        StreamEvent::ContentBlockStart { index, block } => Event::default().event("content_block_start").data(
            json!({"type": "content_block_start", "index": index, "content_block": block}).to_string(),
        ),
        StreamEvent::TextDelta { index, text } => Event::default().event("content_block_delta").data(
            json!({"type": "content_block_delta", "index": index, "delta": {"type": "text_delta", "text": text}})
                .to_string(),
        ),
        StreamEvent::ThinkingDelta { index, text } => Event::default().event("content_block_delta").data(
            json!({"type": "content_block_delta", "index": index, "delta": {"type": "thinking_delta", "thinking": text}})
                .to_string(),
        ),
        StreamEvent::ToolInputDelta { index, partial_json } => Event::default().event("content_block_delta").data(
            json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "input_json_delta", "partial_json": partial_json}
            })
            .to_string(),
        ),
        StreamEvent::ContentBlockStop { index } => Event::default()
            .event("content_block_stop")
            .data(json!({"type": "content_block_stop", "index": index}).to_string()),
        StreamEvent::MessageDelta { stop_reason, output_tokens } => {
            Event::default().event("message_delta").data(
                json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": stop_reason},
                    "usage": {"output_tokens": output_tokens}
                })
                .to_string(),
            )
        }
        StreamEvent::MessageStop => {
            Event::default().event("message_stop").data(json!({"type": "message_stop"}).to_string())
        }
        StreamEvent::SwitchedToBuffered => Event::default()
            .event("content_block_delta")
            .data(json!({"type": "content_block_delta", "note": "switched_to_buffered"}).to_string()),
    }
}

/// Serializes gateway errors occurring mid-stream as an SSE `error` event
/// rather than an HTTP error status, since headers are already committed.
pub fn frame_error_event(body: serde_json::Value) -> Event {
    Event::default().event("error").data(body.to_string())
}
