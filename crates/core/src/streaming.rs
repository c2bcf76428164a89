//! SSE pipeline event model (§4.6). Framework-agnostic: this module only
//! produces [`StreamEvent`] values and accumulates them into a finished
//! message; the `service` crate is responsible for framing them as actual
//! `text/event-stream` bytes.

use crate::config::StreamingConfig;
use crate::model::{ContentBlock, TruncationReason};
use crate::tool_parser;

/// One event in the normalized Anthropic-shaped SSE sequence. A full
/// response is `MessageStart`, then for each content block a
/// `ContentBlockStart`/`ContentBlockDelta*`/`ContentBlockStop` run, then
/// `MessageDelta`, then `MessageStop`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart { id: String, model: String },
    ContentBlockStart { index: usize, block: ContentBlock },
    TextDelta { index: usize, text: String },
    ThinkingDelta { index: usize, text: String },
    ToolInputDelta { index: usize, partial_json: String },
    ContentBlockStop { index: usize },
    MessageDelta { stop_reason: String, output_tokens: u32 },
    MessageStop,
    /// Surfaced when pass-through streaming is abandoned mid-response and the
    /// pipeline must re-buffer the remainder (§4.6 buffering-mode fallback).
    SwitchedToBuffered,
}

/// Splits `text` into `ContentBlockDelta`-sized chunks honoring the
/// configured chunk size and code-point safety.
pub fn chunk_text_deltas(index: usize, text: &str, config: &StreamingConfig) -> Vec<StreamEvent> {
    tool_parser::iter_text_chunks(text, config.text_chunk_size)
        .into_iter()
        .map(|chunk| StreamEvent::TextDelta { index, text: chunk })
        .collect()
}

pub fn chunk_thinking_deltas(index: usize, text: &str, config: &StreamingConfig) -> Vec<StreamEvent> {
    tool_parser::iter_text_chunks(text, config.thinking_chunk_size)
        .into_iter()
        .map(|chunk| StreamEvent::ThinkingDelta { index, text: chunk })
        .collect()
}

pub fn chunk_tool_json_deltas(index: usize, json: &str, config: &StreamingConfig) -> Vec<StreamEvent> {
    tool_parser::iter_text_chunks(json, config.tool_json_chunk_size)
        .into_iter()
        .map(|chunk| StreamEvent::ToolInputDelta { index, partial_json: chunk })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorMode {
    PassThrough,
    Buffering,
}

/// Implements the §4.6 streaming state machine. Raw text deltas are forwarded
/// as `TextDelta` events while the accumulated text looks like plain prose;
/// the moment it contains the literal substring `"[Calling tool:"` the
/// detector stops forwarding and silently buffers everything from there on.
/// Once the caller's upstream stream ends, [`finish`](Self::finish) runs the
/// inline tool parser over the buffered tail (after stripping any fabricated
/// `[Tool Result]` the model wrote for its own invented call) and emits the
/// `ContentBlockStart`/delta/`ContentBlockStop` run for whatever text and
/// tool-use blocks it recovers, continuing the block index sequence from
/// wherever pass-through left off.
pub struct InlineToolDetector {
    mode: DetectorMode,
    buffer: String,
    forwarded_len: usize,
    next_index: usize,
    text_block_open: bool,
    config: StreamingConfig,
}

impl InlineToolDetector {
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            mode: DetectorMode::PassThrough,
            buffer: String::new(),
            forwarded_len: 0,
            next_index: 0,
            text_block_open: false,
            config,
        }
    }

    pub fn is_buffering(&self) -> bool {
        self.mode == DetectorMode::Buffering
    }

    /// Feeds one incoming raw text delta, returning whatever events should
    /// be emitted right now (empty once buffering mode has kicked in).
    pub fn push_delta(&mut self, delta: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(delta);
        if self.mode == DetectorMode::Buffering {
            return Vec::new();
        }

        let marker = self.buffer.find("[Calling tool:");
        let forward_end = marker.unwrap_or(self.buffer.len());
        let to_forward = &self.buffer[self.forwarded_len..forward_end];

        let mut events = Vec::new();
        if !to_forward.is_empty() && !self.text_block_open {
            events.push(StreamEvent::ContentBlockStart {
                index: self.next_index,
                block: ContentBlock::Text { text: String::new() },
            });
            self.text_block_open = true;
        }
        events.extend(chunk_text_deltas(self.next_index, to_forward, &self.config));
        self.forwarded_len = forward_end;

        if marker.is_some() {
            if self.text_block_open {
                events.push(StreamEvent::ContentBlockStop { index: self.next_index });
                self.next_index += 1;
                self.text_block_open = false;
            }
            self.mode = DetectorMode::Buffering;
        }
        events
    }

    /// Runs once the upstream stream ends. Consumes `self` since it only
    /// makes sense to call once.
    pub fn finish(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if self.mode == DetectorMode::PassThrough {
            if self.text_block_open {
                events.push(StreamEvent::ContentBlockStop { index: self.next_index });
            }
            return events;
        }

        let unforwarded = &self.buffer[self.forwarded_len..];
        let unforwarded = tool_parser::strip_hallucinated_tool_result(unforwarded);
        let outcome = tool_parser::parse_inline_tool_blocks(&unforwarded);

        if !outcome.remaining_text.trim().is_empty() {
            events.push(StreamEvent::ContentBlockStart {
                index: self.next_index,
                block: ContentBlock::Text { text: String::new() },
            });
            events.extend(chunk_text_deltas(self.next_index, &outcome.remaining_text, &self.config));
            events.push(StreamEvent::ContentBlockStop { index: self.next_index });
            self.next_index += 1;
        }

        for call in outcome.calls {
            events.push(StreamEvent::ContentBlockStart {
                index: self.next_index,
                block: ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: serde_json::Value::Object(Default::default()),
                },
            });
            events.extend(chunk_tool_json_deltas(self.next_index, &call.input.to_string(), &self.config));
            events.push(StreamEvent::ContentBlockStop { index: self.next_index });
            self.next_index += 1;
        }

        events
    }
}

/// Accumulates a stream of [`StreamEvent`]s into the final message text and
/// tool-use blocks, used both for buffered-mode responses and for
/// truncation detection once a stream ends (§4.6, §4.7).
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pub text: String,
    pub thinking: String,
    pub tool_json_by_index: std::collections::BTreeMap<usize, String>,
    pub stop_reason: Option<String>,
    pub interrupted: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text, .. } => self.text.push_str(text),
            StreamEvent::ThinkingDelta { text, .. } => self.thinking.push_str(text),
            StreamEvent::ToolInputDelta { index, partial_json } => {
                self.tool_json_by_index.entry(*index).or_default().push_str(partial_json);
            }
            StreamEvent::MessageDelta { stop_reason, .. } => {
                self.stop_reason = Some(stop_reason.clone());
            }
            StreamEvent::SwitchedToBuffered => self.interrupted = false,
            _ => {}
        }
    }

    /// Whether the accumulated stream looks like it ended without a proper
    /// `MessageStop`, the streaming analogue of [`crate::continuation::detect_truncation`].
    pub fn looks_interrupted(&self) -> bool {
        self.interrupted && self.stop_reason.is_none()
    }

    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub fn truncation_reason_hint(&self) -> TruncationReason {
        if self.looks_interrupted() {
            TruncationReason::StreamInterrupted
        } else {
            TruncationReason::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StreamingConfig {
        StreamingConfig { text_chunk_size: 4, tool_json_chunk_size: 4, thinking_chunk_size: 4 }
    }

    #[test]
    fn text_deltas_chunk_by_configured_size() {
        let events = chunk_text_deltas(0, "abcdefgh", &config());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::TextDelta { index: 0, text: "abcd".into() });
    }

    #[test]
    fn accumulator_reassembles_text_across_deltas() {
        let mut acc = StreamAccumulator::new();
        for event in chunk_text_deltas(0, "hello world", &config()) {
            acc.apply(&event);
        }
        assert_eq!(acc.text, "hello world");
    }

    #[test]
    fn accumulator_tracks_tool_json_per_index() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&StreamEvent::ToolInputDelta { index: 0, partial_json: "{\"a\":".into() });
        acc.apply(&StreamEvent::ToolInputDelta { index: 0, partial_json: "1}".into() });
        assert_eq!(acc.tool_json_by_index.get(&0).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn interrupted_stream_without_stop_reason_is_flagged() {
        let mut acc = StreamAccumulator::new();
        acc.mark_interrupted();
        assert!(acc.looks_interrupted());
        assert_eq!(acc.truncation_reason_hint(), TruncationReason::StreamInterrupted);
    }

    #[test]
    fn stream_with_message_delta_is_not_interrupted() {
        let mut acc = StreamAccumulator::new();
        acc.mark_interrupted();
        acc.apply(&StreamEvent::MessageDelta { stop_reason: "end_turn".into(), output_tokens: 12 });
        assert!(!acc.looks_interrupted());
    }

    #[test]
    fn detector_passes_plain_text_through_as_it_arrives() {
        let mut detector = InlineToolDetector::new(config());
        let mut events = detector.push_delta("hello ");
        events.extend(detector.push_delta("world"));
        assert!(!detector.is_buffering());
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ContentBlockStart { .. })));
        let forwarded: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(forwarded, "hello world");
        let finish_events = detector.finish();
        assert_eq!(finish_events, vec![StreamEvent::ContentBlockStop { index: 0 }]);
    }

    #[test]
    fn detector_switches_to_buffering_on_calling_tool_marker() {
        let mut detector = InlineToolDetector::new(config());
        let mut events = detector.push_delta("Let me check. [Calling tool:");
        assert!(detector.is_buffering());
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ContentBlockStop { index: 0 })));
        events.extend(detector.push_delta(" Read]\nInput: {\"file_path\": \"/x\"}"));
        assert!(events.is_empty() || events.iter().all(|e| !matches!(e, StreamEvent::TextDelta { .. })));

        let final_events = detector.finish();
        assert!(final_events.iter().any(|e| matches!(e,
            StreamEvent::ContentBlockStart { block: ContentBlock::ToolUse { name, .. }, .. } if name == "Read"
        )));
    }

    #[test]
    fn detector_strips_hallucinated_tool_result_before_parsing() {
        let mut detector = InlineToolDetector::new(config());
        detector.push_delta("[Calling tool: search]\nInput: {\"q\": \"x\"}\n[Tool Result]\nmade up");
        let events = detector.finish();
        let tool_use_count =
            events.iter().filter(|e| matches!(e, StreamEvent::ContentBlockStart { block: ContentBlock::ToolUse { .. }, .. })).count();
        assert_eq!(tool_use_count, 1);
    }
}
