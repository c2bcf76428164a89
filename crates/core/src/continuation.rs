//! Truncation detection and continuation splicing (§4.7). When a response
//! hits `max_tokens` or otherwise looks cut off mid-structure, the gateway
//! can issue a follow-up request and merge the reply back onto the
//! truncated one, presenting a single complete response to the caller.

use crate::config::ContinuationConfig;
use crate::model::{ContentBlock, TruncationInfo, TruncationReason};
use crate::tool_parser;

/// What the upstream reported about why generation stopped, normalized
/// across the Anthropic/OpenAI/Kiro stop-reason vocabularies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
    Other,
}

/// Inspects a completed (non-streaming) assistant turn and decides whether
/// it looks truncated, and why (§4.7, in the order the checks there are
/// listed: stream state, stop reason, then successively weaker textual
/// evidence of a cut-off structure).
pub fn detect_truncation(
    text: &str,
    stream_completed: bool,
    stop_reason: StopReason,
    config: &ContinuationConfig,
) -> TruncationInfo {
    if text.trim().chars().count() < config.min_text_length {
        return TruncationInfo::default();
    }

    let ending: String = {
        let chars: Vec<char> = text.chars().collect();
        let start = chars.len().saturating_sub(config.truncated_ending_chars);
        chars[start..].iter().collect()
    };

    if !stream_completed {
        return TruncationInfo {
            is_truncated: true,
            reason: TruncationReason::StreamInterrupted,
            confidence: 1.0,
            truncated_ending: ending,
            ..Default::default()
        };
    }

    if config.trigger_max_tokens && stop_reason == StopReason::MaxTokens {
        return TruncationInfo {
            is_truncated: true,
            reason: TruncationReason::MaxTokensReached,
            confidence: 1.0,
            truncated_ending: ending,
            ..Default::default()
        };
    }

    if has_unclosed_code_fence(text) {
        return TruncationInfo {
            is_truncated: true,
            reason: TruncationReason::IncompleteCodeBlock,
            confidence: 0.95,
            truncated_ending: ending,
            ..Default::default()
        };
    }

    if config.trigger_incomplete_tool_json && has_unbalanced_calling_tool(text) {
        return TruncationInfo {
            is_truncated: true,
            reason: TruncationReason::IncompleteToolCall,
            confidence: 0.90,
            truncated_ending: ending,
            ..Default::default()
        };
    }

    let tail_window = tail_chars(text, 1000);
    if has_unclosed_brackets(&tail_window) {
        return TruncationInfo {
            is_truncated: true,
            reason: TruncationReason::UnclosedBrackets,
            confidence: 0.70,
            truncated_ending: ending,
            ..Default::default()
        };
    }

    let parsed = tool_parser::parse_inline_tool_blocks(text);
    if stop_reason != StopReason::EndTurn && parsed.calls.iter().any(|c| c.parse_error.is_some()) {
        return TruncationInfo {
            is_truncated: true,
            reason: TruncationReason::ToolParseError,
            confidence: 0.5,
            truncated_ending: ending,
            ..Default::default()
        };
    }

    TruncationInfo::default()
}

fn tail_chars(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(max_chars);
    chars[start..].iter().collect()
}

/// `[Calling tool:` present with an unbalanced brace count (§4.7): the model
/// started describing a tool call but the stream ended mid-JSON.
fn has_unbalanced_calling_tool(text: &str) -> bool {
    text.contains("[Calling tool:") && has_unclosed_brackets(text)
}

fn has_unclosed_brackets(text: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
    }
    depth > 0
}

fn has_unclosed_code_fence(text: &str) -> bool {
    text.matches("```").count() % 2 == 1
}

/// Merges a continuation response's text onto the truncated original,
/// removing the overlap between the truncated ending and the continuation's
/// start (§4.7 "merge overlap" rule; runs on Unicode code points, never
/// bytes, per the Design Notes).
pub fn merge_continuation(original: &str, continuation: &str, max_overlap_chars: usize) -> String {
    let continuation = strip_continuation_preamble(continuation);
    let orig_chars: Vec<char> = original.chars().collect();
    let cont_chars: Vec<char> = continuation.chars().collect();

    let max_check = max_overlap_chars.min(orig_chars.len()).min(cont_chars.len());

    for overlap in (1..=max_check).rev() {
        let tail = &orig_chars[orig_chars.len() - overlap..];
        let head = &cont_chars[..overlap];
        if tail == head {
            let merged: String = orig_chars
                .iter()
                .chain(cont_chars[overlap..].iter())
                .collect();
            return merged;
        }
    }

    let mut merged = original.to_string();
    merged.push_str(continuation);
    merged
}

const KNOWN_ERROR_MARKERS: &[&str] = &["[Tool Error]", "[上游服务错误]", "Error:"];

/// Step 1 of the continuation build (§4.7): the accumulated text must be
/// long enough to be worth continuing and must not itself look like an
/// error message, or the engine stops and returns what it has.
pub fn is_valid_for_continuation(text: &str, config: &ContinuationConfig) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < config.min_text_length {
        return false;
    }
    !KNOWN_ERROR_MARKERS.iter().any(|marker| trimmed.starts_with(marker))
}

/// Strips known preamble patterns a continuation reply tends to open with
/// before the overlap scan runs (§4.7 step 4).
pub fn strip_continuation_preamble(text: &str) -> &str {
    let mut rest = text.trim_start();
    loop {
        let stripped = if let Some(idx) = rest.find('\n') {
            let (line, tail) = rest.split_at(idx);
            let trimmed_line = line.trim();
            if trimmed_line.starts_with("Continuing from")
                || trimmed_line.starts_with("Here is the rest")
                || trimmed_line.starts_with("```")
            {
                Some(tail.trim_start_matches('\n'))
            } else {
                None
            }
        } else {
            None
        };
        match stripped {
            Some(next) if next.len() != rest.len() => rest = next,
            _ => break,
        }
    }
    rest
}

/// Decides whether another continuation attempt is permitted given the
/// running count and last upstream error kind.
pub fn should_continue(
    attempts_so_far: u32,
    consecutive_failures: u32,
    config: &ContinuationConfig,
) -> bool {
    config.enabled
        && attempts_so_far < config.max_continuations
        && consecutive_failures < config.max_consecutive_failures
}

/// Appends freshly parsed tool-use blocks recovered from a continuation's
/// inline text onto the truncation record, classifying each as valid or
/// failed based on whether it carries a parse error.
pub fn record_recovered_tool_calls(info: &mut TruncationInfo, text: &str) {
    let outcome = tool_parser::parse_inline_tool_blocks(text);
    for call in outcome.calls {
        if call.parse_error.is_some() {
            info.failed_tool_uses.push(call);
        } else {
            info.valid_tool_uses.push(call);
        }
    }
}

/// Converts recovered tool calls into content blocks, valid ones first.
pub fn recovered_tool_blocks(info: &TruncationInfo) -> Vec<ContentBlock> {
    info.valid_tool_uses.iter().map(|c| c.to_content_block()).collect()
}
