//! Bounded-context history strategies (§4.3). When a conversation grows past
//! the configured bounds, one of four strategies decides what goes upstream:
//! drop the oldest turns, replace them with a cached/generated summary,
//! shrink aggressively after an upstream context error, or just estimate
//! whether trimming will even be necessary before doing any work.

use crate::config::HistoryConfig;
use crate::model::{ContentBlock, Message, MessageContent, Role};
use crate::token;

/// Body markers that indicate the upstream rejected a request for exceeding
/// its context window (§4.2, §7). Detected from the raw error text rather
/// than a structured field since the upstream's shape for this varies.
const CONTENT_LENGTH_ERROR_MARKERS: &[&str] = &[
    "CONTENT_LENGTH_EXCEEDS_THRESHOLD",
    "context_length_exceeded",
    "input is too long",
];

/// True if `message` looks like an upstream context-window rejection,
/// triggering the `ERROR_RETRY` strategy rather than a terminal failure.
pub fn is_content_length_error(message: &str) -> bool {
    if CONTENT_LENGTH_ERROR_MARKERS.iter().any(|marker| message.contains(marker)) {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("token") && (lower.contains("limit") || lower.contains("exceed"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStrategy {
    AutoTruncate,
    SmartSummary,
    ErrorRetry,
    PreEstimate,
}

/// Outcome of applying a strategy: the messages to actually send upstream,
/// plus whether any were dropped/summarized and the dropped count/chars for
/// cache bookkeeping.
pub struct TrimOutcome {
    pub messages: Vec<Message>,
    pub dropped_count: usize,
    pub dropped_chars: usize,
    pub summary_needed: bool,
    /// The messages actually dropped, kept around so a caller that needs to
    /// replace them with a real synthesized summary (rather than a cached or
    /// placeholder one) has the source text to summarize.
    pub dropped_messages: Vec<Message>,
}

/// `PRE_ESTIMATE`: cheaply decides whether `messages` need any trimming at
/// all, without touching them. Call this before reaching for a heavier
/// strategy.
pub fn needs_trimming(messages: &[Message], config: &HistoryConfig) -> bool {
    if messages.len() > config.max_messages {
        return true;
    }
    total_chars(messages) > config.max_chars
}

/// Splits off a leading system message, if present, so trimming strategies
/// can drop/keep it separately from the turn-by-turn history (§4.2: "auto
/// truncate preserves a system message at index 0 if present").
fn split_leading_system(messages: Vec<Message>) -> (Option<Message>, Vec<Message>) {
    let mut messages = messages;
    if messages.first().map(|m| m.role == Role::System).unwrap_or(false) {
        let system = messages.remove(0);
        (Some(system), messages)
    } else {
        (None, messages)
    }
}

fn with_leading_system(system: Option<Message>, mut rest: Vec<Message>) -> Vec<Message> {
    if let Some(system) = system {
        rest.insert(0, system);
    }
    rest
}

/// `AUTO_TRUNCATE`: drops the oldest messages (keeping the most recent
/// `keep_recent`) until the conversation fits within bounds.
pub fn auto_truncate(messages: Vec<Message>, config: &HistoryConfig) -> TrimOutcome {
    if !needs_trimming(&messages, config) {
        return TrimOutcome {
            messages,
            dropped_count: 0,
            dropped_chars: 0,
            summary_needed: false,
            dropped_messages: Vec::new(),
        };
    }

    let (system, rest) = split_leading_system(messages);
    let keep_from = rest.len().saturating_sub(config.keep_recent.max(1));
    let dropped = &rest[..keep_from];
    let dropped_count = dropped.len();
    let dropped_chars = total_chars(dropped);
    let dropped_messages = dropped.to_vec();
    let kept = rest[keep_from..].to_vec();

    TrimOutcome {
        messages: with_leading_system(system, kept),
        dropped_count,
        dropped_chars,
        summary_needed: false,
        dropped_messages,
    }
}

/// `SMART_SUMMARY`: like `AUTO_TRUNCATE`, but signals that the dropped
/// prefix should be replaced by a generated/cached summary message rather
/// than silently discarded, once `summary_threshold_chars` is crossed, and
/// repairs any tool-use/tool-result pairing the split broke.
pub fn smart_summary(messages: Vec<Message>, config: &HistoryConfig) -> TrimOutcome {
    let total = total_chars(&messages);
    if total <= config.summary_threshold_chars {
        return TrimOutcome {
            messages,
            dropped_count: 0,
            dropped_chars: 0,
            summary_needed: false,
            dropped_messages: Vec::new(),
        };
    }

    let (system, rest) = split_leading_system(messages);
    let keep_from = rest.len().saturating_sub(config.keep_recent.max(1));
    let dropped = &rest[..keep_from];
    let dropped_count = dropped.len();
    let dropped_chars = total_chars(dropped);
    let dropped_messages = dropped.to_vec();
    let mut kept = rest[keep_from..].to_vec();
    repair_tool_pairing(&mut kept);

    TrimOutcome {
        messages: with_leading_system(system, kept),
        dropped_count,
        dropped_chars,
        summary_needed: dropped_count > 0,
        dropped_messages,
    }
}

/// Repairs tool-use/tool-result pairing broken by a history split (§4.2):
/// a `tool_result` whose matching `tool_use` was discarded is dropped, and a
/// `tool_use` whose `tool_result` is no longer the very next message has its
/// block stripped from that assistant turn.
fn repair_tool_pairing(messages: &mut Vec<Message>) {
    for i in 0..messages.len() {
        let Some(pending_ids) = tool_use_ids(&messages[i]) else { continue };
        if pending_ids.is_empty() {
            continue;
        }
        let answered = messages.get(i + 1).and_then(tool_result_ids).unwrap_or_default();
        if pending_ids.iter().any(|id| !answered.contains(id)) {
            strip_tool_use_blocks(&mut messages[i]);
        }
    }

    for i in 0..messages.len() {
        let Some(mut result_ids) = tool_result_ids(&messages[i]) else { continue };
        if result_ids.is_empty() {
            continue;
        }
        let offered = messages.get(i.wrapping_sub(1)).filter(|_| i > 0).and_then(tool_use_ids).unwrap_or_default();
        result_ids.retain(|id| !offered.contains(id));
        if !result_ids.is_empty() {
            strip_orphaned_tool_results(&mut messages[i], &result_ids);
        }
    }
}

fn tool_use_ids(message: &Message) -> Option<Vec<String>> {
    if message.role != Role::Assistant {
        return None;
    }
    let ids: Vec<String> = message
        .blocks()
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, .. } => Some(id.clone()),
            _ => None,
        })
        .collect();
    Some(ids)
}

fn tool_result_ids(message: &Message) -> Option<Vec<String>> {
    if message.role != Role::User {
        return None;
    }
    let ids: Vec<String> = message
        .blocks()
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        })
        .collect();
    Some(ids)
}

fn strip_tool_use_blocks(message: &mut Message) {
    if let MessageContent::Blocks(blocks) = &mut message.content {
        blocks.retain(|b| !matches!(b, ContentBlock::ToolUse { .. }));
    }
}

fn strip_orphaned_tool_results(message: &mut Message, orphaned_ids: &[String]) {
    if let MessageContent::Blocks(blocks) = &mut message.content {
        blocks.retain(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => !orphaned_ids.contains(tool_use_id),
            _ => true,
        });
    }
}

/// `ERROR_RETRY`: after the upstream rejects a request for exceeding its
/// context window, shrinks much more aggressively than the normal bounds,
/// tightening by 30% on each successive retry down to a floor of 5 messages
/// (§4.2, §7 context-window error recovery).
pub fn error_retry(messages: Vec<Message>, config: &HistoryConfig, retry_count: u32) -> TrimOutcome {
    let mut cap = config.retry_max_messages;
    for _ in 0..retry_count {
        cap = ((cap as f64) * 0.7).round() as usize;
    }
    let cap = cap.max(5).min(messages.len());
    let keep_from = messages.len().saturating_sub(cap.max(1));
    let dropped = &messages[..keep_from];
    let dropped_count = dropped.len();
    let dropped_chars = total_chars(dropped);
    let dropped_messages = dropped.to_vec();

    TrimOutcome {
        messages: messages[keep_from..].to_vec(),
        dropped_count,
        dropped_chars,
        summary_needed: false,
        dropped_messages,
    }
}

/// Total character count across a message list's text-bearing blocks, used
/// both internally by the trimming strategies and by callers deciding which
/// strategy to reach for.
pub fn total_chars(messages: &[Message]) -> usize {
    messages
        .iter()
        .flat_map(|m| m.blocks())
        .map(|block| block_chars(&block))
        .sum()
}

fn block_chars(block: &crate::model::ContentBlock) -> usize {
    use crate::model::ContentBlock::*;
    match block {
        Text { text } => text.chars().count(),
        Thinking { thinking } => thinking.chars().count(),
        ToolUse { input, .. } => input.to_string().chars().count(),
        ToolResult { content, .. } => match content {
            crate::model::ToolResultContent::Text(t) => t.chars().count(),
            crate::model::ToolResultContent::Blocks(blocks) => blocks.iter().map(block_chars).sum(),
        },
        _ => 0,
    }
}

/// Whether estimated token count (not raw chars) exceeds the model's
/// effective context budget; used to decide if `ERROR_RETRY` should kick in
/// preemptively rather than waiting on an upstream rejection.
pub fn estimated_tokens_over_budget(messages: &[Message], budget_tokens: u32) -> bool {
    token::estimate_messages_tokens(messages) > budget_tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageContent, Role};

    fn config() -> HistoryConfig {
        HistoryConfig {
            max_messages: 5,
            max_chars: 1000,
            summary_threshold_chars: 500,
            keep_recent: 2,
            retry_max_messages: 20,
            max_retries: 2,
            estimate_threshold_chars: 10_000,
        }
    }

    fn msg(text: &str) -> Message {
        Message { role: Role::User, content: MessageContent::Text(text.to_string()) }
    }

    fn system_msg(text: &str) -> Message {
        Message { role: Role::System, content: MessageContent::Text(text.to_string()) }
    }

    #[test]
    fn needs_trimming_flags_over_message_count() {
        let messages: Vec<_> = (0..6).map(|i| msg(&format!("m{i}"))).collect();
        assert!(needs_trimming(&messages, &config()));
    }

    #[test]
    fn under_bounds_no_trimming_needed() {
        let messages = vec![msg("a"), msg("b")];
        assert!(!needs_trimming(&messages, &config()));
    }

    #[test]
    fn auto_truncate_keeps_most_recent_messages() {
        let messages: Vec<_> = (0..6).map(|i| msg(&format!("m{i}"))).collect();
        let outcome = auto_truncate(messages, &config());
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.dropped_count, 4);
    }

    #[test]
    fn smart_summary_flags_summary_needed_past_threshold() {
        let long_text = "x".repeat(600);
        let messages: Vec<_> = (0..4).map(|_| msg(&long_text)).collect();
        let outcome = smart_summary(messages, &config());
        assert!(outcome.summary_needed);
        assert_eq!(outcome.messages.len(), 2);
    }

    #[test]
    fn smart_summary_noop_under_threshold() {
        let messages = vec![msg("short")];
        let outcome = smart_summary(messages, &config());
        assert!(!outcome.summary_needed);
        assert_eq!(outcome.dropped_count, 0);
    }

    #[test]
    fn error_retry_shrinks_to_retry_max_messages_on_first_attempt() {
        let messages: Vec<_> = (0..30).map(|i| msg(&format!("m{i}"))).collect();
        let outcome = error_retry(messages, &config(), 0);
        assert_eq!(outcome.messages.len(), 20);
    }

    #[test]
    fn error_retry_shrinks_further_each_retry_with_a_floor() {
        let messages: Vec<_> = (0..30).map(|i| msg(&format!("m{i}"))).collect();
        let first = error_retry(messages.clone(), &config(), 1).messages.len();
        let second = error_retry(messages.clone(), &config(), 2).messages.len();
        let many = error_retry(messages, &config(), 10).messages.len();
        assert!(first < 20);
        assert!(second < first);
        assert_eq!(many, 5);
    }

    #[test]
    fn auto_truncate_preserves_leading_system_message() {
        let mut messages = vec![system_msg("be helpful")];
        messages.extend((0..6).map(|i| msg(&format!("m{i}"))));
        let outcome = auto_truncate(messages, &config());
        assert_eq!(outcome.messages[0].role, Role::System);
        assert_eq!(outcome.messages.len(), 3);
    }

    #[test]
    fn smart_summary_strips_tool_use_whose_result_was_dropped() {
        let tool_use_msg = Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "search".to_string(),
                input: serde_json::json!({}),
            }]),
        };
        // keep_recent = 2, so the last two messages (tool_use_msg, recent) survive
        // trimming while its tool_result (never sent) stays missing, leaving the
        // tool_use orphaned at the new boundary.
        let messages =
            vec![msg(&"x".repeat(600)), msg(&"y".repeat(600)), tool_use_msg, msg("recent")];
        let outcome = smart_summary(messages, &config());
        assert_eq!(outcome.messages.len(), 2);
        let has_orphan_tool_use = outcome
            .messages
            .iter()
            .flat_map(|m| m.blocks())
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
        assert!(!has_orphan_tool_use);
    }

    #[test]
    fn content_length_error_markers_are_recognized() {
        assert!(is_content_length_error("CONTENT_LENGTH_EXCEEDS_THRESHOLD"));
        assert!(is_content_length_error("error: context_length_exceeded"));
        assert!(is_content_length_error("the input is too long for this model"));
        assert!(is_content_length_error("token budget limit reached"));
        assert!(!is_content_length_error("rate limit exceeded"));
    }
}
