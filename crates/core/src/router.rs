//! Deterministic model routing (§4.5, invariant P2). The Python original
//! drew its probabilistic choices from `random.randint`; this port derives
//! the same decision from a stable hash of the request so identical
//! requests always route identically, while the aggregate distribution
//! across many distinct requests still approximates the configured
//! probabilities.

use std::hash::{Hash, Hasher};

use crate::config::RoutingConfig;
use crate::model::{ContentBlock, Message, RoutingDecision};

const OPUS_KEYWORDS: &[&str] =
    &["design", "architect", "refactor", "analyze", "plan", "设计", "架构", "重构", "分析", "规划"];
const SONNET_KEYWORDS: &[&str] =
    &["show", "list", "fix", "run", "continue", "显示", "列出", "修复", "运行", "继续"];
const PLAN_MODE_MARKERS: &[&str] =
    &["enterplanmode", "exitplanmode", "plan mode", "计划模式", "规划模式"];

/// Inputs the router cascade needs beyond the raw config: the requested
/// model, the conversation so far, whether extended thinking was requested,
/// and how many tool calls this session has executed (the "execution" tier).
pub struct RoutingInput<'a> {
    pub requested_model: &'a str,
    pub session_id: &'a str,
    pub messages: &'a [Message],
    pub tool_executions_this_session: usize,
    pub thinking_requested: bool,
}

/// Runs the priority cascade and returns the routing decision. `priority` is
/// the 1-indexed rule number from §4.5 that fired; `0` marks the two cases
/// not among those seven rules (routing disabled, explicit non-alias model).
pub fn route(input: &RoutingInput, config: &RoutingConfig) -> RoutingDecision {
    if !config.enabled {
        return passthrough(input, "routing_disabled", 0);
    }

    if !is_default_alias(input.requested_model, config) {
        return passthrough(input, "explicit_model_passthrough", 0);
    }

    if input.thinking_requested || any_thinking_block(input.messages) {
        return decision(input, config.opus_model.clone(), "thinking_requested".to_string(), 1);
    }

    if let Some(marker) = find_plan_mode_marker(input.messages) {
        return decision(input, config.opus_model.clone(), format!("计划模式[{marker}]"), 2);
    }

    let last_user = last_user_text(input.messages);
    let last_user_lower = last_user.to_lowercase();

    if let Some(kw) = find_keyword(&last_user_lower, OPUS_KEYWORDS) {
        return decision(input, config.opus_model.clone(), format!("Opus关键词[{kw}]"), 3);
    }

    if let Some(kw) = find_keyword(&last_user_lower, SONNET_KEYWORDS) {
        return decision(input, config.sonnet_model.clone(), format!("Sonnet关键词[{kw}]"), 4);
    }

    if input.tool_executions_this_session >= config.execution_tool_threshold {
        let roll = stable_roll(input.messages.len(), &last_user, "execution");
        let routed = if roll < config.execution_sonnet_probability {
            config.sonnet_model.clone()
        } else {
            config.opus_model.clone()
        };
        return decision(input, routed, "execution_heavy".to_string(), 5);
    }

    if input.messages.len() <= config.first_turn_max_messages {
        let roll = stable_roll(input.messages.len(), &last_user, "first_turn");
        let routed = if roll < config.first_turn_opus_probability {
            config.opus_model.clone()
        } else {
            config.sonnet_model.clone()
        };
        return decision(input, routed, "first_turn".to_string(), 6);
    }

    let roll = stable_roll(input.messages.len(), &last_user, "base");
    let routed =
        if roll < config.base_opus_probability { config.opus_model.clone() } else { config.sonnet_model.clone() };
    decision(input, routed, "base_split".to_string(), 7)
}

fn passthrough(input: &RoutingInput, reason: &str, priority: u8) -> RoutingDecision {
    RoutingDecision {
        original_model: input.requested_model.to_string(),
        routed_model: input.requested_model.to_string(),
        reason: reason.to_string(),
        priority,
    }
}

fn decision(input: &RoutingInput, routed_model: String, reason: String, priority: u8) -> RoutingDecision {
    RoutingDecision { original_model: input.requested_model.to_string(), routed_model, reason, priority }
}

fn is_default_alias(model: &str, config: &RoutingConfig) -> bool {
    model == config.opus_model
        || model == config.sonnet_model
        || model == config.haiku_model
        || model == "default"
        || model == "auto"
}

fn any_thinking_block(messages: &[Message]) -> bool {
    messages.iter().any(|m| m.blocks().iter().any(|b| matches!(b, ContentBlock::Thinking { .. })))
}

fn find_plan_mode_marker(messages: &[Message]) -> Option<&'static str> {
    let haystack = last_user_text(messages).to_lowercase();
    PLAN_MODE_MARKERS.iter().find(|marker| haystack.contains(&marker.to_lowercase())).copied()
}

fn find_keyword(haystack_lower: &str, keywords: &[&'static str]) -> Option<&'static str> {
    keywords.iter().find(|kw| haystack_lower.contains(&kw.to_lowercase())).copied()
}

fn last_user_text(messages: &[Message]) -> String {
    use crate::model::Role;
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| {
            m.blocks()
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// Maps `(message_count, last_user_text[:200], seed_label)` to a stable value
/// in `0..100`. The same request always rolls the same number (invariant
/// P2); different requests roll independently.
fn stable_roll(message_count: usize, last_user_text: &str, seed_label: &str) -> u8 {
    let truncated: String = last_user_text.chars().take(200).collect();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!("{message_count}:{truncated}:{seed_label}").hash(&mut hasher);
    (hasher.finish() % 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageContent, Role};

    fn config() -> RoutingConfig {
        RoutingConfig {
            enabled: true,
            base_opus_probability: 20,
            first_turn_opus_probability: 50,
            first_turn_max_messages: 2,
            execution_tool_threshold: 3,
            execution_sonnet_probability: 90,
            opus_max_concurrent: 15,
            opus_model: "claude-opus-4-5-20251101".to_string(),
            sonnet_model: "claude-sonnet-4-5-20250929".to_string(),
            haiku_model: "claude-haiku-4-5".to_string(),
        }
    }

    fn user_msg(text: &str) -> Message {
        Message { role: Role::User, content: MessageContent::Text(text.to_string()) }
    }

    #[test]
    fn explicit_non_alias_model_passes_through() {
        let cfg = config();
        let input = RoutingInput {
            requested_model: "claude-3-5-haiku-20241022",
            session_id: "s1",
            messages: &[user_msg("hi")],
            tool_executions_this_session: 0,
            thinking_requested: false,
        };
        let decision = route(&input, &cfg);
        assert_eq!(decision.routed_model, "claude-3-5-haiku-20241022");
        assert_eq!(decision.priority, 0);
    }

    #[test]
    fn same_request_always_routes_identically() {
        let cfg = config();
        let messages = vec![user_msg("a"), user_msg("b"), user_msg("continue please")];
        let input = RoutingInput {
            requested_model: "default",
            session_id: "session-abc",
            messages: &messages,
            tool_executions_this_session: 0,
            thinking_requested: false,
        };
        let a = route(&input, &cfg);
        let b = route(&input, &cfg);
        assert_eq!(a.routed_model, b.routed_model);
        assert_eq!(a.reason, b.reason);
    }

    #[test]
    fn thinking_request_forces_opus() {
        let cfg = config();
        let input = RoutingInput {
            requested_model: "default",
            session_id: "s",
            messages: &[user_msg("hi")],
            tool_executions_this_session: 0,
            thinking_requested: true,
        };
        let decision = route(&input, &cfg);
        assert_eq!(decision.routed_model, cfg.opus_model);
        assert_eq!(decision.priority, 1);
    }

    #[test]
    fn plan_mode_marker_forces_opus() {
        let cfg = config();
        let input = RoutingInput {
            requested_model: "default",
            session_id: "s",
            messages: &[user_msg("please enterplanmode now")],
            tool_executions_this_session: 0,
            thinking_requested: false,
        };
        let decision = route(&input, &cfg);
        assert_eq!(decision.routed_model, cfg.opus_model);
        assert_eq!(decision.priority, 2);
    }

    #[test]
    fn opus_keyword_routes_to_opus() {
        let cfg = config();
        let input = RoutingInput {
            requested_model: "default",
            session_id: "s",
            messages: &[user_msg("a"), user_msg("b"), user_msg("please refactor this module")],
            tool_executions_this_session: 0,
            thinking_requested: false,
        };
        let decision = route(&input, &cfg);
        assert_eq!(decision.routed_model, cfg.opus_model);
        assert_eq!(decision.priority, 3);
        assert!(decision.reason.contains("refactor"));
    }

    #[test]
    fn chinese_list_keyword_routes_to_sonnet_with_matching_reason() {
        let cfg = config();
        let input = RoutingInput {
            requested_model: "default",
            session_id: "s",
            messages: &[user_msg("a"), user_msg("b"), user_msg("列出当前目录")],
            tool_executions_this_session: 0,
            thinking_requested: false,
        };
        let decision = route(&input, &cfg);
        assert_eq!(decision.routed_model, cfg.sonnet_model);
        assert_eq!(decision.priority, 4);
        assert_eq!(decision.reason, "Sonnet关键词[列出]");
    }

    #[test]
    fn heavy_tool_execution_favors_sonnet() {
        let cfg = config();
        let messages = vec![user_msg("a"), user_msg("b"), user_msg("c"), user_msg("d"), user_msg("hmm")];
        let input = RoutingInput {
            requested_model: "default",
            session_id: "exec-session",
            messages: &messages,
            tool_executions_this_session: 10,
            thinking_requested: false,
        };
        let decision = route(&input, &cfg);
        assert_eq!(decision.priority, 5);
    }

    #[test]
    fn routing_disabled_passes_through_untouched() {
        let mut cfg = config();
        cfg.enabled = false;
        let input = RoutingInput {
            requested_model: "default",
            session_id: "s",
            messages: &[user_msg("hi")],
            tool_executions_this_session: 0,
            thinking_requested: false,
        };
        let decision = route(&input, &cfg);
        assert_eq!(decision.routed_model, "default");
        assert_eq!(decision.priority, 0);
    }

    #[test]
    fn distinct_default_requests_spread_across_both_tiers() {
        let cfg = config();
        let mut saw_opus = false;
        let mut saw_sonnet = false;
        for i in 0..50 {
            let messages = vec![user_msg("a"), user_msg("b"), user_msg("c"), user_msg(&format!("ok {i}"))];
            let sid = format!("session-{i}");
            let input = RoutingInput {
                requested_model: "default",
                session_id: &sid,
                messages: &messages,
                tool_executions_this_session: 0,
                thinking_requested: false,
            };
            let decision = route(&input, &cfg);
            if decision.routed_model == cfg.opus_model {
                saw_opus = true;
            } else if decision.routed_model == cfg.sonnet_model {
                saw_sonnet = true;
            }
        }
        assert!(saw_opus && saw_sonnet);
    }
}
