//! Dual-rate token estimation (§4.2): Chinese text costs roughly 1.5
//! chars/token, everything else roughly 4 chars/token, plus a flat
//! per-message overhead for role/formatting tokens.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::model::{ContentBlock, Message};

const CHARS_PER_TOKEN_CJK: f64 = 1.5;
const CHARS_PER_TOKEN_OTHER: f64 = 4.0;
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Memoization key: a text hash plus its length and a coarse CJK-density
/// bucket, rather than the text itself, so the cache doesn't pin arbitrarily
/// large strings in memory. Two different strings colliding on this key
/// would have to share length and CJK-density bucket on top of the hash, so
/// the cache can never diverge from a fresh [`estimate_tokens`] call in a way
/// that matters here (the estimate only depends on those three things).
type TokenCacheKey = (u64, usize, u8);

fn cache() -> &'static Mutex<HashMap<TokenCacheKey, u32>> {
    static CACHE: std::sync::OnceLock<Mutex<HashMap<TokenCacheKey, u32>>> = std::sync::OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

fn text_hash(text: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Buckets the fraction of CJK characters into one of 11 steps (0%, 10%, ...
/// 100%) so near-identical texts share a cache key without requiring an
/// exact percentage match.
fn chinese_pct_bucket(cjk: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((cjk * 10) / total).min(10) as u8
}

/// Estimates token count for a single string by blending the CJK and
/// non-CJK character rates. Memoized by `(hash(text), len, chinese_pct_bucket)`
/// since the same history tail is re-estimated on every trimming decision.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let total = text.chars().count();
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    let key = (text_hash(text), total, chinese_pct_bucket(cjk, total));

    if let Some(cached) = cache().lock().expect("token cache mutex poisoned").get(&key) {
        return *cached;
    }

    let other = total - cjk;
    let tokens = (cjk as f64 / CHARS_PER_TOKEN_CJK) + (other as f64 / CHARS_PER_TOKEN_OTHER);
    let tokens = tokens.ceil() as u32;

    cache().lock().expect("token cache mutex poisoned").insert(key, tokens);
    tokens
}

/// Sums estimated tokens across a message list, adding flat per-message
/// overhead and flattening tool-use/tool-result payloads to their JSON text.
pub fn estimate_messages_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Sums estimated tokens across a set of content blocks, e.g. an assistant
/// turn's `content` array, for reporting `usage.output_tokens` when the
/// upstream didn't return a real count.
pub fn estimate_content_tokens(blocks: &[ContentBlock]) -> u32 {
    blocks.iter().map(estimate_block_tokens).sum()
}

fn estimate_message_tokens(message: &Message) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;
    for block in message.blocks() {
        total += estimate_block_tokens(&block);
    }
    total
}

fn estimate_block_tokens(block: &ContentBlock) -> u32 {
    match block {
        ContentBlock::Text { text } => estimate_tokens(text),
        ContentBlock::Thinking { thinking } => estimate_tokens(thinking),
        ContentBlock::ToolUse { input, name, .. } => {
            estimate_tokens(name) + estimate_tokens(&input.to_string())
        }
        ContentBlock::ToolResult { content, .. } => match content {
            crate::model::ToolResultContent::Text(t) => estimate_tokens(t),
            crate::model::ToolResultContent::Blocks(blocks) => {
                blocks.iter().map(estimate_block_tokens).sum()
            }
        },
        ContentBlock::Document { text, .. } => text.as_deref().map(estimate_tokens).unwrap_or(0),
        ContentBlock::File { content, .. } => content.as_deref().map(estimate_tokens).unwrap_or(0),
        ContentBlock::Citation { cited_text, .. } => estimate_tokens(cited_text),
        ContentBlock::CodeExecutionResult { output, .. } => estimate_tokens(output),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageContent, Role};

    #[test]
    fn ascii_text_uses_four_chars_per_token() {
        let text = "a".repeat(40);
        assert_eq!(estimate_tokens(&text), 10);
    }

    #[test]
    fn chinese_text_uses_higher_rate() {
        let text = "\u{4e2d}".repeat(30);
        assert_eq!(estimate_tokens(&text), 20);
    }

    #[test]
    fn mixed_text_blends_rates() {
        let text = format!("{}{}", "a".repeat(8), "\u{4e2d}".repeat(3));
        assert_eq!(estimate_tokens(&text), 4);
    }

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn repeated_estimate_hits_the_memoized_value() {
        let text = "the quick brown fox jumps over the lazy dog";
        let first = estimate_tokens(text);
        let second = estimate_tokens(text);
        assert_eq!(first, second);
    }

    #[test]
    fn content_tokens_sum_across_blocks() {
        let blocks = vec![
            ContentBlock::Text { text: "a".repeat(40) },
            ContentBlock::Thinking { thinking: "b".repeat(40) },
        ];
        assert_eq!(estimate_content_tokens(&blocks), 20);
    }

    #[test]
    fn message_list_includes_per_message_overhead() {
        let messages = vec![
            Message { role: Role::User, content: MessageContent::Text("hi".into()) },
            Message { role: Role::Assistant, content: MessageContent::Text("there".into()) },
        ];
        let total = estimate_messages_tokens(&messages);
        assert_eq!(total, MESSAGE_OVERHEAD_TOKENS * 2 + estimate_tokens("hi") + estimate_tokens("there"));
    }
}
