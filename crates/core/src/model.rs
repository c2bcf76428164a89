//! Canonical data model (§3): messages, content blocks, tool definitions,
//! requests, and the small value types threaded through routing,
//! continuation and history.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A single message. Content is either a plain string or an ordered sequence
/// of content blocks; callers normalize via [`Message::blocks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Message {
    /// Normalizes content to a block sequence, wrapping plain text in a
    /// single `text` block.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            MessageContent::Text(t) => vec![ContentBlock::Text { text: t.clone() }],
            MessageContent::Blocks(b) => b.clone(),
        }
    }
}

/// Tagged content-block variants (§3). `signature` and `redacted_thinking`
/// always render to empty text when flattened for a provider that rejects
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource, media_type: Option<String> },
    Document { name: String, media_type: Option<String>, text: Option<String> },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
    Thinking { thinking: String },
    RedactedThinking { data: Option<String> },
    Signature { signature: Option<String> },
    File { name: String, media_type: Option<String>, content: Option<String> },
    Citation { cited_text: String, source: Option<serde_json::Value> },
    CodeExecutionResult { output: String, #[serde(default)] return_code: i64 },
    Video { source: Option<serde_json::Value> },
    Audio { source: Option<serde_json::Value> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// `{name, description ≤8000 chars, input_schema}` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Any,
    Tool { name: String },
}

/// Anthropic-shaped canonical request (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system: Option<MessageContent>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub thinking: Option<serde_json::Value>,
}

/// `{original_model, routed_model, reason, priority}` (§3, §4.5). `reason`
/// is always present; `priority` is the 1..5 rule index that fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub original_model: String,
    pub routed_model: String,
    pub reason: String,
    pub priority: u8,
}

/// `{summary, old_history_count, old_history_chars, updated_at}` (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryCacheEntry {
    pub summary: String,
    pub old_history_count: usize,
    pub old_history_chars: usize,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// `{is_truncated, reason, confidence, truncated_ending, valid_tool_uses,
/// failed_tool_uses}` (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TruncationInfo {
    pub is_truncated: bool,
    pub reason: TruncationReason,
    pub confidence: f32,
    pub truncated_ending: String,
    #[serde(default)]
    pub valid_tool_uses: Vec<ParsedToolCall>,
    #[serde(default)]
    pub failed_tool_uses: Vec<ParsedToolCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TruncationReason {
    #[default]
    None,
    StreamInterrupted,
    MaxTokensReached,
    IncompleteToolCall,
    IncompleteCodeBlock,
    UnclosedBrackets,
    ToolParseError,
}

/// `{id, name, input, raw_text?, parse_error?}` (§3, §4.4.1). `id` is newly
/// minted (`toolu_` + 12 hex chars) when parsed from text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub parse_error: Option<String>,
}

impl ParsedToolCall {
    pub fn new_id() -> String {
        format!("toolu_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
    }

    pub fn to_content_block(&self) -> ContentBlock {
        ContentBlock::ToolUse {
            id: self.id.clone(),
            name: self.name.clone(),
            input: self.input.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_message_normalizes_to_one_block() {
        let msg = Message { role: Role::User, content: MessageContent::Text("hi".into()) };
        let blocks = msg.blocks();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(blocks[0], ContentBlock::Text { .. }));
    }

    #[test]
    fn new_tool_id_has_toolu_prefix_and_twelve_hex_chars() {
        let id = ParsedToolCall::new_id();
        assert!(id.starts_with("toolu_"));
        assert_eq!(id.len(), "toolu_".len() + 12);
    }
}
