//! Anthropic Messages <-> Kiro-native translation (§4.4, third leg). Kiro's
//! wire format keeps tool invocations and their results as separate
//! `toolUses`/`toolResults` arrays alongside a message's plain text, and
//! requires strict user/assistant alternation with every `toolUses` entry
//! paired to a `toolResults` entry in the following turn.

use serde_json::{json, Value};
use tracing::warn;

use crate::model::{ContentBlock, Message, MessageContent, Request, Role, ToolDefinition};

#[derive(Debug, Clone)]
pub struct KiroRequest {
    pub model_id: String,
    pub system_prompt: Option<String>,
    pub history: Vec<Value>,
    pub tools: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct KiroResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: String,
}

/// Maps an Anthropic-facing model alias to the Kiro-side model identifier
/// the upstream actually expects. Unknown aliases pass through unchanged so
/// new upstream models work without a gateway release.
pub fn map_model_name(model: &str) -> String {
    match model {
        "claude-opus-4-5-20251101" => "CLAUDE_OPUS_4_5",
        "claude-sonnet-4-5-20250929" => "CLAUDE_SONNET_4_5",
        "claude-haiku-4-5" => "CLAUDE_HAIKU_4_5",
        other => return other.to_string(),
    }
    .to_string()
}

/// Converts a canonical [`Request`] to the Kiro-native wire shape.
pub fn convert_anthropic_to_kiro(request: &Request) -> KiroRequest {
    let system_prompt = extract_system_text(request.system.as_ref());
    let mut history: Vec<Value> = request.messages.iter().map(message_to_kiro_turn).collect();
    fix_history_alternation(&mut history);

    KiroRequest {
        model_id: map_model_name(&request.model),
        system_prompt,
        history,
        tools: convert_anthropic_tools_to_kiro(&request.tools),
    }
}

fn extract_system_text(system: Option<&MessageContent>) -> Option<String> {
    match system? {
        MessageContent::Text(t) => Some(t.clone()),
        MessageContent::Blocks(blocks) => {
            let text = extract_text_content(blocks);
            (!text.is_empty()).then_some(text)
        }
    }
}

/// Joins all `text`-bearing blocks in a message's content into one string.
pub fn extract_text_content(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.clone()),
            ContentBlock::Thinking { thinking } => Some(thinking.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn message_to_kiro_turn(message: &Message) -> Value {
    let blocks = message.blocks();
    match message.role {
        Role::Assistant => parse_assistant_content(&blocks),
        _ => parse_user_tool_results(&blocks),
    }
}

/// Splits an assistant message's blocks into `{role: "assistant", content,
/// toolUses}`.
pub fn parse_assistant_content(blocks: &[ContentBlock]) -> Value {
    let text = extract_text_content(blocks);
    let tool_uses: Vec<Value> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => {
                Some(json!({"toolUseId": id, "name": name, "input": input}))
            }
            _ => None,
        })
        .collect();

    let mut turn = json!({"role": "assistant", "content": text});
    if !tool_uses.is_empty() {
        turn["toolUses"] = Value::Array(tool_uses);
    }
    turn
}

/// Splits a user message's blocks into `{role: "user", content,
/// toolResults}`.
pub fn parse_user_tool_results(blocks: &[ContentBlock]) -> Value {
    let text = extract_text_content(blocks);
    let tool_results: Vec<Value> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                let content_text = match content {
                    crate::model::ToolResultContent::Text(t) => t.clone(),
                    crate::model::ToolResultContent::Blocks(inner) => extract_text_content(inner),
                };
                Some(json!({"toolUseId": tool_use_id, "content": content_text, "isError": is_error}))
            }
            _ => None,
        })
        .collect();

    let mut turn = json!({"role": "user", "content": text});
    if !tool_results.is_empty() {
        turn["toolResults"] = Value::Array(tool_results);
    }
    turn
}

/// Repairs a history sequence so it strictly alternates user/assistant and
/// every assistant `toolUses` entry is followed by a user turn carrying the
/// matching `toolResults`. Any `toolUses` entries left unanswered at the end
/// of history are dropped, with a warning, rather than sent upstream
/// unpaired (the Python original just printed a warning to stdout and kept
/// going; this upgrades that to structured logging).
pub fn fix_history_alternation(history: &mut Vec<Value>) {
    let mut repaired: Vec<Value> = Vec::with_capacity(history.len());
    let mut expected_role = "user";

    for turn in history.drain(..) {
        let role = turn["role"].as_str().unwrap_or("user").to_string();
        if role != expected_role {
            if let Some(last) = repaired.last() {
                if last["role"].as_str() == Some(role.as_str()) {
                    warn!(role = %role, "kiro history has consecutive same-role turns, merging");
                    merge_into_last(repaired.last_mut().unwrap(), &turn);
                    continue;
                }
            }
            repaired.push(placeholder_turn(expected_role));
        }
        expected_role = if role == "user" { "assistant" } else { "user" };
        repaired.push(turn);
    }

    drop_unanswered_tool_uses(&mut repaired);
    *history = repaired;
}

fn placeholder_turn(role: &str) -> Value {
    json!({"role": role, "content": ""})
}

fn merge_into_last(last: &mut Value, next: &Value) {
    let last_text = last["content"].as_str().unwrap_or("").to_string();
    let next_text = next["content"].as_str().unwrap_or("");
    last["content"] = json!(format!("{last_text}\n\n{next_text}"));
    if let Some(tool_uses) = next.get("toolUses").and_then(|v| v.as_array()) {
        let entry = last.as_object_mut().unwrap().entry("toolUses").or_insert(json!([]));
        entry.as_array_mut().unwrap().extend(tool_uses.iter().cloned());
    }
    if let Some(tool_results) = next.get("toolResults").and_then(|v| v.as_array()) {
        let entry = last.as_object_mut().unwrap().entry("toolResults").or_insert(json!([]));
        entry.as_array_mut().unwrap().extend(tool_results.iter().cloned());
    }
}

fn drop_unanswered_tool_uses(history: &mut [Value]) {
    for i in 0..history.len() {
        let Some(tool_use_ids) = history[i]["toolUses"].as_array().map(|arr| {
            arr.iter().filter_map(|u| u["toolUseId"].as_str().map(str::to_string)).collect::<Vec<_>>()
        }) else {
            continue;
        };
        if tool_use_ids.is_empty() {
            continue;
        }
        let answered: std::collections::HashSet<String> = history
            .get(i + 1)
            .and_then(|next| next["toolResults"].as_array())
            .map(|arr| arr.iter().filter_map(|r| r["toolUseId"].as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let unanswered: Vec<&String> = tool_use_ids.iter().filter(|id| !answered.contains(*id)).collect();
        if !unanswered.is_empty() {
            warn!(turn_index = i, unanswered = ?unanswered, "dropping unanswered toolUses from kiro history");
            if let Some(arr) = history[i]["toolUses"].as_array() {
                let kept: Vec<Value> = arr
                    .iter()
                    .filter(|u| u["toolUseId"].as_str().map(|id| answered.contains(id)).unwrap_or(false))
                    .cloned()
                    .collect();
                history[i]["toolUses"] = Value::Array(kept);
            }
        }
    }
}

pub fn convert_anthropic_tools_to_kiro(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| json!({"name": t.name, "description": t.description, "inputSchema": t.input_schema}))
        .collect()
}

/// Converts a Kiro-native response payload back into Anthropic content
/// blocks.
pub fn convert_kiro_response_to_anthropic(response: &Value) -> KiroResponse {
    let text = response["content"].as_str().unwrap_or("").to_string();
    let mut content = Vec::new();
    if !text.trim().is_empty() {
        content.push(ContentBlock::Text { text });
    }
    if let Some(tool_uses) = response["toolUses"].as_array() {
        for tool_use in tool_uses {
            content.push(ContentBlock::ToolUse {
                id: tool_use["toolUseId"].as_str().unwrap_or_default().to_string(),
                name: tool_use["name"].as_str().unwrap_or_default().to_string(),
                input: tool_use["input"].clone(),
            });
        }
    }

    let stop_reason = match response["stopReason"].as_str().unwrap_or("end_turn") {
        "tool_use" => "tool_use",
        "max_tokens" => "max_tokens",
        _ => "end_turn",
    }
    .to_string();

    KiroResponse { content, stop_reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageContent;

    fn text_msg(role: Role, text: &str) -> Message {
        Message { role, content: MessageContent::Text(text.to_string()) }
    }

    fn base_request(messages: Vec<Message>) -> Request {
        Request {
            model: "claude-sonnet-4-5-20250929".into(),
            messages,
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
        }
    }

    #[test]
    fn known_model_alias_maps_to_kiro_id() {
        assert_eq!(map_model_name("claude-sonnet-4-5-20250929"), "CLAUDE_SONNET_4_5");
    }

    #[test]
    fn unknown_model_passes_through() {
        assert_eq!(map_model_name("some-future-model"), "some-future-model");
    }

    #[test]
    fn well_formed_conversation_converts_cleanly() {
        let request = base_request(vec![text_msg(Role::User, "hi"), text_msg(Role::Assistant, "hello")]);
        let kiro = convert_anthropic_to_kiro(&request);
        assert_eq!(kiro.history.len(), 2);
        assert_eq!(kiro.history[0]["role"], "user");
        assert_eq!(kiro.history[1]["role"], "assistant");
    }

    #[test]
    fn consecutive_user_turns_get_an_assistant_placeholder_inserted() {
        let mut history = vec![json!({"role": "user", "content": "a"}), json!({"role": "user", "content": "b"})];
        fix_history_alternation(&mut history);
        assert_eq!(history[0]["role"], "user");
        assert_eq!(history[1]["role"], "assistant");
        assert_eq!(history[2]["role"], "user");
    }

    #[test]
    fn unanswered_tool_use_is_dropped() {
        let mut history = vec![
            json!({"role": "user", "content": "go"}),
            json!({"role": "assistant", "content": "", "toolUses": [{"toolUseId": "t1", "name": "x", "input": {}}]}),
        ];
        fix_history_alternation(&mut history);
        assert!(history[1]["toolUses"].as_array().unwrap().is_empty());
    }

    #[test]
    fn answered_tool_use_survives() {
        let mut history = vec![
            json!({"role": "user", "content": "go"}),
            json!({"role": "assistant", "content": "", "toolUses": [{"toolUseId": "t1", "name": "x", "input": {}}]}),
            json!({"role": "user", "content": "", "toolResults": [{"toolUseId": "t1", "content": "done", "isError": false}]}),
        ];
        fix_history_alternation(&mut history);
        assert_eq!(history[1]["toolUses"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn kiro_response_with_tool_use_converts_back() {
        let response = json!({
            "content": "let me check",
            "stopReason": "tool_use",
            "toolUses": [{"toolUseId": "t1", "name": "search", "input": {"q": "x"}}]
        });
        let converted = convert_kiro_response_to_anthropic(&response);
        assert_eq!(converted.stop_reason, "tool_use");
        assert_eq!(converted.content.len(), 2);
    }
}
