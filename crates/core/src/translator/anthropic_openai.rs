//! Anthropic Messages <-> OpenAI Chat Completions translation (§4.4).
//! Grounded on the Python original's `converter.py`: flatten Anthropic's
//! block-structured messages down to OpenAI's string-or-array content,
//! merge consecutive same-role turns (OpenAI rejects back-to-back
//! assistant/assistant turns the way Anthropic allows), and either pass
//! tool definitions through natively or, when the upstream model doesn't
//! support native tool-calling, fold them into a text instruction and parse
//! the reply back out with [`crate::tool_parser`].

use serde_json::{json, Value};

use crate::model::{ContentBlock, Message, MessageContent, Request, Role, ToolChoice, ToolDefinition};
use crate::tool_parser;

#[derive(Debug, Clone)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub tools: Option<Vec<Value>>,
    pub tool_choice: Option<Value>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub stream: bool,
}

/// Parsed view of an OpenAI chat completion response, enough to build the
/// Anthropic-shaped reply.
#[derive(Debug, Clone)]
pub struct OpenAiChatResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: String,
}

/// Converts a canonical [`Request`] to OpenAI's wire shape. When
/// `native_tools` is false, tool definitions are folded into a trailing
/// system instruction instead of the `tools` field, and the model is
/// expected to emit `<tool_use>` blocks that [`crate::tool_parser`] recovers
/// from the reply.
pub fn convert_anthropic_to_openai(request: &Request, native_tools: bool) -> OpenAiChatRequest {
    let mut messages = Vec::new();

    let mut system_text = clean_system_content(request.system.as_ref()).unwrap_or_default();
    if !native_tools && !request.tools.is_empty() {
        if !system_text.is_empty() {
            system_text.push_str("\n\n");
        }
        system_text.push_str(&build_tool_instruction(&request.tools));
    }
    if !system_text.is_empty() {
        messages.push(json!({"role": "system", "content": system_text}));
    }

    for message in &request.messages {
        messages.push(convert_message(message, native_tools));
    }

    let messages = merge_same_role_messages(messages);
    let messages = ensure_user_ending(messages);

    OpenAiChatRequest {
        model: request.model.clone(),
        messages,
        tools: native_tools.then(|| convert_anthropic_tools_to_openai(&request.tools)).filter(|t| !t.is_empty()),
        tool_choice: native_tools
            .then(|| request.tool_choice.as_ref().map(convert_anthropic_tool_choice_to_openai))
            .flatten(),
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone(),
        stream: request.stream,
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

fn convert_message(message: &Message, native_tools: bool) -> Value {
    let blocks = message.blocks();

    if native_tools {
        if let Some(tool_result_json) = try_tool_result_message(&blocks) {
            return tool_result_json;
        }
        let tool_calls: Vec<Value> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": input.to_string()},
                })),
                _ => None,
            })
            .collect();

        let text = flatten_text(&blocks);
        let mut obj = json!({"role": role_str(message.role), "content": text});
        if !tool_calls.is_empty() {
            obj["tool_calls"] = Value::Array(tool_calls);
            if text.is_empty() {
                obj["content"] = Value::Null;
            }
        }
        return obj;
    }

    json!({"role": role_str(message.role), "content": flatten_text_with_tool_uses(&blocks)})
}

/// A user message consisting solely of `tool_result` blocks maps to one or
/// more OpenAI `role: "tool"` messages rather than a single user turn; this
/// returns `Some` only for that single-tool-result case and lets the caller
/// fall back to plain text flattening otherwise.
fn try_tool_result_message(blocks: &[ContentBlock]) -> Option<Value> {
    if blocks.len() != 1 {
        return None;
    }
    match &blocks[0] {
        ContentBlock::ToolResult { tool_use_id, content, .. } => {
            let text = match content {
                crate::model::ToolResultContent::Text(t) => t.clone(),
                crate::model::ToolResultContent::Blocks(b) => flatten_text(b),
            };
            Some(json!({"role": "tool", "tool_call_id": tool_use_id, "content": text}))
        }
        _ => None,
    }
}

fn flatten_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(extract_text_item)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Like [`flatten_text`], but inline-tool-use blocks without native support
/// are rendered back out as `[Calling tool: <name>]`/`Input:` text (§4.4.1)
/// so a non-native round trip stays legible to the model reading its own
/// prior turn, and tool results come back labeled `[Tool Result]`/
/// `[Tool Error]` so the model can tell success from failure.
fn flatten_text_with_tool_uses(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { name, input, .. } => {
                Some(format!("[Calling tool: {name}]\nInput: {input}"))
            }
            ContentBlock::ToolResult { content, is_error, .. } => {
                let text = match content {
                    crate::model::ToolResultContent::Text(t) => t.clone(),
                    crate::model::ToolResultContent::Blocks(b) => flatten_text(b),
                };
                let label = if *is_error { "[Tool Error]" } else { "[Tool Result]" };
                Some(format!("{label}\n{text}"))
            }
            other => extract_text_item(other),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Extracts the plain-text representation of a single block, or `None` for
/// block kinds that have no text form (images, raw tool-use structures
/// handled separately, etc).
fn extract_text_item(block: &ContentBlock) -> Option<String> {
    match block {
        ContentBlock::Text { text } => Some(text.clone()),
        ContentBlock::Thinking { thinking } => Some(thinking.clone()),
        ContentBlock::Document { text, .. } => text.clone(),
        ContentBlock::File { content, .. } => content.clone(),
        ContentBlock::Citation { cited_text, .. } => Some(cited_text.clone()),
        ContentBlock::CodeExecutionResult { output, .. } => Some(output.clone()),
        _ => None,
    }
}

fn clean_system_content(system: Option<&MessageContent>) -> Option<String> {
    match system? {
        MessageContent::Text(t) => Some(t.clone()),
        MessageContent::Blocks(blocks) => {
            let text = flatten_text(blocks);
            (!text.is_empty()).then_some(text)
        }
    }
}

/// OpenAI rejects consecutive messages of the same role the way Anthropic
/// permits them (e.g. two `assistant` turns back to back after history
/// trimming); this merges runs of the same role into one message, joining
/// their text content.
fn merge_same_role_messages(messages: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(messages.len());
    for message in messages {
        let role = message["role"].as_str().unwrap_or("").to_string();
        if role == "tool" {
            merged.push(message);
            continue;
        }
        if let Some(last) = merged.last_mut() {
            if last["role"].as_str() == Some(role.as_str()) && last.get("tool_calls").is_none() {
                let last_text = last["content"].as_str().unwrap_or("").to_string();
                let next_text = message["content"].as_str().unwrap_or("");
                last["content"] = json!(format!("{last_text}\n\n{next_text}"));
                continue;
            }
        }
        merged.push(message);
    }
    merged
}

/// Some upstream chat models require the turn sequence to end on a user
/// message; appends a minimal placeholder user turn if the last message is
/// from the assistant.
fn ensure_user_ending(mut messages: Vec<Value>) -> Vec<Value> {
    let ends_on_assistant = messages
        .last()
        .map(|m| m["role"].as_str() == Some("assistant"))
        .unwrap_or(false);
    if ends_on_assistant {
        messages.push(json!({"role": "user", "content": "Continue."}));
    }
    messages
}

pub fn convert_anthropic_tools_to_openai(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                },
            })
        })
        .collect()
}

pub fn convert_anthropic_tool_choice_to_openai(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Any => json!("required"),
        ToolChoice::Tool { name } => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Renders tool definitions as a text instruction block for models without
/// native tool-calling support, asking for `[Calling tool:]`/`Input:` markup
/// in the reply (§4.4.1).
fn build_tool_instruction(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(
        "You have access to the following tools. To call one, write a line \
         `[Calling tool: <name>]` followed by a line `Input:` and then the \
         arguments as a JSON object:\n\n",
    );
    for tool in tools {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }
    out
}

/// Converts an inbound OpenAI chat-completions request body into the
/// canonical [`Request`] shape, the reverse of [`convert_anthropic_to_openai`].
/// `system`/`developer` role messages become the canonical `system` field;
/// everything else keeps its role and is wrapped as a single text block.
pub fn openai_request_to_canonical(body: &Value) -> Request {
    let model = body["model"].as_str().unwrap_or_default().to_string();
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    if let Some(array) = body["messages"].as_array() {
        for entry in array {
            let role = entry["role"].as_str().unwrap_or("user");
            let content = entry["content"].as_str().unwrap_or("").to_string();
            match role {
                "system" | "developer" => system_parts.push(content),
                "assistant" => messages.push(Message {
                    role: Role::Assistant,
                    content: MessageContent::Text(content),
                }),
                "tool" => {
                    let tool_use_id = entry["tool_call_id"].as_str().unwrap_or_default().to_string();
                    messages.push(Message {
                        role: Role::User,
                        content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                            tool_use_id,
                            content: crate::model::ToolResultContent::Text(content),
                            is_error: false,
                        }]),
                    });
                }
                _ => messages.push(Message { role: Role::User, content: MessageContent::Text(content) }),
            }
        }
    }

    let tools = body["tools"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|t| {
                    let f = &t["function"];
                    Some(ToolDefinition {
                        name: f["name"].as_str()?.to_string(),
                        description: f["description"].as_str().unwrap_or_default().to_string(),
                        input_schema: f["parameters"].clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Request {
        model,
        messages,
        system: (!system_parts.is_empty()).then(|| MessageContent::Text(system_parts.join("\n\n"))),
        tools,
        tool_choice: None,
        max_tokens: body["max_tokens"].as_u64().unwrap_or(4096) as u32,
        temperature: body["temperature"].as_f64().map(|v| v as f32),
        top_p: body["top_p"].as_f64().map(|v| v as f32),
        top_k: None,
        stop_sequences: Vec::new(),
        stream: body["stream"].as_bool().unwrap_or(false),
        metadata: None,
        thinking: None,
    }
}

/// Converts an OpenAI chat completion response (as raw JSON) back into
/// Anthropic-shaped content blocks. When the gateway is running in
/// non-native tool mode, inline `[Calling tool:]` blocks in the text are
/// recovered via [`crate::tool_parser::parse_inline_tool_blocks`].
pub fn convert_openai_to_anthropic(response: &Value, native_tools: bool) -> OpenAiChatResponse {
    let choice = &response["choices"][0];
    let message = &choice["message"];
    let finish_reason = choice["finish_reason"].as_str().unwrap_or("stop");
    let text = message["content"].as_str().unwrap_or("").to_string();

    let mut blocks = Vec::new();

    let (thinking, text) = tool_parser::split_thinking_blocks(&text);
    if let Some(thinking_text) = thinking {
        if !thinking_text.is_empty() {
            blocks.push(ContentBlock::Thinking { thinking: thinking_text });
        }
    }

    if native_tools {
        if let Some(tool_calls) = message["tool_calls"].as_array() {
            if !text.trim().is_empty() {
                blocks.push(ContentBlock::Text { text: text.clone() });
            }
            for call in tool_calls {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call["function"]["name"].as_str().unwrap_or_default().to_string();
                let args_str = call["function"]["arguments"].as_str().unwrap_or("{}");
                let input = serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
                blocks.push(ContentBlock::ToolUse { id, name, input });
            }
        } else if !text.trim().is_empty() {
            blocks.push(ContentBlock::Text { text });
        }
    } else {
        let outcome = tool_parser::parse_inline_tool_blocks(&text);
        if !outcome.remaining_text.trim().is_empty() {
            blocks.push(ContentBlock::Text { text: outcome.remaining_text });
        }
        for call in outcome.calls {
            blocks.push(call.to_content_block());
        }
    }

    let stop_reason = match finish_reason {
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        "stop" => "end_turn",
        other => other,
    }
    .to_string();

    OpenAiChatResponse { content: blocks, stop_reason }
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
            model: "default".into(),
            messages,
            system: None,
            tools: Vec::new(),
            tool_choice: None,
            max_tokens: 1024,
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
    fn simple_text_conversation_round_trips_roles() {
        let request = base_request(vec![text_msg(Role::User, "hello"), text_msg(Role::Assistant, "hi there")]);
        let openai = convert_anthropic_to_openai(&request, true);
        assert_eq!(openai.messages.len(), 2);
        assert_eq!(openai.messages[0]["role"], "user");
    }

    #[test]
    fn consecutive_same_role_messages_are_merged() {
        let request = base_request(vec![
            text_msg(Role::Assistant, "part one"),
            text_msg(Role::Assistant, "part two"),
        ]);
        let openai = convert_anthropic_to_openai(&request, true);
        assert_eq!(openai.messages.len(), 2);
        let merged = &openai.messages[0];
        assert!(merged["content"].as_str().unwrap().contains("part one"));
        assert!(merged["content"].as_str().unwrap().contains("part two"));
    }

    #[test]
    fn trailing_assistant_message_gets_user_continuation() {
        let request = base_request(vec![text_msg(Role::User, "go"), text_msg(Role::Assistant, "working on it")]);
        let openai = convert_anthropic_to_openai(&request, true);
        assert_eq!(openai.messages.last().unwrap()["role"], "user");
    }

    #[test]
    fn non_native_tools_fold_into_system_instruction() {
        let mut request = base_request(vec![text_msg(Role::User, "hi")]);
        request.tools.push(ToolDefinition {
            name: "search".into(),
            description: "web search".into(),
            input_schema: json!({"type": "object"}),
        });
        let openai = convert_anthropic_to_openai(&request, false);
        assert!(openai.tools.is_none());
        let system_content = openai.messages[0]["content"].as_str().unwrap();
        assert!(system_content.contains("search"));
    }

    #[test]
    fn openai_request_splits_system_role_into_canonical_system_field() {
        let body = json!({
            "model": "default",
            "max_tokens": 256,
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ]
        });
        let request = openai_request_to_canonical(&body);
        assert!(matches!(request.system, Some(MessageContent::Text(ref t)) if t == "be terse"));
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn native_tool_calls_in_response_are_recovered() {
        let response = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": "",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "search", "arguments": "{\"q\": \"rust\"}"}
                    }]
                }
            }]
        });
        let converted = convert_openai_to_anthropic(&response, true);
        assert_eq!(converted.stop_reason, "tool_use");
        assert!(matches!(converted.content[0], ContentBlock::ToolUse { .. }));
    }

    #[test]
    fn inline_tool_use_in_non_native_response_is_parsed_out() {
        let response = json!({
            "choices": [{
                "finish_reason": "stop",
                "message": {"content": "[Calling tool: search]\nInput: {\"q\": \"x\"}"}
            }]
        });
        let converted = convert_openai_to_anthropic(&response, false);
        assert!(converted.content.iter().any(|b| matches!(b, ContentBlock::ToolUse { name, .. } if name == "search")));
    }

    #[test]
    fn tool_use_and_tool_result_round_trip_through_non_native_text() {
        let request = base_request(vec![Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "search".into(),
                input: json!({"q": "rust"}),
            }]),
        }]);
        let openai = convert_anthropic_to_openai(&request, false);
        let content = openai.messages[0]["content"].as_str().unwrap();
        assert!(content.contains("[Calling tool: search]"));
        assert!(content.contains("Input: {\"q\":\"rust\"}"));
    }

    #[test]
    fn tool_error_result_is_labeled_distinctly_from_success() {
        let request = base_request(vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::ToolResult {
                    tool_use_id: "toolu_1".into(),
                    content: crate::model::ToolResultContent::Text("boom".into()),
                    is_error: true,
                },
                ContentBlock::ToolResult {
                    tool_use_id: "toolu_2".into(),
                    content: crate::model::ToolResultContent::Text("ok".into()),
                    is_error: false,
                },
            ]),
        }]);
        let openai = convert_anthropic_to_openai(&request, false);
        let content = openai.messages[0]["content"].as_str().unwrap();
        assert!(content.contains("[Tool Error]\nboom"));
        assert!(content.contains("[Tool Result]\nok"));
    }
}
