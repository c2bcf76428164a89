//! Inline tool-call parsing (§4.4.1) and hallucinated tool-result cleanup
//! (§4.6). When the upstream model has no native tool-calling support, it is
//! instructed to describe tool invocations in its plain-text reply instead;
//! this module recovers those invocations back into [`ParsedToolCall`]s.
//!
//! Two wire formats are recognized. The primary one is
//! `[Calling tool: <name>]` followed by an `Input:` line carrying a JSON
//! object (optionally fenced in ``` or ```json). The secondary one, tried
//! only when no `[Calling tool:]` marker is present anywhere in the text, is
//! XML where the tag name itself is the tool name, e.g.
//! `<Read><file_path>/x</file_path></Read>`.

use regex::Regex;

use crate::json_repair;
use crate::model::ParsedToolCall;

const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";
const INPUT_MARKER: &str = "Input:";
const FALLBACK_RAW_CHARS: usize = 2000;

pub struct InlineParseOutcome {
    pub remaining_text: String,
    pub calls: Vec<ParsedToolCall>,
}

fn calling_tool_regex() -> Regex {
    Regex::new(r"\[Calling tool:\s*([^\]]+)\]").expect("valid regex")
}

/// Recovers tool calls described inline in `text`, returning the call list in
/// order plus whatever text is left once the recognized tool-call markup is
/// removed.
pub fn parse_inline_tool_blocks(text: &str) -> InlineParseOutcome {
    if calling_tool_regex().is_match(text) {
        parse_calling_tool_format(text)
    } else {
        parse_xml_tag_format(text)
    }
}

fn parse_calling_tool_format(text: &str) -> InlineParseOutcome {
    let re = calling_tool_regex();
    let mut remaining = String::with_capacity(text.len());
    let mut calls = Vec::new();
    let mut cursor = 0usize;
    let mut search_from = 0usize;

    while let Some(caps) = re.captures(&text[search_from..]) {
        let whole = caps.get(0).expect("group 0 always present");
        let name = caps.get(1).expect("regex requires group 1").as_str().trim().to_string();
        let marker_start = search_from + whole.start();
        let marker_end = search_from + whole.end();

        remaining.push_str(&text[cursor..marker_start]);

        let (call, consumed) = extract_tool_call_input(&text[marker_end..], &name);
        calls.push(call);

        cursor = marker_end + consumed;
        search_from = cursor;
    }

    remaining.push_str(&text[cursor..]);
    InlineParseOutcome { remaining_text: remaining, calls }
}

/// Looks for the `Input:` line following a `[Calling tool:]` marker and
/// extracts the JSON object after it, returning the parsed call and how many
/// bytes of `after_marker` were consumed.
fn extract_tool_call_input(after_marker: &str, name: &str) -> (ParsedToolCall, usize) {
    let Some(input_rel) = after_marker.find(INPUT_MARKER) else {
        return (failed_call(name, after_marker, "missing Input: marker"), 0);
    };

    let after_input = &after_marker[input_rel + INPUT_MARKER.len()..];
    let (candidate, candidate_len) = extract_json_candidate(after_input);
    let consumed = input_rel + INPUT_MARKER.len() + candidate_len;

    match json_repair::repair_and_parse(candidate) {
        Some(result) => (
            ParsedToolCall {
                id: ParsedToolCall::new_id(),
                name: name.to_string(),
                input: result.value,
                raw_text: None,
                parse_error: None,
            },
            consumed,
        ),
        None => (failed_call(name, candidate, "json repair cascade failed"), consumed),
    }
}

/// Slices out the JSON object candidate from the text following an `Input:`
/// marker: skips leading whitespace and an optional code fence opener, then
/// depth-tracks from the first `{` to its matching `}` (string/escape aware).
/// If the object never balances (stream cut off mid-JSON), the candidate
/// runs to the end of the text, or to a closing code fence if one is found.
fn extract_json_candidate(text: &str) -> (&str, usize) {
    let after_ws = text.trim_start();
    let mut skip = text.len() - after_ws.len();
    let mut body = after_ws;

    if body.starts_with("```") {
        if let Some(newline_idx) = body.find('\n') {
            skip += newline_idx + 1;
            body = &text[skip..];
        }
    }

    let Some(brace_rel) = body.find('{') else {
        return (body, text.len());
    };
    skip += brace_rel;
    let json_start = &text[skip..];

    match find_balanced_json_end(json_start) {
        Some(end_idx) => (&json_start[..=end_idx], skip + end_idx + 1),
        None => {
            let end = json_start.find("\n```").unwrap_or(json_start.len());
            (&json_start[..end], skip + end)
        }
    }
}

/// Depth/string/escape-aware scan for the byte index of the `}` that closes
/// the `{` at the start of `s`. Every structural character JSON cares about
/// is ASCII, so the returned index is always a valid slice boundary.
fn find_balanced_json_end(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in s.char_indices() {
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
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn failed_call(name: &str, raw: &str, reason: &str) -> ParsedToolCall {
    let raw_capped: String = raw.chars().take(FALLBACK_RAW_CHARS).collect();
    ParsedToolCall {
        id: ParsedToolCall::new_id(),
        name: name.to_string(),
        input: serde_json::json!({"_raw": raw_capped, "_parse_error": reason}),
        raw_text: Some(raw_capped),
        parse_error: Some(reason.to_string()),
    }
}

/// Secondary format: a top-level tag whose name is itself the tool name,
/// with each parameter as a nested tag. Only reached when no
/// `[Calling tool:]` marker was found in the text at all.
fn parse_xml_tag_format(text: &str) -> InlineParseOutcome {
    let mut remaining = String::with_capacity(text.len());
    let mut calls = Vec::new();
    let mut rest = text;

    while let Some((before, name, body, after)) = find_next_xml_tag_block(rest) {
        remaining.push_str(before);
        let params = parse_xml_child_params(body);
        calls.push(ParsedToolCall {
            id: ParsedToolCall::new_id(),
            name: name.to_string(),
            input: serde_json::Value::Object(params),
            raw_text: None,
            parse_error: None,
        });
        rest = after;
    }
    remaining.push_str(rest);

    InlineParseOutcome { remaining_text: remaining, calls }
}

fn parse_xml_child_params(body: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    let mut rest = body;
    while let Some((_before, name, value_body, after)) = find_next_xml_tag_block(rest) {
        let value_text = value_body.trim();
        let value = serde_json::from_str(value_text)
            .unwrap_or_else(|_| serde_json::Value::String(value_text.to_string()));
        map.insert(name.to_string(), value);
        rest = after;
    }
    map
}

/// Finds the next `<Tag>...</Tag>` block in `text` where `Tag` is a plain
/// identifier (no attributes). The `regex` crate has no backreferences, so
/// matching a dynamic tag name against its own closing tag is done by hand
/// rather than with a single pattern.
fn find_next_xml_tag_block(text: &str) -> Option<(&str, &str, &str, &str)> {
    let mut search_start = 0usize;
    loop {
        let lt_rel = text[search_start..].find('<')?;
        let lt_idx = search_start + lt_rel;

        if text[lt_idx..].starts_with("</") {
            search_start = lt_idx + 2;
            continue;
        }
        let Some(gt_rel) = text[lt_idx..].find('>') else {
            return None;
        };
        let gt_idx = lt_idx + gt_rel;
        let tag_name = &text[lt_idx + 1..gt_idx];

        if tag_name.is_empty() || !is_valid_tag_name(tag_name) {
            search_start = gt_idx + 1;
            continue;
        }

        let close_tag = format!("</{tag_name}>");
        let Some(close_rel) = text[gt_idx + 1..].find(close_tag.as_str()) else {
            search_start = gt_idx + 1;
            continue;
        };
        let close_idx = gt_idx + 1 + close_rel;

        return Some((
            &text[..lt_idx],
            tag_name,
            &text[gt_idx + 1..close_idx],
            &text[close_idx + close_tag.len()..],
        ));
    }
}

fn is_valid_tag_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits a leading `<thinking>...</thinking>` block off of `text`, returning
/// the thinking content (if present) and the remaining text.
pub fn split_thinking_blocks(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim_start();
    if !trimmed.starts_with(THINKING_OPEN) {
        return (None, text.to_string());
    }
    let after_open = &trimmed[THINKING_OPEN.len()..];
    match after_open.find(THINKING_CLOSE) {
        Some(close_idx) => {
            let thinking = after_open[..close_idx].trim().to_string();
            let rest = after_open[close_idx + THINKING_CLOSE.len()..].trim_start().to_string();
            (Some(thinking), rest)
        }
        None => (None, text.to_string()),
    }
}

/// Splits `text` into code-point-safe chunks of at most `max_chars`
/// characters, used to shape `ContentBlockDelta` payload sizes.
pub fn iter_text_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max_chars).map(|chunk| chunk.iter().collect()).collect()
}

fn hallucination_regex() -> Regex {
    Regex::new(r"(?s)\[Calling tool:[^\]]*\].*?(\[Tool Result\])").expect("valid regex")
}

fn trailing_incomplete_marker_regex() -> Regex {
    Regex::new(r"\[Calling tool:[^\]]*\]\s*$").expect("valid regex")
}

/// Whether `text` contains a fabricated tool result: the model wrote both
/// the `[Calling tool:]`/`Input:` call AND a `[Tool Result]` response to its
/// own invented call, rather than a real result being spliced in by the
/// caller.
pub fn detect_hallucinated_tool_result(text: &str) -> bool {
    hallucination_regex().is_match(text)
}

/// Truncates `text` at the start of a fabricated `[Tool Result]` marker
/// (§4.6), and also drops a trailing `[Calling tool:]` marker that has no
/// `Input:` before the end of the text (an interrupted tool-call opener). By
/// construction, a regex matching `\s*$` right after the closing `]` means
/// nothing but whitespace follows, so no `Input:` was ever written.
pub fn strip_hallucinated_tool_result(text: &str) -> String {
    let mut result = match hallucination_regex().captures(text) {
        Some(caps) => {
            let marker = caps.get(1).expect("capture group 1 always present on match");
            text[..marker.start()].to_string()
        }
        None => text.to_string(),
    };

    if let Some(m) = trailing_incomplete_marker_regex().find(&result) {
        result.truncate(m.start());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_calling_tool_marker_with_json_input() {
        let text = "Let me check.\n[Calling tool: Read]\nInput: {\"file_path\": \"/tmp/a.txt\"}\nDone.";
        let outcome = parse_inline_tool_blocks(text);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, "Read");
        assert_eq!(outcome.calls[0].input["file_path"], "/tmp/a.txt");
        assert!(outcome.remaining_text.contains("Let me check."));
        assert!(outcome.remaining_text.contains("Done."));
    }

    #[test]
    fn parses_fenced_json_input() {
        let text = "[Calling tool: Search]\nInput:\n```json\n{\"query\": \"rust\"}\n```\n";
        let outcome = parse_inline_tool_blocks(text);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].input["query"], "rust");
    }

    #[test]
    fn repairs_trailing_comma_in_input_json() {
        let text = "[Calling tool: Write]\nInput: {\"path\": \"a\", \"content\": \"b\",}";
        let outcome = parse_inline_tool_blocks(text);
        assert_eq!(outcome.calls[0].input["path"], "a");
        assert!(outcome.calls[0].parse_error.is_none());
    }

    #[test]
    fn unparseable_input_falls_back_to_raw_with_parse_error() {
        let text = "[Calling tool: Broken]\nInput: not even close to json";
        let outcome = parse_inline_tool_blocks(text);
        assert_eq!(outcome.calls.len(), 1);
        let call = &outcome.calls[0];
        assert!(call.parse_error.is_some());
        assert!(call.input["_raw"].as_str().unwrap().contains("not even close to json"));
        assert!(call.input["_parse_error"].is_string());
    }

    #[test]
    fn multiple_calling_tool_blocks_are_all_recovered() {
        let text = "[Calling tool: A]\nInput: {\"x\": 1}\nthen\n[Calling tool: B]\nInput: {\"y\": 2}\n";
        let outcome = parse_inline_tool_blocks(text);
        assert_eq!(outcome.calls.len(), 2);
        assert_eq!(outcome.calls[0].name, "A");
        assert_eq!(outcome.calls[1].name, "B");
        assert!(outcome.remaining_text.contains("then"));
    }

    #[test]
    fn xml_secondary_format_uses_tag_name_as_tool_name() {
        let text = "<Read><file_path>/x</file_path></Read>";
        let outcome = parse_inline_tool_blocks(text);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, "Read");
        assert_eq!(outcome.calls[0].input["file_path"], "/x");
    }

    #[test]
    fn xml_format_json_parses_numeric_param_values() {
        let text = "<Resize><width>800</width><height>600</height></Resize>";
        let outcome = parse_inline_tool_blocks(text);
        assert_eq!(outcome.calls[0].input["width"], 800);
        assert_eq!(outcome.calls[0].input["height"], 600);
    }

    #[test]
    fn xml_format_is_not_tried_when_calling_tool_marker_present() {
        let text = "[Calling tool: Read]\nInput: {\"file_path\": \"/x\"}\n<Ignored>text</Ignored>";
        let outcome = parse_inline_tool_blocks(text);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, "Read");
        assert!(outcome.remaining_text.contains("<Ignored>text</Ignored>"));
    }

    #[test]
    fn thinking_block_is_split_from_remaining_text() {
        let (thinking, rest) = split_thinking_blocks("<thinking>plan it out</thinking>then answer");
        assert_eq!(thinking.unwrap(), "plan it out");
        assert_eq!(rest, "then answer");
    }

    #[test]
    fn chunking_is_code_point_safe() {
        let chunks = iter_text_chunks("a\u{4e2d}b\u{4e2d}c", 2);
        assert_eq!(chunks.join(""), "a\u{4e2d}b\u{4e2d}c");
    }

    #[test]
    fn hallucinated_tool_result_is_detected_and_truncated() {
        let text = "[Calling tool: search]\nInput: {\"q\": \"x\"}\n[Tool Result]\nfake result the model invented";
        assert!(detect_hallucinated_tool_result(text));
        let stripped = strip_hallucinated_tool_result(text);
        assert_eq!(stripped, "[Calling tool: search]\nInput: {\"q\": \"x\"}\n");
    }

    #[test]
    fn real_text_without_fake_result_is_untouched() {
        let text = "no fake results here";
        assert!(!detect_hallucinated_tool_result(text));
        assert_eq!(strip_hallucinated_tool_result(text), text);
    }

    #[test]
    fn trailing_incomplete_calling_tool_marker_is_stripped() {
        let text = "Here is some text.\n[Calling tool: Read]";
        let stripped = strip_hallucinated_tool_result(text);
        assert_eq!(stripped, "Here is some text.\n");
    }

    #[test]
    fn trailing_calling_tool_marker_with_input_is_kept() {
        let text = "[Calling tool: Read]\nInput: {\"file_path\": \"/x\"}";
        let stripped = strip_hallucinated_tool_result(text);
        assert_eq!(stripped, text);
    }
}
