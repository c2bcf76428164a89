//! JSON repair cascade for malformed tool-call input (§4.4.1). Each stage is
//! tried in order against the original text; the first stage that parses
//! successfully wins. Grounded on the two parallel Python implementations of
//! this cascade: strip trailing commas, escape bare control characters,
//! close an unclosed trailing string, close unbalanced brackets, and finally
//! fall back to the last complete `}` seen in the text.

/// Outcome of attempting to repair and parse a JSON fragment.
pub struct RepairResult {
    pub value: serde_json::Value,
    /// Name of the stage that succeeded, for diagnostics.
    pub stage: &'static str,
}

/// Runs the repair cascade. Returns `None` if no stage produces valid JSON.
pub fn repair_and_parse(raw: &str) -> Option<RepairResult> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(RepairResult { value, stage: "exact" });
    }

    let no_trailing_commas = strip_trailing_commas(trimmed);
    if let Ok(value) = serde_json::from_str(&no_trailing_commas) {
        return Some(RepairResult { value, stage: "strip_trailing_commas" });
    }

    let escaped = escape_control_chars_in_strings(&no_trailing_commas);
    if let Ok(value) = serde_json::from_str(&escaped) {
        return Some(RepairResult { value, stage: "escape_control_chars" });
    }

    let closed_strings = close_unclosed_string(&escaped);
    if let Ok(value) = serde_json::from_str(&closed_strings) {
        return Some(RepairResult { value, stage: "close_unclosed_string" });
    }

    let closed_brackets = close_unbalanced_brackets(&closed_strings);
    if let Ok(value) = serde_json::from_str(&closed_brackets) {
        return Some(RepairResult { value, stage: "close_unbalanced_brackets" });
    }

    if let Some(candidate) = last_complete_object(trimmed) {
        if let Ok(value) = serde_json::from_str(&candidate) {
            return Some(RepairResult { value, stage: "last_complete_object" });
        }
    }

    None
}

/// Removes a trailing comma immediately before a closing `}` or `]`, outside
/// of string literals.
fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = input.chars().collect();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }

        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Escapes bare control characters (newline, tab, carriage return) that
/// appear literally inside string literals, which `serde_json` rejects.
fn escape_control_chars_in_strings(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        if in_string {
            if escaped {
                out.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }

    out
}

/// If the text ends mid-string (an odd number of unescaped quotes), appends
/// a closing quote.
fn close_unclosed_string(input: &str) -> String {
    let mut in_string = false;
    let mut escaped = false;
    for c in input.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ => {}
        }
    }

    if in_string {
        format!("{input}\"")
    } else {
        input.to_string()
    }
}

/// Appends whatever closing braces/brackets are needed to balance the text,
/// outside of string literals.
fn close_unbalanced_brackets(input: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
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
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = input.to_string();
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Last-resort recovery: scans backward for the last `}` that, paired with
/// the first `{`, yields a balanced (brace-counted, string-aware) substring.
fn last_complete_object(input: &str) -> Option<String> {
    let start = input.find('{')?;
    let chars: Vec<char> = input[start..].chars().collect();

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut last_balanced_end = None;

    for (i, &c) in chars.iter().enumerate() {
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
                    last_balanced_end = Some(i);
                }
            }
            _ => {}
        }
    }

    last_balanced_end.map(|end| chars[..=end].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_json_parses_on_first_stage() {
        let r = repair_and_parse(r#"{"a": 1}"#).unwrap();
        assert_eq!(r.stage, "exact");
    }

    #[test]
    fn trailing_comma_before_brace_is_stripped() {
        let r = repair_and_parse(r#"{"a": 1, "b": 2,}"#).unwrap();
        assert_eq!(r.stage, "strip_trailing_commas");
        assert_eq!(r.value["b"], 2);
    }

    #[test]
    fn bare_newline_in_string_is_escaped() {
        let raw = "{\"a\": \"line1\nline2\"}";
        let r = repair_and_parse(raw).unwrap();
        assert_eq!(r.value["a"], "line1\nline2");
    }

    #[test]
    fn unclosed_string_is_closed() {
        let raw = r#"{"a": "hello"#;
        let r = repair_and_parse(raw).unwrap();
        assert_eq!(r.value["a"], "hello");
    }

    #[test]
    fn unclosed_brackets_are_closed() {
        let raw = r#"{"a": [1, 2, {"b": 3}"#;
        let r = repair_and_parse(raw).unwrap();
        assert_eq!(r.value["a"][1], 2);
    }

    #[test]
    fn trailing_garbage_after_last_complete_object_is_dropped() {
        let raw = r#"{"a": 1}garbage after"#;
        let r = repair_and_parse(raw).unwrap();
        assert_eq!(r.value["a"], 1);
    }

    #[test]
    fn empty_input_yields_no_result() {
        assert!(repair_and_parse("").is_none());
        assert!(repair_and_parse("   ").is_none());
    }

    #[test]
    fn totally_unparseable_input_yields_no_result() {
        assert!(repair_and_parse("not json at all").is_none());
    }
}
