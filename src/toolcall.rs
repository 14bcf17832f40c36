// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Tool-call extraction from raw model text
//
// Backends without native tool calling are asked to reply with
// `{"tool_calls":[...]}`. Models rarely comply exactly, so `parse` tries
// progressively looser strategies. Any failure means "plain text".

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::message::{new_call_id, FunctionCall, ToolCall};

/// Extract tool calls from model output.
///
/// Strategies, first success wins:
/// 1. decode the whole text as `{"tool_calls":[...]}`
/// 2. extract the `tool_calls` array by bracket matching and decode that
/// 3. decode the span between the first `{` and the last `}`
/// 4. scan for the first `"name"` and `"arguments"` values
///
/// Returns `None` when nothing usable is found.
pub fn parse(text: &str) -> Option<Vec<ToolCall>> {
    let cleaned = strip_fences(strip_role_label(text.trim()));
    if cleaned.is_empty() {
        return None;
    }

    let entries = decode_envelope(cleaned)
        .or_else(|| {
            extract_tool_calls_array(cleaned)
                .and_then(|array| decode_envelope(&format!("{{\"tool_calls\":{array}}}")))
        })
        .or_else(|| outer_object(cleaned).and_then(decode_envelope));

    let calls = match entries {
        Some(entries) => entries.iter().filter_map(normalize_entry).collect(),
        None => heuristic_scan(cleaned).into_iter().collect::<Vec<_>>(),
    };

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

/// Canonical text form of `calls`, as placed in prompts and expected back.
pub fn render(calls: &[ToolCall]) -> String {
    let entries: Vec<Value> = calls
        .iter()
        .map(|call| {
            let arguments = serde_json::from_str::<Value>(&call.function.arguments)
                .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
            serde_json::json!({
                "name": call.function.name,
                "arguments": arguments,
            })
        })
        .collect();
    serde_json::json!({ "tool_calls": entries }).to_string()
}

fn role_label() -> Option<&'static Regex> {
    static ROLE_LABEL: OnceLock<Option<Regex>> = OnceLock::new();
    ROLE_LABEL
        .get_or_init(|| Regex::new(r"(?i)^\s*assistant\s*:\s*").ok())
        .as_ref()
}

fn strip_role_label(text: &str) -> &str {
    match role_label().and_then(|re| re.find(text)) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

/// Strip a surrounding ``` fence, including an optional language tag.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Decode `{"tool_calls":[...]}` and return the raw entries.
fn decode_envelope(text: &str) -> Option<Vec<Value>> {
    let value: Value = serde_json::from_str(text).ok()?;
    match value.get("tool_calls")? {
        Value::Array(entries) => Some(entries.clone()),
        _ => None,
    }
}

/// Locate the `tool_calls` key and return its array value verbatim.
///
/// Brackets inside string literals do not count toward depth.
fn extract_tool_calls_array(text: &str) -> Option<&str> {
    let key = text.find("\"tool_calls\"")?;
    let after_key = key + "\"tool_calls\"".len();
    let colon = after_key + text[after_key..].find(':')?;
    let open = colon + 1 + text[colon + 1..].find(|c: char| !c.is_whitespace())?;
    if text.as_bytes()[open] != b'[' {
        return None;
    }
    let close = matching_close(text, open)?;
    Some(&text[open..=close])
}

/// Index of the bracket closing the one at `open`, skipping quoted strings.
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Turn one decoded entry into a wire `ToolCall`.
///
/// Accepts both `{function:{name,arguments}}` and flat `{name,arguments}`
/// shapes. Object arguments, or an object under `parameters`, are encoded
/// as a JSON string. Entries with no name or no arguments are dropped.
fn normalize_entry(entry: &Value) -> Option<ToolCall> {
    let entry = entry.as_object()?;
    let function = entry
        .get("function")
        .and_then(Value::as_object)
        .unwrap_or(entry);

    let name = function
        .get("name")
        .or_else(|| entry.get("name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())?;

    let arguments = arguments_string(function).or_else(|| arguments_string(entry))?;

    let id = entry
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_call_id);

    Some(ToolCall {
        id,
        kind: "function".to_string(),
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    })
}

fn arguments_string(fields: &Map<String, Value>) -> Option<String> {
    let value = fields
        .get("arguments")
        .filter(|v| !v.is_null())
        .or_else(|| fields.get("parameters").filter(|v| !v.is_null()))?;
    match value {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Last resort: find `"name": "<fn>"` and `"arguments": ...` anywhere.
fn heuristic_scan(text: &str) -> Option<ToolCall> {
    let name_start = value_start(text, "\"name\"")?;
    let (name, _) = read_string_literal(&text[name_start..])?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let arguments = value_start(text, "\"arguments\"")
        .and_then(|start| {
            let rest = &text[start..];
            if rest.starts_with('"') {
                read_string_literal(rest).map(|(s, _)| s)
            } else if rest.starts_with('{') {
                matching_close(rest, 0).map(|end| rest[..=end].to_string())
            } else {
                None
            }
        })
        .unwrap_or_else(|| "{}".to_string());

    Some(ToolCall::function(name, arguments))
}

/// Offset of the value following `key` and a colon, or `None` if `key`
/// never appears as an object key.
fn value_start(text: &str, key: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = text[from..].find(key) {
        let after = from + pos + key.len();
        let rest = &text[after..];
        let trimmed = rest.trim_start();
        if let Some(value) = trimmed.strip_prefix(':') {
            let value = value.trim_start();
            return Some(text.len() - value.len());
        }
        from = after;
    }
    None
}

/// Read a quoted JSON string at the start of `text`, returning the
/// unescaped value and the literal's byte length.
fn read_string_literal(text: &str) -> Option<(String, usize)> {
    if !text.starts_with('"') {
        return None;
    }
    let bytes = text.as_bytes();
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            let literal = &text[..=i];
            let value = serde_json::from_str::<String>(literal)
                .unwrap_or_else(|_| literal[1..literal.len() - 1].replace("\\\"", "\""));
            return Some((value, i + 1));
        }
    }
    None
}
