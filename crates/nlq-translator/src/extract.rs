//! Lenient reply parsing
//!
//! Accepts, in order: a bare JSON object, JSON inside fenced code blocks,
//! then any balanced `{...}` object found in prose. Among candidates that
//! carry a `type`, `visualization` beats `database` beats `conversational`.
//! Prose with no JSON becomes a conversational reply.

use crate::wire::TranslatorReply;
use serde_json::{Map, Value};

/// Parse a translator reply body
///
/// # Errors
/// Empty body, or a selected object that does not fit `TranslatorReply`.
pub fn parse_reply(body: &str) -> Result<TranslatorReply, String> {
    let text = body.trim();
    if text.is_empty() {
        return Err("empty reply".to_string());
    }

    let mut candidates = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => vec![map],
        _ => Vec::new(),
    };
    if candidates.is_empty() {
        candidates = fenced_objects(text);
    }
    if candidates.is_empty() {
        candidates = balanced_objects(text);
    }

    match select(candidates) {
        Some(map) => serde_json::from_value(Value::Object(map)).map_err(|e| e.to_string()),
        None => Ok(TranslatorReply {
            success: true,
            kind: Some("conversational".to_string()),
            response: Some(text.to_string()),
            ..TranslatorReply::default()
        }),
    }
}

fn priority(map: &Map<String, Value>) -> u8 {
    match map.get("type").and_then(Value::as_str) {
        Some("visualization") => 3,
        Some("database") => 2,
        Some("conversational") => 1,
        _ => 0,
    }
}

fn select(candidates: Vec<Map<String, Value>>) -> Option<Map<String, Value>> {
    let first_typed = candidates
        .iter()
        .enumerate()
        .filter(|(_, m)| m.contains_key("type"))
        // max_by_key keeps the last maximum; reverse so the earliest wins ties
        .rev()
        .max_by_key(|(_, m)| priority(m))
        .map(|(idx, _)| idx);

    let idx = first_typed.unwrap_or(0);
    candidates.into_iter().nth(idx)
}

fn fenced_objects(text: &str) -> Vec<Map<String, Value>> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("```") else {
            break;
        };
        let block = after[..end].trim_start_matches("json");
        out.extend(balanced_objects(block));
        rest = &after[end + 3..];
    }
    out
}

/// Every top-level balanced object that parses, scanning left to right
fn balanced_objects(text: &str) -> Vec<Map<String, Value>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        match matching_brace(bytes, start) {
            Some(end) => {
                let slice = &text[start..=end];
                if let Some(map) = parse_object(slice) {
                    out.push(map);
                    pos = end + 1;
                } else {
                    pos = start + 1;
                }
            }
            None => pos = start + 1,
        }
    }
    out
}

fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
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

fn parse_object(slice: &str) -> Option<Map<String, Value>> {
    let parsed = serde_json::from_str::<Value>(slice)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&strip_trailing_commas(slice)).ok());
    match parsed {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// `{"a": 1,}` -> `{"a": 1}`, outside string literals
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn bare_json() {
        let reply = parse_reply(r#"{"type":"database","mql_query":{"collection":"users"},"explanation":"ok"}"#)
            .unwrap();
        assert_eq!(reply.kind.as_deref(), Some("database"));
        assert_eq!(reply.explanation, "ok");
    }

    #[test]
    fn fenced_block_inside_prose() {
        let body = "Sure! Here is the plan:\n```json\n{\"type\": \"database\", \"mql\": {\"collection\": \"orders\"}, \"explanation\": \"Orders\"}\n```\nLet me know.";
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.operation(), Some(&json!({"collection": "orders"})));
    }

    #[test]
    fn visualization_preferred_over_database() {
        let body = r#"first {"type": "database", "explanation": "a"} then {"type": "visualization", "explanation": "b"} and {"type": "conversational", "response": "c"}"#;
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.kind.as_deref(), Some("visualization"));
        assert_eq!(reply.explanation, "b");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let body = r#"note: {"type": "conversational", "response": "use {curly} braces"}"#;
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.response.as_deref(), Some("use {curly} braces"));
    }

    #[test]
    fn trailing_commas_are_tolerated() {
        let body = r#"reply: {"type": "database", "explanation": "x", "mql": {"collection": "a",},}"#;
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.operation(), Some(&json!({"collection": "a"})));
    }

    #[test]
    fn prose_only_is_conversational() {
        let reply = parse_reply("I can only help with database questions.").unwrap();
        assert_eq!(reply.kind.as_deref(), Some("conversational"));
        assert_eq!(reply.message(), Some("I can only help with database questions."));
    }

    #[test]
    fn empty_body_is_an_error() {
        assert!(parse_reply("   ").is_err());
    }
}
