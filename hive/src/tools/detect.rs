//! Detection of tool errors that leaked into plain strings.
//!
//! Three legacy shapes are all treated as errors: the `<tool-error>` prefix,
//! the `Error:` prefix, and a stringified `ok=false` envelope in either JSON
//! or Python-literal form. Success envelopes are not errors.

use serde_json::Value;

/// Returns the extracted error message when `raw` encodes a tool error,
/// `None` otherwise.
pub fn check_tool_error(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("<tool-error>") || trimmed.starts_with("Error:") {
        return Some(trimmed.to_string());
    }
    if let Some(envelope) = parse_envelope(trimmed) {
        if envelope.get("ok").and_then(Value::as_bool) == Some(false) {
            let message = envelope
                .get("user_message")
                .and_then(Value::as_str)
                .unwrap_or("Tool reported an error")
                .to_string();
            return Some(message);
        }
    }
    None
}

/// Parses a stringified envelope: strict JSON first, then the Python-literal
/// form (`{'ok': False, ...}`) that older tools printed.
fn parse_envelope(s: &str) -> Option<Value> {
    if !s.starts_with('{') {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<Value>(s) {
        return Some(v);
    }
    serde_json::from_str(&pythonish_to_json(s)).ok()
}

/// Best-effort conversion of a Python dict literal to JSON: single-quoted
/// strings become double-quoted, and the bare constants True/False/None become
/// their JSON spellings. Only handles the flat shapes envelopes use.
fn pythonish_to_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push('"');
            }
            '"' if in_single => {
                out.push('\\');
                out.push('"');
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push('"');
            }
            '\\' if in_single || in_double => {
                out.push('\\');
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ if in_single || in_double => out.push(ch),
            _ => {
                // Outside strings, rewrite Python constants at word boundaries.
                if ch.is_ascii_alphabetic() {
                    let mut word = String::new();
                    word.push(ch);
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            word.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    match word.as_str() {
                        "True" => out.push_str("true"),
                        "False" => out.push_str("false"),
                        "None" => out.push_str("null"),
                        other => out.push_str(other),
                    }
                } else {
                    out.push(ch);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_plain_strings_are_not_errors() {
        assert_eq!(check_tool_error(""), None);
        assert_eq!(check_tool_error("All good, 45% disk used"), None);
    }

    #[test]
    fn tool_error_prefix_detected() {
        let msg = check_tool_error("<tool-error> Connection failed").unwrap();
        assert_eq!(msg, "<tool-error> Connection failed");
    }

    #[test]
    fn error_prefix_detected() {
        let msg = check_tool_error("Error: Tool 'foo' not found").unwrap();
        assert_eq!(msg, "Error: Tool 'foo' not found");
    }

    #[test]
    fn json_error_envelope_detected() {
        let raw = r#"{"ok": false, "error_type": "execution_error", "user_message": "SSH failed"}"#;
        assert_eq!(check_tool_error(raw).unwrap(), "SSH failed");
    }

    #[test]
    fn python_literal_envelope_detected() {
        let raw = "{'ok': False, 'error_type': 'execution_error', 'user_message': 'SSH failed'}";
        assert_eq!(check_tool_error(raw).unwrap(), "SSH failed");
    }

    #[test]
    fn success_envelope_is_not_an_error() {
        assert_eq!(
            check_tool_error(r#"{"ok": true, "data": {"result": 42}}"#),
            None
        );
        assert_eq!(
            check_tool_error("{'ok': True, 'data': 'fine'}"),
            None
        );
    }
}
