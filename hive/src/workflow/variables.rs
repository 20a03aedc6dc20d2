//! Type-preserving variable resolution for node configs.
//!
//! Syntax: `${node_id}` or `${node_id.path.to.field}`. A string that is one
//! whole reference resolves to the actual value (type preserved); a string
//! with surrounding text stringifies each substitution. `result` aliases
//! `value`, so `${n.result.score}` and `${n.value.score}` are equivalent.
//! Meta access is `${n.meta.field}`. Legacy non-enveloped outputs resolve
//! through a fallback: `${n}` returns the `result` field when present, else
//! the whole payload.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::model::NodeEnvelope;

#[derive(Debug, Error, PartialEq)]
pub enum VariableError {
    #[error("node '{0}' not found (available: {1})")]
    NodeNotFound(String, String),
    #[error("field '{0}' not found ({1})")]
    FieldNotFound(String, String),
    #[error("invalid variable path: {0}")]
    InvalidPath(String),
}

static VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("variable pattern compiles"));
static PURE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{([^}]+)\}$").expect("pure pattern compiles"));

/// Recursively resolves variables in `data` against `node_outputs`, keyed by
/// node id. Non-string scalars pass through untouched.
pub fn resolve_variables(data: &Value, node_outputs: &HashMap<String, Value>) -> Value {
    match data {
        Value::String(s) => resolve_string(s, node_outputs),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_variables(v, node_outputs)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_variables(v, node_outputs))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(text: &str, node_outputs: &HashMap<String, Value>) -> Value {
    if !text.contains("${") {
        return Value::String(text.to_string());
    }

    // Pure reference: the whole string is one variable, type is preserved.
    if let Some(capture) = PURE_PATTERN.captures(text) {
        let path = &capture[1];
        return match resolve_variable_path(path, node_outputs) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path, error = %e, "variable resolution failed, keeping original");
                Value::String(text.to_string())
            }
        };
    }

    // Interpolation: each substitution is stringified; failures keep the
    // literal substring.
    let replaced = VAR_PATTERN.replace_all(text, |caps: &regex::Captures<'_>| {
        let path = &caps[1];
        match resolve_variable_path(path, node_outputs) {
            Ok(value) => stringify(&value),
            Err(e) => {
                tracing::warn!(path, error = %e, "interpolation failed, keeping literal");
                caps[0].to_string()
            }
        }
    });
    Value::String(replaced.into_owned())
}

/// Python-style str() rendering for interpolation.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => {
            if *b {
                "True".to_string()
            } else {
                "False".to_string()
            }
        }
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

/// Resolves one `node.field.subfield` path to its value.
pub fn resolve_variable_path(
    path: &str,
    node_outputs: &HashMap<String, Value>,
) -> Result<Value, VariableError> {
    if path.is_empty() || path.starts_with('.') {
        return Err(VariableError::InvalidPath(path.to_string()));
    }
    let mut parts = path.split('.');
    let node_id = parts.next().unwrap_or_default();
    let field_path: Vec<&str> = parts.collect();

    let Some(output) = node_outputs.get(node_id) else {
        let mut available: Vec<&str> = node_outputs.keys().map(String::as_str).collect();
        available.sort_unstable();
        return Err(VariableError::NodeNotFound(
            node_id.to_string(),
            available.join(", "),
        ));
    };

    if NodeEnvelope::is_envelope(output) {
        resolve_envelope(output, &field_path)
    } else {
        resolve_legacy(output, &field_path)
    }
}

fn resolve_envelope(output: &Value, field_path: &[&str]) -> Result<Value, VariableError> {
    let value = &output["value"];
    if field_path.is_empty() {
        return Ok(value.clone());
    }
    match field_path[0] {
        "value" => traverse(value, &field_path[1..]),
        "meta" => {
            if field_path.len() < 2 {
                return Err(VariableError::FieldNotFound(
                    "meta".to_string(),
                    "meta access requires a field: ${node.meta.field}".to_string(),
                ));
            }
            traverse(&output["meta"], &field_path[1..])
        }
        // `result` prefers a real `result` field inside the value and falls
        // back to the value alias, so `${n.result.score}` ≡ `${n.value.score}`
        // when the value has no `result` key of its own.
        "result" => traverse(value, field_path)
            .or_else(|_| traverse(value, &field_path[1..])),
        _ => traverse(value, field_path),
    }
}

fn resolve_legacy(output: &Value, field_path: &[&str]) -> Result<Value, VariableError> {
    if field_path.is_empty() {
        // `${n}` on a legacy payload: the `result` field when present.
        if let Some(result) = output.get("result") {
            return Ok(result.clone());
        }
        return Ok(output.clone());
    }
    match field_path[0] {
        // `${n.result}` / `${n.value}` both reach the legacy `result` field.
        "result" | "value" => match output.get("result") {
            Some(result) => traverse(result, &field_path[1..]),
            None => Ok(output.clone()),
        },
        "meta" => {
            if field_path.len() < 2 {
                return Err(VariableError::FieldNotFound(
                    "meta".to_string(),
                    "meta access requires a field: ${node.meta.field}".to_string(),
                ));
            }
            // Legacy outputs keep meta-ish fields at the top level.
            traverse(output, &field_path[1..])
        }
        _ => traverse(output, field_path),
    }
}

fn traverse(start: &Value, path: &[&str]) -> Result<Value, VariableError> {
    let mut current = start;
    for field in path {
        current = match current {
            Value::Object(map) => map.get(*field).ok_or_else(|| {
                let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
                keys.sort_unstable();
                VariableError::FieldNotFound(
                    field.to_string(),
                    format!("available fields: {}", keys.join(", ")),
                )
            })?,
            Value::Array(items) => {
                let index: usize = field.parse().map_err(|_| {
                    VariableError::FieldNotFound(
                        field.to_string(),
                        "list index must be numeric".to_string(),
                    )
                })?;
                items.get(index).ok_or_else(|| {
                    VariableError::FieldNotFound(
                        field.to_string(),
                        format!("list index out of range (length {})", items.len()),
                    )
                })?
            }
            other => {
                return Err(VariableError::FieldNotFound(
                    field.to_string(),
                    format!("cannot access a field on {}", kind_of(other)),
                ))
            }
        };
    }
    Ok(current.clone())
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs() -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert(
            "tool-1".to_string(),
            json!({
                "value": {"result": 85, "status": "completed"},
                "meta": {"phase": "finished", "result": "success"}
            }),
        );
        map.insert("legacy-1".to_string(), json!({"result": {"score": 7}, "status": "done"}));
        map.insert("list-1".to_string(), json!({"value": {"items": [10, 20, 30]}, "meta": {"phase": "finished"}}));
        map
    }

    #[test]
    fn pure_variable_preserves_type() {
        // `result` reaches the real result field inside the value.
        let resolved = resolve_variables(&json!("${tool-1.result}"), &outputs());
        assert_eq!(resolved, json!(85));
        assert!(resolved.is_i64());

        let resolved = resolve_variables(&json!("${tool-1.value}"), &outputs());
        assert_eq!(resolved, json!({"result": 85, "status": "completed"}));
    }

    #[test]
    fn result_aliases_value() {
        let via_result = resolve_variable_path("tool-1.result.status", &outputs()).unwrap();
        let via_value = resolve_variable_path("tool-1.value.status", &outputs()).unwrap();
        assert_eq!(via_result, via_value);
        assert_eq!(via_result, json!("completed"));
    }

    #[test]
    fn bare_reference_returns_envelope_value() {
        let resolved = resolve_variable_path("tool-1", &outputs()).unwrap();
        assert_eq!(resolved, json!({"result": 85, "status": "completed"}));
    }

    #[test]
    fn meta_access_requires_field() {
        let resolved = resolve_variable_path("tool-1.meta.phase", &outputs()).unwrap();
        assert_eq!(resolved, json!("finished"));
        assert!(matches!(
            resolve_variable_path("tool-1.meta", &outputs()),
            Err(VariableError::FieldNotFound(_, _))
        ));
    }

    #[test]
    fn interpolation_stringifies() {
        let resolved = resolve_variables(
            &json!("Score: ${tool-1.result} (${tool-1.meta.result})"),
            &outputs(),
        );
        assert_eq!(resolved, json!("Score: 85 (success)"));
    }

    #[test]
    fn interpolation_keeps_literal_on_failure() {
        let resolved = resolve_variables(&json!("Value: ${missing-node.x}"), &outputs());
        assert_eq!(resolved, json!("Value: ${missing-node.x}"));
    }

    #[test]
    fn pure_variable_failure_keeps_original_string() {
        let resolved = resolve_variables(&json!("${missing-node}"), &outputs());
        assert_eq!(resolved, json!("${missing-node}"));
    }

    #[test]
    fn legacy_outputs_fall_back() {
        assert_eq!(
            resolve_variable_path("legacy-1", &outputs()).unwrap(),
            json!({"score": 7})
        );
        assert_eq!(
            resolve_variable_path("legacy-1.result.score", &outputs()).unwrap(),
            json!(7)
        );
        assert_eq!(
            resolve_variable_path("legacy-1.meta.status", &outputs()).unwrap(),
            json!("done")
        );
    }

    #[test]
    fn list_indexing() {
        assert_eq!(
            resolve_variable_path("list-1.value.items.1", &outputs()).unwrap(),
            json!(20)
        );
        assert!(matches!(
            resolve_variable_path("list-1.value.items.9", &outputs()),
            Err(VariableError::FieldNotFound(_, _))
        ));
    }

    #[test]
    fn nested_structures_resolve_recursively() {
        let config = json!({
            "message": "Got ${tool-1.result.result}",
            "params": {"score": "${tool-1.result.result}", "flags": ["${tool-1.meta.phase}"]},
            "count": 3
        });
        let resolved = resolve_variables(&config, &outputs());
        assert_eq!(resolved["message"], json!("Got 85"));
        assert_eq!(resolved["params"]["score"], json!(85));
        assert_eq!(resolved["params"]["flags"][0], json!("finished"));
        assert_eq!(resolved["count"], json!(3));
    }

    #[test]
    fn alias_falls_back_when_value_has_no_result_key() {
        let mut map = HashMap::new();
        map.insert(
            "score-1".to_string(),
            json!({"value": {"score": 92}, "meta": {"phase": "finished"}}),
        );
        // `${n.result.score}` and `${n.value.score}` are equivalent here.
        assert_eq!(
            resolve_variable_path("score-1.result.score", &map).unwrap(),
            json!(92)
        );
        assert_eq!(
            resolve_variable_path("score-1.value.score", &map).unwrap(),
            json!(92)
        );
        // And a bare `result` on such a value aliases to the whole value.
        assert_eq!(
            resolve_variable_path("score-1.result", &map).unwrap(),
            json!({"score": 92})
        );
    }

    #[test]
    fn missing_node_error_lists_available() {
        match resolve_variable_path("nope", &outputs()) {
            Err(VariableError::NodeNotFound(node, available)) => {
                assert_eq!(node, "nope");
                assert!(available.contains("tool-1"));
            }
            other => panic!("expected NodeNotFound, got {other:?}"),
        }
    }
}
