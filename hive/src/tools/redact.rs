//! Secret redaction for persisted tool-call arguments.
//!
//! Any key whose lower-cased name contains a member of the redaction set has
//! its value replaced with `[REDACTED]`. Records shaped like
//! `{"key": "Authorization", "value": "Bearer ..."}` redact the `value` when
//! the *semantic* key names something sensitive. Recurses through objects and
//! arrays; primitives pass through. Idempotent: `redact(redact(x)) == redact(x)`.

use serde_json::{Map, Value};

/// Closed collection of sensitive key substrings (matched case-insensitively).
const REDACTION_SET: &[&str] = &[
    "token",
    "key",
    "secret",
    "password",
    "passwd",
    "authorization",
    "bearer",
    "credential",
    "api_key",
    "access_token",
    "private_key",
    "auth",
];

pub const REDACTED: &str = "[REDACTED]";

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_lowercase();
    REDACTION_SET.iter().any(|s| lower.contains(s))
}

/// Keys that can carry a semantic field name in `{key, value}` shaped records.
const NAME_FIELDS: &[&str] = &["key", "title", "name"];

/// A record shaped like `{"key": "Authorization", "value": "..."}`: it has a
/// `value` and one of the name fields holding a string.
fn is_record_shape(obj: &Map<String, Value>) -> bool {
    obj.contains_key("value")
        && NAME_FIELDS
            .iter()
            .any(|field| obj.get(*field).and_then(Value::as_str).is_some())
}

fn semantic_name_is_sensitive(obj: &Map<String, Value>) -> bool {
    NAME_FIELDS.iter().any(|field| {
        obj.get(*field)
            .and_then(Value::as_str)
            .map(is_sensitive)
            .unwrap_or(false)
    })
}

/// Returns a copy of `value` with every sensitive value replaced.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let record_shape = is_record_shape(obj);
            let redact_record_value = record_shape && semantic_name_is_sensitive(obj);
            let mut out = Map::with_capacity(obj.len());
            for (k, v) in obj {
                // In a `{key, value}` record the name field holds a field
                // *name*, not a secret; it is exempt from the substring match
                // so `{"key": "Authorization"}` keeps its label readable.
                let is_name_field = record_shape && NAME_FIELDS.contains(&k.as_str());
                if (redact_record_value && k == "value") || (!is_name_field && is_sensitive(k)) {
                    out.insert(k.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k.clone(), redact(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        primitive => primitive.clone(),
    }
}
