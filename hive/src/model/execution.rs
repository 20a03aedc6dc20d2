//! Workflow execution state: phase/result machine and node output envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Execution phase, for executions and individual nodes alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Waiting,
    Running,
    Finished,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

/// Result, set exactly when the phase transitions to `finished`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecResult {
    Success,
    Failure,
    Cancelled,
}

impl ExecResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Meta half of a node output envelope. Always carries the phase; carries the
/// result and optional error once finished. Node-type specific annotations
/// (tool name, trigger type, agent id...) ride in `extra`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Node output envelope: `{value, meta}`. Stored on the node execution state
/// and read by downstream variable resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeEnvelope {
    pub value: Value,
    pub meta: EnvelopeMeta,
}

impl NodeEnvelope {
    /// Finished/success envelope.
    pub fn success(value: Value) -> Self {
        Self {
            value,
            meta: EnvelopeMeta {
                phase: Phase::Finished,
                result: Some(ExecResult::Success),
                error_message: None,
                extra: Map::new(),
            },
        }
    }

    /// Finished/failure envelope with a null value.
    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            value: Value::Null,
            meta: EnvelopeMeta {
                phase: Phase::Finished,
                result: Some(ExecResult::Failure),
                error_message: Some(error_message.into()),
                extra: Map::new(),
            },
        }
    }

    /// Adds a node-type specific annotation to the meta.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.extra.insert(key.into(), value);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Whether a stored node output uses the envelope shape (vs a legacy
    /// payload): an object with exactly the `value` and `meta` keys.
    pub fn is_envelope(value: &Value) -> bool {
        match value.as_object() {
            Some(obj) => obj.len() == 2 && obj.contains_key("value") && obj.contains_key("meta"),
            None => false,
        }
    }
}

/// One run of a workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: i64,
    pub workflow_id: i64,
    pub phase: Phase,
    pub result: Option<ExecResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    /// Reason recorded when the execution was cancelled.
    pub cancel_reason: Option<String>,
    pub triggered_by: Option<String>,
}

impl WorkflowExecution {
    /// Invariant: once finished, the result is set and timestamps frozen.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }
}

/// Per-node execution state keyed by node id within one execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeExecutionState {
    pub id: i64,
    pub execution_id: i64,
    pub node_id: String,
    pub phase: Phase,
    pub result: Option<ExecResult>,
    /// The node's output envelope, once it has one.
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_shape() {
        let env = NodeEnvelope::success(json!({"result": 85, "status": "completed"}))
            .with_meta("tool_name", json!("score_tool"));
        let v = env.to_value();
        assert_eq!(v["value"]["result"], 85);
        assert_eq!(v["meta"]["phase"], "finished");
        assert_eq!(v["meta"]["result"], "success");
        assert_eq!(v["meta"]["tool_name"], "score_tool");
    }

    #[test]
    fn failure_envelope_carries_error() {
        let env = NodeEnvelope::failure("boom");
        assert_eq!(env.meta.result, Some(ExecResult::Failure));
        assert_eq!(env.meta.error_message.as_deref(), Some("boom"));
        assert!(env.value.is_null());
    }

    #[test]
    fn envelope_detection() {
        assert!(NodeEnvelope::is_envelope(
            &json!({"value": 1, "meta": {"phase": "finished"}})
        ));
        assert!(!NodeEnvelope::is_envelope(&json!({"result": 1})));
        assert!(!NodeEnvelope::is_envelope(&json!(42)));
        assert!(!NodeEnvelope::is_envelope(
            &json!({"value": 1, "meta": {}, "other": 2})
        ));
    }

    #[test]
    fn envelope_round_trips() {
        let env = NodeEnvelope::success(json!([1, 2, 3]));
        let back: NodeEnvelope = serde_json::from_value(env.to_value()).unwrap();
        assert_eq!(back.value, json!([1, 2, 3]));
        assert_eq!(back.meta.phase, Phase::Finished);
    }
}
