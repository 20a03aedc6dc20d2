//! Node execution handlers. Every node produces a `{value, meta}` envelope;
//! failures become `finished/failure` envelopes carrying the error message.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::db::{Db, NewMessage};
use crate::error::HiveError;
use crate::llm::parse_tool_arguments;
use crate::model::{CanvasNode, NodeEnvelope, NodeKind, ThreadType};
use crate::tools::{ToolOutput, ToolRegistry};
use crate::turn::TurnEngine;
use crate::workflow::expr::ExpressionEvaluator;
use crate::workflow::variables::resolve_variables;

/// Shared dependencies for node execution.
pub struct NodeExecutorDeps {
    pub db: Db,
    pub registry: Arc<ToolRegistry>,
    pub turn: Arc<TurnEngine>,
}

/// Runs one node's logic. Errors are returned for the engine to convert into
/// a failure envelope and node-state transition.
pub async fn execute_node(
    deps: &NodeExecutorDeps,
    execution_id: i64,
    node: &CanvasNode,
    node_outputs: &HashMap<String, Value>,
) -> Result<NodeEnvelope, HiveError> {
    match node.kind {
        NodeKind::Trigger => execute_trigger(node),
        NodeKind::Tool => execute_tool(deps, node, node_outputs).await,
        NodeKind::Agent => execute_agent(deps, execution_id, node, node_outputs).await,
        NodeKind::Conditional => execute_conditional(node, node_outputs),
    }
}

/// Trigger: single source, no inputs; emits `{triggered: true}` with the
/// trigger kind and config as meta.
fn execute_trigger(node: &CanvasNode) -> Result<NodeEnvelope, HiveError> {
    let trigger_type = node
        .config
        .get("trigger_type")
        .and_then(Value::as_str)
        .unwrap_or("manual")
        .to_string();
    let trigger_config = node
        .config
        .get("trigger_config")
        .cloned()
        .unwrap_or_else(|| json!({}));
    Ok(NodeEnvelope::success(json!({"triggered": true}))
        .with_meta("trigger_type", json!(trigger_type))
        .with_meta("trigger_config", trigger_config))
}

async fn execute_tool(
    deps: &NodeExecutorDeps,
    node: &CanvasNode,
    node_outputs: &HashMap<String, Value>,
) -> Result<NodeEnvelope, HiveError> {
    let resolved = resolve_variables(&node.config, node_outputs);
    let Some(tool_name) = resolved.get("tool_name").and_then(Value::as_str) else {
        return Err(HiveError::Validation(format!(
            "Tool node {} missing tool_name in config",
            node.id
        )));
    };
    let Some(tool) = deps.registry.get(tool_name) else {
        return Err(HiveError::NotFound(format!("Tool {tool_name} not found")));
    };
    let static_params = match resolved.get("static_params") {
        Some(Value::String(s)) => parse_tool_arguments(s),
        Some(other) => other.clone(),
        None => json!({}),
    };
    tracing::info!(node_id = %node.id, tool = tool_name, "executing tool node");

    match tool.invoke(static_params.clone()).await {
        ToolOutput::Ok { data } => Ok(NodeEnvelope::success(data)
            .with_meta("tool_name", json!(tool_name))
            .with_meta("parameters", static_params)),
        ToolOutput::Err { user_message, .. } => Err(HiveError::Execution(user_message)),
    }
}

/// Agent: a null or missing `agent_id` fails the node as a misconfiguration,
/// never as "agent not found".
async fn execute_agent(
    deps: &NodeExecutorDeps,
    execution_id: i64,
    node: &CanvasNode,
    node_outputs: &HashMap<String, Value>,
) -> Result<NodeEnvelope, HiveError> {
    let resolved = resolve_variables(&node.config, node_outputs);
    let Some(agent_id) = resolved.get("agent_id").and_then(Value::as_i64) else {
        return Err(HiveError::Validation(format!(
            "Agent node {} missing agent_id in config",
            node.id
        )));
    };
    let message = resolved
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Execute this task")
        .to_string();

    let agent = deps
        .db
        .get_agent(agent_id)
        .await
        .map_err(|_| HiveError::NotFound(format!("Agent {agent_id} not found in database")))?;
    tracing::info!(node_id = %node.id, agent_id, agent = %agent.name, "executing agent node");

    let thread = deps
        .db
        .create_thread(
            agent_id,
            &format!("Workflow execution {execution_id}"),
            ThreadType::Manual,
            false,
            &agent.system_instructions,
        )
        .await?;
    deps.db
        .create_message(thread.id, NewMessage::user(&message))
        .await?;

    let outcome = deps.turn.run_thread(thread.id).await?;
    let serialized: Vec<Value> = outcome
        .messages
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "role": m.role.as_str(),
                "content": m.content,
                "sent_at": m.sent_at.to_rfc3339(),
                "thread_id": m.thread_id,
            })
        })
        .collect();

    Ok(NodeEnvelope::success(json!({
        "messages": serialized,
        "messages_created": outcome.messages.len(),
    }))
    .with_meta("agent_id", json!(agent_id))
    .with_meta("agent_name", json!(agent.name))
    .with_meta("thread_id", json!(thread.id)))
}

fn execute_conditional(
    node: &CanvasNode,
    node_outputs: &HashMap<String, Value>,
) -> Result<NodeEnvelope, HiveError> {
    let resolved = resolve_variables(&node.config, node_outputs);
    let condition_raw = node
        .config
        .get("condition")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if condition_raw.is_empty() {
        return Err(HiveError::Validation(format!(
            "Conditional node {} missing condition",
            node.id
        )));
    }

    let resolved_condition = resolved.get("condition").cloned().unwrap_or_default();
    let result = match &resolved_condition {
        // Pure variable that resolved to a non-string: plain truthiness.
        Value::String(expr) => {
            match ExpressionEvaluator.evaluate(expr, &HashMap::new()) {
                Ok(v) => truthy(&v),
                Err(e) => {
                    tracing::error!(node_id = %node.id, condition = expr.as_str(), error = %e, "condition evaluation failed");
                    false
                }
            }
        }
        other => truthy(other),
    };
    let branch = if result { "true" } else { "false" };
    tracing::info!(node_id = %node.id, condition = condition_raw, result, "conditional evaluated");

    Ok(NodeEnvelope {
        value: json!({"result": result, "branch": branch}),
        meta: crate::model::EnvelopeMeta {
            phase: crate::model::Phase::Finished,
            result: Some(crate::model::ExecResult::Success),
            error_message: None,
            extra: {
                let mut extra = Map::new();
                extra.insert("condition".into(), json!(condition_raw));
                extra.insert("evaluation_method".into(), json!("sandboxed_expression"));
                extra
            },
        },
    })
}

/// Python-style truthiness over JSON values.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(kind: NodeKind, config: Value) -> CanvasNode {
        CanvasNode {
            id: "n-1".to_string(),
            kind,
            config,
        }
    }

    #[test]
    fn trigger_envelope_carries_meta() {
        let env = execute_trigger(&node(
            NodeKind::Trigger,
            json!({"trigger_type": "webhook", "trigger_config": {"path": "/hook"}}),
        ))
        .unwrap();
        assert_eq!(env.value, json!({"triggered": true}));
        assert_eq!(env.meta.extra["trigger_type"], "webhook");
        assert_eq!(env.meta.extra["trigger_config"]["path"], "/hook");
    }

    #[test]
    fn conditional_pure_variable_condition() {
        // `${tool-1.result} >= 80` with the resolver substituting 85.
        let mut outputs = HashMap::new();
        outputs.insert(
            "tool-1".to_string(),
            json!({
                "value": {"result": 85, "status": "completed"},
                "meta": {"phase": "finished", "result": "success"}
            }),
        );
        let env = execute_conditional(
            &node(NodeKind::Conditional, json!({"condition": "${tool-1.result} >= 80"})),
            &outputs,
        )
        .unwrap();
        assert_eq!(env.value, json!({"result": true, "branch": "true"}));
    }

    #[test]
    fn conditional_failure_routes_false() {
        let env = execute_conditional(
            &node(NodeKind::Conditional, json!({"condition": "undefined_var > 1"})),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(env.value["branch"], "false");
    }

    #[test]
    fn conditional_without_condition_is_misconfigured() {
        let err = execute_conditional(&node(NodeKind::Conditional, json!({})), &HashMap::new());
        assert!(matches!(err, Err(HiveError::Validation(_))));
    }

    #[test]
    fn truthiness_matches_python() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(!truthy(&json!({})));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!({"a": 1})));
    }
}
