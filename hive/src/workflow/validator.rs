//! Static multi-layer workflow validation: structure, compile probe, and
//! business warnings. Warnings never fail validation.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::{NodeKind, WorkflowCanvas};
use crate::tools::ToolRegistry;
use crate::workflow::engine::compile;

/// Structural caps.
const MAX_NODES: usize = 200;
const MAX_EDGES: usize = 1000;
/// Cycle detection is skipped for graphs bigger than this.
const CYCLE_CHECK_MAX_NODES: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct ValidationIssue {
    /// Node or edge the issue anchors to, when known.
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn on_node(node_id: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            message: message.into(),
        }
    }

    fn general(message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct WorkflowValidator<'a> {
    registry: &'a ToolRegistry,
}

impl<'a> WorkflowValidator<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn validate(&self, canvas: &WorkflowCanvas) -> ValidationResult {
        let mut result = ValidationResult::default();
        self.check_structure(canvas, &mut result);
        self.check_nodes(canvas, &mut result);
        self.check_edges(canvas, &mut result);
        // The compile probe only makes sense on a structurally sound graph.
        if result.errors.is_empty() {
            if let Err(e) = compile(canvas) {
                result
                    .errors
                    .push(ValidationIssue::general(format!("graph compile failed: {e}")));
            }
        }
        self.check_business(canvas, &mut result);
        result
    }

    fn check_structure(&self, canvas: &WorkflowCanvas, result: &mut ValidationResult) {
        if canvas.nodes.len() > MAX_NODES {
            result.errors.push(ValidationIssue::general(format!(
                "workflow has {} nodes, maximum is {MAX_NODES}",
                canvas.nodes.len()
            )));
        }
        if canvas.edges.len() > MAX_EDGES {
            result.errors.push(ValidationIssue::general(format!(
                "workflow has {} edges, maximum is {MAX_EDGES}",
                canvas.edges.len()
            )));
        }
        let mut seen = HashSet::new();
        for node in &canvas.nodes {
            if !seen.insert(node.id.as_str()) {
                result.errors.push(ValidationIssue::on_node(
                    &node.id,
                    "duplicate node id",
                ));
            }
        }
    }

    fn check_nodes(&self, canvas: &WorkflowCanvas, result: &mut ValidationResult) {
        for node in &canvas.nodes {
            match node.kind {
                NodeKind::Tool => {
                    match node.config.get("tool_name").and_then(|v| v.as_str()) {
                        None => result.errors.push(ValidationIssue::on_node(
                            &node.id,
                            "tool node has no tool_name",
                        )),
                        Some(name) if !self.registry.contains(name) => {
                            result.errors.push(ValidationIssue::on_node(
                                &node.id,
                                format!("tool '{name}' is not registered"),
                            ))
                        }
                        Some(_) => {}
                    }
                }
                NodeKind::Agent => {
                    let agent_id = node.config.get("agent_id").and_then(|v| v.as_i64());
                    if agent_id.is_none() {
                        result.errors.push(ValidationIssue::on_node(
                            &node.id,
                            "agent node has no agent_id",
                        ));
                    }
                }
                NodeKind::Conditional => {
                    let condition = node.config.get("condition").and_then(|v| v.as_str());
                    if condition.map_or(true, str::is_empty) {
                        result.errors.push(ValidationIssue::on_node(
                            &node.id,
                            "conditional node has no condition",
                        ));
                    }
                }
                NodeKind::Trigger => {}
            }
        }
    }

    fn check_edges(&self, canvas: &WorkflowCanvas, result: &mut ValidationResult) {
        let node_ids: HashSet<&str> = canvas.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &canvas.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !node_ids.contains(endpoint.as_str()) {
                    result.errors.push(ValidationIssue::general(format!(
                        "edge references unknown node '{endpoint}'"
                    )));
                }
            }
        }
    }

    fn check_business(&self, canvas: &WorkflowCanvas, result: &mut ValidationResult) {
        if !canvas
            .nodes
            .iter()
            .any(|n| n.kind == NodeKind::Trigger)
        {
            result.warnings.push(ValidationIssue::general(
                "workflow has no trigger node; it can only be run manually",
            ));
        }

        // Orphans: non-trigger nodes with no edges at all.
        for node in &canvas.nodes {
            let connected = canvas
                .edges
                .iter()
                .any(|e| e.from == node.id || e.to == node.id);
            if !connected && node.kind != NodeKind::Trigger && canvas.nodes.len() > 1 {
                result.warnings.push(ValidationIssue::on_node(
                    &node.id,
                    "node is not connected to the rest of the workflow",
                ));
            }
        }

        if canvas.nodes.len() <= CYCLE_CHECK_MAX_NODES {
            if let Some(cycle_node) = find_cycle(canvas) {
                result.warnings.push(ValidationIssue::on_node(
                    &cycle_node,
                    "workflow contains a cycle",
                ));
            }
        }
    }
}

/// DFS cycle check; returns a node on some cycle.
fn find_cycle(canvas: &WorkflowCanvas) -> Option<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }
    let ids: Vec<&str> = canvas.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut marks: std::collections::HashMap<&str, Mark> =
        ids.iter().map(|id| (*id, Mark::Unvisited)).collect();

    fn visit<'a>(
        canvas: &'a WorkflowCanvas,
        id: &'a str,
        marks: &mut std::collections::HashMap<&'a str, Mark>,
    ) -> Option<String> {
        marks.insert(id, Mark::InProgress);
        for edge in canvas.edges_from(id) {
            match marks.get(edge.to.as_str()) {
                Some(Mark::InProgress) => return Some(edge.to.clone()),
                Some(Mark::Unvisited) => {
                    if let Some(found) = visit(canvas, &edge.to, marks) {
                        return Some(found);
                    }
                }
                _ => {}
            }
        }
        marks.insert(id, Mark::Done);
        None
    }

    for id in ids {
        if marks[id] == Mark::Unvisited {
            if let Some(found) = visit(canvas, id, &mut marks) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanvasEdge, CanvasNode};
    use crate::tools::builtin::GetCurrentTimeTool;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(GetCurrentTimeTool));
        registry
    }

    fn canvas(nodes: Vec<CanvasNode>, edges: Vec<CanvasEdge>) -> WorkflowCanvas {
        WorkflowCanvas { nodes, edges }
    }

    fn node(id: &str, kind: NodeKind, config: serde_json::Value) -> CanvasNode {
        CanvasNode {
            id: id.to_string(),
            kind,
            config,
        }
    }

    fn edge(from: &str, to: &str) -> CanvasEdge {
        CanvasEdge {
            from: from.to_string(),
            to: to.to_string(),
            branch: None,
        }
    }

    #[test]
    fn valid_workflow_passes_with_no_errors() {
        let registry = registry();
        let validator = WorkflowValidator::new(&registry);
        let result = validator.validate(&canvas(
            vec![
                node("trigger-1", NodeKind::Trigger, json!({})),
                node("tool-1", NodeKind::Tool, json!({"tool_name": "get_current_time"})),
            ],
            vec![edge("trigger-1", "tool-1")],
        ));
        assert!(result.is_valid(), "errors: {:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let registry = registry();
        let validator = WorkflowValidator::new(&registry);
        let result = validator.validate(&canvas(
            vec![node("tool-1", NodeKind::Tool, json!({"tool_name": "ssh_exec_v9"}))],
            vec![],
        ));
        assert!(!result.is_valid());
        assert!(result.errors[0].message.contains("not registered"));
    }

    #[test]
    fn agent_node_without_agent_id_is_an_error() {
        let registry = registry();
        let validator = WorkflowValidator::new(&registry);
        let result = validator.validate(&canvas(
            vec![node("agent-1", NodeKind::Agent, json!({"agent_id": null}))],
            vec![],
        ));
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("no agent_id")));
    }

    #[test]
    fn missing_trigger_is_only_a_warning() {
        let registry = registry();
        let validator = WorkflowValidator::new(&registry);
        let result = validator.validate(&canvas(
            vec![node("tool-1", NodeKind::Tool, json!({"tool_name": "get_current_time"}))],
            vec![],
        ));
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("no trigger")));
    }

    #[test]
    fn orphaned_node_warns() {
        let registry = registry();
        let validator = WorkflowValidator::new(&registry);
        let result = validator.validate(&canvas(
            vec![
                node("trigger-1", NodeKind::Trigger, json!({})),
                node("tool-1", NodeKind::Tool, json!({"tool_name": "get_current_time"})),
                node("tool-2", NodeKind::Tool, json!({"tool_name": "get_current_time"})),
            ],
            vec![edge("trigger-1", "tool-1")],
        ));
        // An isolated node is schedulable (it is its own entry), so this is a
        // warning, not an error.
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.node_id.as_deref() == Some("tool-2")));
    }

    #[test]
    fn cycle_fails_compile_probe_and_warns() {
        let registry = registry();
        let validator = WorkflowValidator::new(&registry);
        let result = validator.validate(&canvas(
            vec![
                node("trigger-1", NodeKind::Trigger, json!({})),
                node("a", NodeKind::Tool, json!({"tool_name": "get_current_time"})),
                node("b", NodeKind::Tool, json!({"tool_name": "get_current_time"})),
            ],
            vec![edge("trigger-1", "a"), edge("a", "b"), edge("b", "a")],
        ));
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("compile failed")));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("cycle")));
    }

    #[test]
    fn edge_to_unknown_node_is_an_error() {
        let registry = registry();
        let validator = WorkflowValidator::new(&registry);
        let result = validator.validate(&canvas(
            vec![node("trigger-1", NodeKind::Trigger, json!({}))],
            vec![edge("trigger-1", "missing")],
        ));
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("unknown node 'missing'")));
    }
}
