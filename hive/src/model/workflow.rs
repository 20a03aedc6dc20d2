//! User-authored workflow DAGs. The canvas is the canonical typed shape;
//! positional and visual attributes never reach the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Tool,
    Agent,
    Conditional,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Tool => "tool",
            Self::Agent => "agent",
            Self::Conditional => "conditional",
        }
    }
}

/// One node on the canvas. `config` is user-authored JSON; keys the engine
/// reads depend on the kind (`tool_name`/`static_params`, `agent_id`/`message`,
/// `condition`, `trigger_type`/`trigger_config`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub config: Value,
}

/// Directed edge. `branch` carries `"true"`/`"false"` for edges leaving a
/// conditional node; plain edges leave it unset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasEdge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCanvas {
    #[serde(default)]
    pub nodes: Vec<CanvasNode>,
    #[serde(default)]
    pub edges: Vec<CanvasEdge>,
}

impl WorkflowCanvas {
    pub fn node(&self, id: &str) -> Option<&CanvasNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving `id`.
    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a CanvasEdge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Edges entering `id`.
    pub fn edges_to<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a CanvasEdge> {
        self.edges.iter().filter(move |e| e.to == id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub canvas: WorkflowCanvas,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
