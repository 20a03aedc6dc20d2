//! Canvas compilation and execution.
//!
//! `compile` turns a validated canvas into a dependency-ordered node list and
//! rejects shapes the engine cannot run (unknown endpoints, cycles, no entry,
//! unreachable nodes). Execution walks that order under the phase/result state
//! machine, skipping not-taken conditional branches, re-reading the execution
//! row before each node so cancellation is cooperative, and publishing
//! `node_state_changed` per transition plus one final `execution_finished`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::db::Db;
use crate::error::HiveError;
use crate::events::{EventPublisher, EventType};
use crate::model::{
    CanvasNode, ExecResult, NodeEnvelope, NodeKind, WorkflowCanvas, WorkflowExecution,
};
use crate::tools::ToolRegistry;
use crate::turn::TurnEngine;
use crate::workflow::executors::{execute_node, NodeExecutorDeps};

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("edge references unknown node '{0}'")]
    UnknownNode(String),
    #[error("graph has no entry point")]
    NoEntryPoint,
    #[error("cycle detected involving nodes: {0}")]
    CycleDetected(String),
    #[error("nodes unreachable from any entry point: {0}")]
    Unreachable(String),
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),
}

/// A canvas the engine can run: nodes in dependency order.
#[derive(Debug, PartialEq)]
pub struct CompiledWorkflow {
    pub canvas: WorkflowCanvas,
    /// Topological execution order.
    pub order: Vec<String>,
}

/// Compiles a canvas, rejecting shapes the engine cannot schedule.
pub fn compile(canvas: &WorkflowCanvas) -> Result<CompiledWorkflow, CompileError> {
    let mut seen = HashSet::new();
    for node in &canvas.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(CompileError::DuplicateNodeId(node.id.clone()));
        }
    }
    for edge in &canvas.edges {
        if !seen.contains(edge.from.as_str()) {
            return Err(CompileError::UnknownNode(edge.from.clone()));
        }
        if !seen.contains(edge.to.as_str()) {
            return Err(CompileError::UnknownNode(edge.to.clone()));
        }
    }

    // Kahn's algorithm over in-degrees; leftovers mean a cycle.
    let mut in_degree: HashMap<&str, usize> =
        canvas.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &canvas.edges {
        *in_degree.entry(edge.to.as_str()).or_default() += 1;
    }
    let mut ready: VecDeque<&str> = canvas
        .nodes
        .iter()
        .filter(|n| in_degree[n.id.as_str()] == 0)
        .map(|n| n.id.as_str())
        .collect();
    if ready.is_empty() && !canvas.nodes.is_empty() {
        return Err(CompileError::NoEntryPoint);
    }
    let entries: HashSet<&str> = ready.iter().copied().collect();

    let mut order = Vec::with_capacity(canvas.nodes.len());
    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        for edge in canvas.edges_from(id) {
            let degree = in_degree.get_mut(edge.to.as_str()).expect("known node");
            *degree -= 1;
            if *degree == 0 {
                ready.push_back(edge.to.as_str());
            }
        }
    }
    if order.len() != canvas.nodes.len() {
        let stuck: Vec<&str> = canvas
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !order.iter().any(|o| o == id))
            .collect();
        return Err(CompileError::CycleDetected(stuck.join(", ")));
    }

    // Reachability from the entry set; islands are a compile failure.
    let mut reachable: HashSet<&str> = entries.clone();
    let mut frontier: VecDeque<&str> = entries.into_iter().collect();
    while let Some(id) = frontier.pop_front() {
        for edge in canvas.edges_from(id) {
            if reachable.insert(edge.to.as_str()) {
                frontier.push_back(edge.to.as_str());
            }
        }
    }
    // With every zero-in-degree node an entry, all topo-sorted nodes are
    // reachable; the check guards future edge semantics.
    let unreachable: Vec<&str> = canvas
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !reachable.contains(id))
        .collect();
    if !unreachable.is_empty() {
        return Err(CompileError::Unreachable(unreachable.join(", ")));
    }

    Ok(CompiledWorkflow {
        canvas: canvas.clone(),
        order,
    })
}

/// Executes workflows against one database and tool registry.
pub struct WorkflowEngine {
    db: Db,
    deps: NodeExecutorDeps,
    publisher: Arc<EventPublisher>,
}

impl WorkflowEngine {
    pub fn new(
        db: Db,
        registry: Arc<ToolRegistry>,
        turn: Arc<TurnEngine>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            deps: NodeExecutorDeps {
                db: db.clone(),
                registry,
                turn,
            },
            db,
            publisher,
        }
    }

    /// Reserves an execution row in `waiting` without starting it.
    pub async fn reserve(
        &self,
        workflow_id: i64,
        triggered_by: Option<&str>,
    ) -> Result<WorkflowExecution, HiveError> {
        self.db.reserve_execution(workflow_id, triggered_by).await
    }

    /// Starts a reserved execution and runs it to completion. Double starts
    /// conflict; the caller that reuses a reserved execution sees its actual
    /// state, never a synthesized one.
    pub async fn run_reserved(&self, execution_id: i64) -> Result<WorkflowExecution, HiveError> {
        self.db.start_execution(execution_id).await?;
        self.run_to_completion(execution_id).await
    }

    /// Reserve + start in one step.
    pub async fn execute(
        &self,
        workflow_id: i64,
        triggered_by: Option<&str>,
    ) -> Result<WorkflowExecution, HiveError> {
        let execution = self.reserve(workflow_id, triggered_by).await?;
        self.run_reserved(execution.id).await
    }

    /// Requests cooperative cancellation; the engine aborts before the next
    /// node starts.
    pub async fn cancel(&self, execution_id: i64, reason: &str) -> Result<(), HiveError> {
        self.db.request_execution_cancel(execution_id, reason).await
    }

    async fn run_to_completion(&self, execution_id: i64) -> Result<WorkflowExecution, HiveError> {
        let execution = self.db.get_execution(execution_id).await?;
        let workflow = self.db.get_workflow(execution.workflow_id).await?;

        let compiled = match compile(&workflow.canvas) {
            Ok(c) => c,
            Err(e) => {
                let finished = self
                    .finish(execution_id, ExecResult::Failure, Some(e.to_string()))
                    .await?;
                return Ok(finished);
            }
        };

        let nodes: HashMap<&str, &CanvasNode> = compiled
            .canvas
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n))
            .collect();

        let mut node_outputs: HashMap<String, Value> = HashMap::new();
        let mut executed: HashSet<String> = HashSet::new();
        // Branch tag chosen by each finished conditional.
        let mut branches: HashMap<String, String> = HashMap::new();
        let mut first_error: Option<String> = None;

        for node_id in &compiled.order {
            // Cancellation is cooperative: re-read the row before each node.
            if self.db.execution_cancel_requested(execution_id).await? {
                tracing::info!(execution_id, "execution cancelled before node {node_id}");
                let finished = self
                    .finish(execution_id, ExecResult::Cancelled, None)
                    .await?;
                return Ok(finished);
            }

            let node = nodes[node_id.as_str()];
            if !self.should_run(&compiled.canvas, node_id, &executed, &branches) {
                tracing::debug!(execution_id, node_id = %node_id, "skipping node off the taken path");
                continue;
            }

            let state = self.db.create_node_state(execution_id, node_id).await?;
            let state = self.db.mark_node_running(state.id).await?;
            self.publish_node_state(execution_id, node_id, "running", None, None)
                .await;

            match execute_node(&self.deps, execution_id, node, &node_outputs).await {
                Ok(envelope) => {
                    let output = envelope.to_value();
                    self.db
                        .mark_node_finished(state.id, ExecResult::Success, Some(output.clone()), None)
                        .await?;
                    self.publish_node_state(execution_id, node_id, "success", Some(output.clone()), None)
                        .await;
                    if node.kind == NodeKind::Conditional {
                        if let Some(branch) = envelope.value.get("branch").and_then(Value::as_str)
                        {
                            branches.insert(node_id.clone(), branch.to_string());
                        }
                    }
                    node_outputs.insert(node_id.clone(), output);
                    executed.insert(node_id.clone());
                }
                Err(e) => {
                    let message = format!("{} node {} failed: {}", node.kind.as_str(), node_id, e);
                    tracing::error!(execution_id, node_id = %node_id, error = %e, "node failed");
                    let failure = NodeEnvelope::failure(e.to_string()).to_value();
                    self.db
                        .mark_node_finished(
                            state.id,
                            ExecResult::Failure,
                            Some(failure.clone()),
                            Some(e.to_string()),
                        )
                        .await?;
                    self.publish_node_state(
                        execution_id,
                        node_id,
                        "failed",
                        Some(failure),
                        Some(e.to_string()),
                    )
                    .await;
                    first_error.get_or_insert(message);
                    // Downstream nodes on this path never see an executed
                    // parent, so they are skipped; other branches continue.
                }
            }
        }

        let (result, error) = match first_error {
            Some(error) => (ExecResult::Failure, Some(error)),
            None => (ExecResult::Success, None),
        };
        let finished = self.finish(execution_id, result, error).await?;
        Ok(finished)
    }

    /// A node runs when it is an entry, or when at least one incoming edge
    /// comes from an executed node with a matching branch tag.
    fn should_run(
        &self,
        canvas: &WorkflowCanvas,
        node_id: &str,
        executed: &HashSet<String>,
        branches: &HashMap<String, String>,
    ) -> bool {
        let incoming: Vec<_> = canvas.edges_to(node_id).collect();
        if incoming.is_empty() {
            return true;
        }
        incoming.iter().any(|edge| {
            if !executed.contains(&edge.from) {
                return false;
            }
            match (&edge.branch, branches.get(&edge.from)) {
                (Some(tag), Some(taken)) => tag == taken,
                (Some(_), None) => false,
                (None, _) => true,
            }
        })
    }

    async fn finish(
        &self,
        execution_id: i64,
        result: ExecResult,
        error: Option<String>,
    ) -> Result<WorkflowExecution, HiveError> {
        let finished = self.db.finish_execution(execution_id, result, error).await?;
        let status = match result {
            ExecResult::Success => "success",
            ExecResult::Failure => "failed",
            ExecResult::Cancelled => "cancelled",
        };
        self.publisher
            .publish(
                EventType::ExecutionFinished,
                json!({
                    "event_type": "execution_finished",
                    "execution_id": execution_id,
                    "status": status,
                    "error": finished.error,
                    "duration_ms": finished.duration_ms,
                }),
            )
            .await;
        Ok(finished)
    }

    async fn publish_node_state(
        &self,
        execution_id: i64,
        node_id: &str,
        status: &str,
        output: Option<Value>,
        error: Option<String>,
    ) {
        self.publisher
            .publish(
                EventType::NodeStateChanged,
                json!({
                    "event_type": "node_state_changed",
                    "execution_id": execution_id,
                    "node_id": node_id,
                    "status": status,
                    "output": output,
                    "error": error,
                }),
            )
            .await;
    }
}
