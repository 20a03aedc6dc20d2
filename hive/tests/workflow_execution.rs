//! End-to-end workflow execution: branch routing, cancellation, failure
//! propagation, and the reservation flow.

use std::sync::Arc;

use async_trait::async_trait;
use hive::db::{Db, NewAgent};
use hive::events::{EventBus, EventSubscriber, EventType};
use hive::model::{
    CanvasEdge, CanvasNode, ExecResult, NodeKind, Phase, UserRole, WorkflowCanvas,
};
use hive::tools::{Tool, ToolOutput};
use hive::workflow::WorkflowEngine;
use hive::{EventPublisher, MockLlm, ToolRegistry, TurnEngine};
use serde_json::{json, Value};

/// Tool returning a fixed score payload.
struct ScoreTool;

#[async_trait]
impl Tool for ScoreTool {
    fn name(&self) -> &str {
        "score_tool"
    }
    fn description(&self) -> &str {
        "Returns a fixed score"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _args: Value) -> ToolOutput {
        ToolOutput::ok(json!({"result": 85, "status": "completed"}))
    }
}

/// Tool that takes long enough to cancel around.
struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow_tool"
    }
    fn description(&self) -> &str {
        "Sleeps, then succeeds"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _args: Value) -> ToolOutput {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        ToolOutput::ok(json!({"done": true}))
    }
}

/// Tool that always reports an execution error.
struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing_tool"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _args: Value) -> ToolOutput {
        ToolOutput::err(
            hive::tools::ToolErrorKind::ExecutionError,
            "deliberate failure",
        )
    }
}

struct FinishEvents(std::sync::Mutex<Vec<Value>>);

#[async_trait]
impl EventSubscriber for FinishEvents {
    async fn handle(&self, _event: EventType, data: Value) -> Result<(), String> {
        self.0.lock().unwrap().push(data);
        Ok(())
    }
}

struct Stack {
    _dir: tempfile::TempDir,
    db: Db,
    engine: Arc<WorkflowEngine>,
    finishes: Arc<FinishEvents>,
    owner_id: i64,
}

async fn stack() -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path().join("hive.db")).await.unwrap();
    let owner_id = db
        .create_user("wf@example.com", None, UserRole::User)
        .await
        .unwrap()
        .id;

    let bus = Arc::new(EventBus::new());
    let finishes = Arc::new(FinishEvents(std::sync::Mutex::new(Vec::new())));
    bus.subscribe(EventType::ExecutionFinished, finishes.clone())
        .await;
    let publisher = Arc::new(EventPublisher::new(bus));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ScoreTool));
    registry.register(Arc::new(SlowTool));
    registry.register(Arc::new(FailingTool));
    let registry = Arc::new(registry);

    let turn = Arc::new(TurnEngine::new(
        db.clone(),
        Arc::clone(&registry),
        Arc::new(MockLlm::fixed("Handled by the agent.")),
        Arc::clone(&publisher),
    ));
    let engine = Arc::new(WorkflowEngine::new(
        db.clone(),
        registry,
        turn,
        publisher,
    ));
    Stack {
        _dir: dir,
        db,
        engine,
        finishes,
        owner_id,
    }
}

fn node(id: &str, kind: NodeKind, config: Value) -> CanvasNode {
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

fn branch_edge(from: &str, to: &str, branch: &str) -> CanvasEdge {
    CanvasEdge {
        from: from.to_string(),
        to: to.to_string(),
        branch: Some(branch.to_string()),
    }
}

#[tokio::test]
async fn conditional_routes_only_the_true_branch() {
    let stack = stack().await;
    // tool-1 scores 85; the condition compares against 80; only the
    // true-branch successor may execute.
    let canvas = WorkflowCanvas {
        nodes: vec![
            node("trigger-1", NodeKind::Trigger, json!({})),
            node("tool-1", NodeKind::Tool, json!({"tool_name": "score_tool"})),
            node(
                "conditional-1",
                NodeKind::Conditional,
                json!({"condition": "${tool-1.result} >= 80"}),
            ),
            node("tool-high", NodeKind::Tool, json!({"tool_name": "score_tool"})),
            node("tool-low", NodeKind::Tool, json!({"tool_name": "score_tool"})),
        ],
        edges: vec![
            edge("trigger-1", "tool-1"),
            edge("tool-1", "conditional-1"),
            branch_edge("conditional-1", "tool-high", "true"),
            branch_edge("conditional-1", "tool-low", "false"),
        ],
    };
    let workflow = stack
        .db
        .create_workflow(stack.owner_id, "routing", &canvas)
        .await
        .unwrap();

    let finished = stack.engine.execute(workflow.id, Some("api")).await.unwrap();
    assert_eq!(finished.phase, Phase::Finished);
    assert_eq!(finished.result, Some(ExecResult::Success));

    let states = stack.db.list_node_states(finished.id).await.unwrap();
    let executed: Vec<&str> = states.iter().map(|s| s.node_id.as_str()).collect();
    assert!(executed.contains(&"conditional-1"));
    assert!(executed.contains(&"tool-high"));
    assert!(!executed.contains(&"tool-low"), "false branch must not run");

    let conditional = states
        .iter()
        .find(|s| s.node_id == "conditional-1")
        .unwrap();
    let output = conditional.output.as_ref().unwrap();
    assert_eq!(output["value"]["result"], true);
    assert_eq!(output["value"]["branch"], "true");
}

#[tokio::test]
async fn agent_nodes_run_a_turn_and_serialise_messages() {
    let stack = stack().await;
    let agent = stack
        .db
        .create_agent(NewAgent {
            owner_id: stack.owner_id,
            name: "step".into(),
            model: "gpt-4o-mini".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let canvas = WorkflowCanvas {
        nodes: vec![
            node("trigger-1", NodeKind::Trigger, json!({})),
            node(
                "agent-1",
                NodeKind::Agent,
                json!({"agent_id": agent.id, "message": "Summarise the results"}),
            ),
        ],
        edges: vec![edge("trigger-1", "agent-1")],
    };
    let workflow = stack
        .db
        .create_workflow(stack.owner_id, "agent step", &canvas)
        .await
        .unwrap();

    let finished = stack.engine.execute(workflow.id, None).await.unwrap();
    assert_eq!(finished.result, Some(ExecResult::Success));

    let states = stack.db.list_node_states(finished.id).await.unwrap();
    let agent_state = states.iter().find(|s| s.node_id == "agent-1").unwrap();
    let output = agent_state.output.as_ref().unwrap();
    assert_eq!(output["meta"]["agent_id"], agent.id);
    assert!(output["value"]["messages_created"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn missing_agent_id_is_a_misconfiguration_failure() {
    let stack = stack().await;
    let canvas = WorkflowCanvas {
        nodes: vec![
            node("trigger-1", NodeKind::Trigger, json!({})),
            node("agent-1", NodeKind::Agent, json!({"agent_id": null})),
        ],
        edges: vec![edge("trigger-1", "agent-1")],
    };
    let workflow = stack
        .db
        .create_workflow(stack.owner_id, "misconfigured", &canvas)
        .await
        .unwrap();

    let finished = stack.engine.execute(workflow.id, None).await.unwrap();
    assert_eq!(finished.result, Some(ExecResult::Failure));
    let error = finished.error.unwrap();
    assert!(error.contains("missing agent_id"), "error: {error}");
    assert!(!error.contains("not found"));
}

#[tokio::test]
async fn node_failure_fails_the_execution_and_skips_downstream() {
    let stack = stack().await;
    let canvas = WorkflowCanvas {
        nodes: vec![
            node("trigger-1", NodeKind::Trigger, json!({})),
            node("bad", NodeKind::Tool, json!({"tool_name": "failing_tool"})),
            node("after", NodeKind::Tool, json!({"tool_name": "score_tool"})),
        ],
        edges: vec![edge("trigger-1", "bad"), edge("bad", "after")],
    };
    let workflow = stack
        .db
        .create_workflow(stack.owner_id, "failing", &canvas)
        .await
        .unwrap();

    let finished = stack.engine.execute(workflow.id, None).await.unwrap();
    assert_eq!(finished.result, Some(ExecResult::Failure));
    assert!(finished.error.unwrap().contains("deliberate failure"));

    let states = stack.db.list_node_states(finished.id).await.unwrap();
    let bad = states.iter().find(|s| s.node_id == "bad").unwrap();
    assert_eq!(bad.result, Some(ExecResult::Failure));
    assert!(!states.iter().any(|s| s.node_id == "after"));
}

#[tokio::test]
async fn cancellation_mid_tool_stops_before_the_next_node() {
    let stack = stack().await;
    let agent = stack
        .db
        .create_agent(NewAgent {
            owner_id: stack.owner_id,
            name: "never runs".into(),
            model: "gpt-4o-mini".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let canvas = WorkflowCanvas {
        nodes: vec![
            node("trigger-1", NodeKind::Trigger, json!({})),
            node("slow-1", NodeKind::Tool, json!({"tool_name": "slow_tool"})),
            node("agent-1", NodeKind::Agent, json!({"agent_id": agent.id})),
        ],
        edges: vec![edge("trigger-1", "slow-1"), edge("slow-1", "agent-1")],
    };
    let workflow = stack
        .db
        .create_workflow(stack.owner_id, "cancellable", &canvas)
        .await
        .unwrap();

    let execution = stack.engine.reserve(workflow.id, Some("api")).await.unwrap();
    assert_eq!(execution.phase, Phase::Waiting);

    let engine = Arc::clone(&stack.engine);
    let execution_id = execution.id;
    let run = tokio::spawn(async move { engine.run_reserved(execution_id).await });

    // Let the slow tool start, then cancel while it runs.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    stack
        .engine
        .cancel(execution_id, "user clicked stop")
        .await
        .unwrap();

    let finished = run.await.unwrap().unwrap();
    assert_eq!(finished.phase, Phase::Finished);
    assert_eq!(finished.result, Some(ExecResult::Cancelled));
    assert_eq!(finished.cancel_reason.as_deref(), Some("user clicked stop"));

    // The agent node never transitioned past waiting (no state row at all).
    let states = stack.db.list_node_states(execution_id).await.unwrap();
    assert!(!states.iter().any(|s| s.node_id == "agent-1"));

    // EXECUTION_FINISHED was published with status cancelled.
    let events = stack.finishes.0.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| e["execution_id"] == execution_id && e["status"] == "cancelled"));
}

#[tokio::test]
async fn double_start_of_a_reserved_execution_conflicts() {
    let stack = stack().await;
    let canvas = WorkflowCanvas {
        nodes: vec![node("trigger-1", NodeKind::Trigger, json!({}))],
        edges: vec![],
    };
    let workflow = stack
        .db
        .create_workflow(stack.owner_id, "reserved", &canvas)
        .await
        .unwrap();
    let execution = stack.engine.reserve(workflow.id, None).await.unwrap();

    let finished = stack.engine.run_reserved(execution.id).await.unwrap();
    assert_eq!(finished.result, Some(ExecResult::Success));
    // The router that reuses a reserved execution sees its actual state.
    let again = stack.engine.run_reserved(execution.id).await;
    assert!(again.is_err());
    let actual = stack.db.get_execution(execution.id).await.unwrap();
    assert_eq!(actual.phase, Phase::Finished);
}
