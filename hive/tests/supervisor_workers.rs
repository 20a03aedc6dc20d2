//! Full supervisor → worker flow: the supervisor dispatches a task through
//! `spawn_worker`, the job service executes the worker with artifact capture,
//! and the roundabout monitor watches it to completion.

use std::sync::Arc;
use std::time::Duration;

use hive::db::Db;
use hive::events::EventBus;
use hive::llm::{LlmResponse, LlmUsage, ToolCallRequest};
use hive::model::{RunStatus, UserRole};
use hive::roundabout::{MonitorVerdict, RoundaboutConfig, RoundaboutMonitor};
use hive::supervisor::SupervisorService;
use hive::tools::builtin::register_builtin_tools;
use hive::worker::{JobTracker, WorkerJobService, WorkerRunner, WorkerSpawner};
use hive::{EventPublisher, MockLlm, ToolRegistry, TurnEngine};
use hive_artifacts::ArtifactStore;
use serde_json::json;

struct Orchestrator {
    _db_dir: tempfile::TempDir,
    _store_dir: tempfile::TempDir,
    db: Db,
    store: ArtifactStore,
    supervisor: SupervisorService,
    service: Arc<WorkerJobService>,
    owner_id: i64,
}

/// Wires the whole stack the way a process would at startup: worker registry
/// first, then the job service, then the supervisor-facing registry with the
/// worker-management tools bound to that service.
async fn orchestrator(supervisor_llm: Arc<MockLlm>, worker_llm: Arc<MockLlm>) -> Orchestrator {
    let db_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let db = Db::open(db_dir.path().join("hive.db")).await.unwrap();
    let store = ArtifactStore::new(store_dir.path()).unwrap();
    let owner_id = db
        .create_user("chief@example.com", Some("Chief"), UserRole::User)
        .await
        .unwrap()
        .id;

    let publisher = Arc::new(EventPublisher::new(Arc::new(EventBus::new())));
    let tracker = Arc::new(JobTracker::new());

    let mut worker_registry = ToolRegistry::new();
    worker_registry.register(Arc::new(hive::tools::builtin::GetCurrentTimeTool));
    let runner = Arc::new(WorkerRunner::new(
        db.clone(),
        store.clone(),
        Arc::new(worker_registry),
        worker_llm,
        Arc::clone(&publisher),
        Arc::clone(&tracker),
        "gpt-4o-mini".to_string(),
        Duration::from_secs(60),
    ));
    let service = Arc::new(WorkerJobService::new(runner, tracker));

    let mut registry = ToolRegistry::new();
    register_builtin_tools(
        &mut registry,
        store.clone(),
        Arc::clone(&service) as Arc<dyn WorkerSpawner>,
    );
    let engine = Arc::new(TurnEngine::new(
        db.clone(),
        Arc::new(registry),
        supervisor_llm,
        Arc::clone(&publisher),
    ));
    let supervisor = SupervisorService::new(
        db.clone(),
        engine,
        publisher,
        "gpt-4o".to_string(),
        Duration::from_secs(60),
    );

    Orchestrator {
        _db_dir: db_dir,
        _store_dir: store_dir,
        db,
        store,
        supervisor,
        service,
        owner_id,
    }
}

#[tokio::test]
async fn supervisor_spawns_a_worker_and_reads_it_back() {
    let supervisor_llm = Arc::new(MockLlm::sequence(vec![
        LlmResponse {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call-spawn".into(),
                name: "spawn_worker".into(),
                arguments: json!({"task": "Check disk usage on cube"}).to_string(),
            }],
            usage: Some(LlmUsage {
                prompt_tokens: 40,
                completion_tokens: 12,
                total_tokens: 52,
            }),
        },
        LlmResponse {
            content: "Dispatched a worker to check disk usage.".into(),
            tool_calls: vec![],
            usage: Some(LlmUsage {
                prompt_tokens: 60,
                completion_tokens: 15,
                total_tokens: 75,
            }),
        },
    ]));
    // First entry answers the worker's turn; the second is the summariser.
    let worker_llm = Arc::new(MockLlm::sequence(vec![
        LlmResponse {
            content: "Disk on cube is at 45%.".into(),
            tool_calls: vec![],
            usage: None,
        },
        LlmResponse {
            content: "cube disk at 45%".into(),
            tool_calls: vec![],
            usage: None,
        },
    ]));

    let orchestrator = orchestrator(supervisor_llm, worker_llm).await;
    let outcome = orchestrator
        .supervisor
        .run_supervisor(orchestrator.owner_id, "How full is cube's disk?", None, None)
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(
        outcome.result.as_deref(),
        Some("Dispatched a worker to check disk usage.")
    );

    // The supervisor thread carries the tool message with the queued job id.
    let messages = orchestrator
        .db
        .get_messages(outcome.thread_id)
        .await
        .unwrap();
    let tool_msg = messages
        .iter()
        .find(|m| m.tool_name.as_deref() == Some("spawn_worker"))
        .unwrap();
    assert!(tool_msg.content.contains("job-"));
    let job_id = {
        let parsed: serde_json::Value = serde_json::from_str(&tool_msg.content).unwrap();
        parsed["data"]["job_id"].as_str().unwrap().to_string()
    };

    // The queued job runs to completion in the background.
    let snapshot = orchestrator
        .service
        .wait(&job_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(snapshot.status, "success");
    assert_eq!(snapshot.result.as_deref(), Some("Disk on cube is at 45%."));

    // The artifact store recorded the worker under the supervisor's owner,
    // correlated to the supervisor run.
    let worker_id = snapshot.worker_id.unwrap();
    let metadata = orchestrator
        .store
        .get_metadata(&worker_id, orchestrator.owner_id)
        .unwrap();
    assert_eq!(metadata.config["supervisor_run_id"], json!(outcome.run_id));
    assert_eq!(
        orchestrator.store.get_result(&worker_id).unwrap(),
        "Disk on cube is at 45%."
    );
}

#[tokio::test]
async fn roundabout_watches_a_worker_to_completion() {
    let supervisor_llm = Arc::new(MockLlm::fixed("unused"));
    let worker_llm = Arc::new(MockLlm::sequence(vec![
        LlmResponse {
            content: "Scan finished, nothing suspicious.".into(),
            tool_calls: vec![],
            usage: None,
        },
        LlmResponse {
            content: "clean scan".into(),
            tool_calls: vec![],
            usage: None,
        },
    ]));
    let orchestrator = orchestrator(supervisor_llm, worker_llm).await;

    let job_id = orchestrator
        .service
        .enqueue(hive::worker::WorkerJobRequest {
            task: "Scan the logs".into(),
            owner_id: orchestrator.owner_id,
            model: None,
            supervisor_run_id: None,
        })
        .unwrap();

    // The gating LLM would keep waiting; the job finishes on its own first.
    let monitor = RoundaboutMonitor::new(
        RoundaboutConfig {
            poll_every: Duration::from_millis(20),
            ..Default::default()
        },
        Arc::new(MockLlm::fixed("wait")),
    );
    let outcome = monitor.watch(&orchestrator.service, &job_id).await;
    assert!(matches!(outcome.verdict, MonitorVerdict::Completed { ref status } if status == "success"));
    assert_eq!(
        outcome.output.as_deref(),
        Some("Scan finished, nothing suspicious.")
    );
}

#[tokio::test]
async fn roundabout_cancel_aborts_the_worker_with_reason() {
    let supervisor_llm = Arc::new(MockLlm::fixed("unused"));
    // The worker's turn stalls long enough for the monitor to decide.
    let worker_llm = Arc::new(MockLlm::fixed("late").with_delay(Duration::from_secs(5)));
    let orchestrator = orchestrator(supervisor_llm, worker_llm).await;

    let job_id = orchestrator
        .service
        .enqueue(hive::worker::WorkerJobRequest {
            task: "Stalling task".into(),
            owner_id: orchestrator.owner_id,
            model: None,
            supervisor_run_id: None,
        })
        .unwrap();

    let monitor = RoundaboutMonitor::new(
        RoundaboutConfig {
            poll_every: Duration::from_millis(20),
            llm_poll_interval: 1,
            ..Default::default()
        },
        Arc::new(MockLlm::fixed("cancel")),
    );
    let outcome = monitor.watch(&orchestrator.service, &job_id).await;
    match outcome.verdict {
        MonitorVerdict::Cancelled { reason } => assert!(reason.contains("cancel")),
        other => panic!("expected Cancelled, got {other:?}"),
    }

    let snapshot = orchestrator.service.tracker().peek(&job_id).unwrap();
    assert_eq!(snapshot.status, "cancelled");
    assert!(snapshot.result.unwrap().contains("Cancelled"));
}
