//! Server binary: assembles the full orchestration stack and serves `/ws`.
//!
//! Construction order matters: the worker-facing registry exists before the
//! job service, and the supervisor-facing registry binds the worker tools to
//! that service. Everything is explicit; there are no global singletons.

use std::sync::Arc;
use std::time::Duration;

use hive::db::Db;
use hive::events::EventBus;
use hive::scheduler::{SchedulerService, TaskRunner};
use hive::tools::builtin::{
    register_builtin_tools, GetCurrentTimeTool, HttpRequestTool, SshExecTool,
};
use hive::worker::{JobTracker, WorkerJobService, WorkerRunner, WorkerSpawner};
use hive::{ChatOpenAI, EventPublisher, LlmClient, ToolRegistry, TurnEngine};
use hive_artifacts::ArtifactStore;
use serve::{build_router, AppState, EventBridge, TopicManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    env_config::load_and_apply(None)?;
    let settings = env_config::Settings::from_env();

    let db_path = std::env::var("HIVE_DB").unwrap_or_else(|_| "hive.db".to_string());
    let db = Db::open(&db_path).await?;
    let store = ArtifactStore::new(
        settings
            .artifacts_root
            .clone()
            .unwrap_or_else(|| "worker_artifacts".to_string()),
    )?;

    let bus = Arc::new(EventBus::new());
    let publisher = Arc::new(EventPublisher::new(Arc::clone(&bus)));
    let topics = Arc::new(TopicManager::new());
    Arc::new(EventBridge::new(Arc::clone(&topics)))
        .attach(&bus)
        .await;

    let llm: Arc<dyn LlmClient> = Arc::new(ChatOpenAI::new());

    // Workers get the infrastructure tools only.
    let mut worker_registry = ToolRegistry::new();
    worker_registry.register(Arc::new(GetCurrentTimeTool));
    worker_registry.register(Arc::new(HttpRequestTool::new()));
    worker_registry.register(Arc::new(SshExecTool));

    let tracker = Arc::new(JobTracker::new());
    let worker_runner = Arc::new(WorkerRunner::new(
        db.clone(),
        store.clone(),
        Arc::new(worker_registry),
        Arc::clone(&llm),
        Arc::clone(&publisher),
        Arc::clone(&tracker),
        settings.default_worker_model_id.clone(),
        Duration::from_secs(settings.worker_timeout_secs),
    ));
    let job_service = Arc::new(WorkerJobService::new(worker_runner, tracker));

    // The full registry, with worker management bound to the job service.
    let mut registry = ToolRegistry::new();
    register_builtin_tools(
        &mut registry,
        store,
        Arc::clone(&job_service) as Arc<dyn WorkerSpawner>,
    );
    let registry = Arc::new(registry);

    let engine = Arc::new(
        TurnEngine::new(
            db.clone(),
            Arc::clone(&registry),
            Arc::clone(&llm),
            Arc::clone(&publisher),
        )
        .with_streaming(
            Arc::clone(&topics) as Arc<dyn hive::events::FrameSink>,
            settings.llm_token_stream,
        ),
    );

    let task_runner = Arc::new(TaskRunner::new(
        db.clone(),
        Arc::clone(&engine),
        Arc::clone(&publisher),
        settings.clone(),
    ));
    let scheduler = Arc::new(SchedulerService::new(task_runner));
    tokio::spawn(Arc::clone(&scheduler).run_loop(Duration::from_secs(30)));

    let state = Arc::new(AppState {
        topics,
        db,
        engine,
        publisher: Arc::clone(&publisher),
    });
    let router = build_router(state);

    let bind = std::env::var("HIVE_BIND").unwrap_or_else(|_| "127.0.0.1:8765".to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "hive server listening");

    let result = axum::serve(listener, router).await;
    publisher.shutdown().await;
    result?;
    Ok(())
}
