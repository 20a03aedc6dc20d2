//! Builtin tools: utilities plus the supervisor's worker-management set.

mod http;
mod ssh;
mod time;
mod worker;

pub use http::HttpRequestTool;
pub use ssh::SshExecTool;
pub use time::GetCurrentTimeTool;
pub use worker::{
    GetWorkerMetadataTool, GrepWorkersTool, ListWorkersTool, ReadWorkerFileTool,
    ReadWorkerResultTool, SpawnWorkerTool,
};

use std::sync::Arc;

use crate::tools::ToolRegistry;
use crate::worker::WorkerSpawner;
use hive_artifacts::ArtifactStore;

/// Registers every builtin tool. Called once at startup; the registry is
/// read-only afterwards.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    store: ArtifactStore,
    spawner: Arc<dyn WorkerSpawner>,
) {
    registry.register(Arc::new(GetCurrentTimeTool));
    registry.register(Arc::new(HttpRequestTool::new()));
    registry.register(Arc::new(SshExecTool));
    registry.register(Arc::new(SpawnWorkerTool::new(spawner)));
    registry.register(Arc::new(ListWorkersTool::new(store.clone())));
    registry.register(Arc::new(ReadWorkerResultTool::new(store.clone())));
    registry.register(Arc::new(ReadWorkerFileTool::new(store.clone())));
    registry.register(Arc::new(GrepWorkersTool::new(store.clone())));
    registry.register(Arc::new(GetWorkerMetadataTool::new(store)));
}
