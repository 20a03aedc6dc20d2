//! Durable, owner-filtered record of every worker execution.
//!
//! Each worker owns one directory under the store root:
//!
//! ```text
//! <root>/<worker_id>/
//!     metadata.json          task, config, status, timestamps, summary
//!     thread.jsonl           one JSON object per message, append-only
//!     tool_calls/NNN_<tool>.txt
//!     result.txt             final assistant text
//! <root>/index.json          one row per worker, mirrors metadata for listing
//! ```
//!
//! `worker_id` is `<UTC timestamp>_<slug-of-task>` with the slug capped at 30
//! chars. Index rewrites are serialised under a file lock so multiple store
//! handles over the same root cooperate; per-worker files are written only by
//! the owning turn. Reads are lock-free.

mod error;
mod meta;
mod search;
mod store;

pub use error::StoreError;
pub use meta::{IndexEntry, SummaryMeta, WorkerMetadata, WorkerStatus};
pub use search::SearchHit;
pub use store::ArtifactStore;
