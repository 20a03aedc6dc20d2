//! Filesystem store: worker directories plus a locked `index.json`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde_json::Value;

use crate::error::StoreError;
use crate::meta::{IndexEntry, SummaryMeta, WorkerMetadata, WorkerStatus};

/// Max length of the task slug inside a worker id.
const SLUG_MAX: usize = 30;

/// Worker artifact store rooted at one directory.
///
/// Cheap to clone; multiple handles over the same root cooperate through the
/// index file lock. Per-worker files have a single writer (the owning turn),
/// so they are written without locks.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the worker directory skeleton and index row.
    ///
    /// Fails with [`StoreError::Conflict`] when the generated id already
    /// exists; the store never silently overwrites a worker.
    pub fn create_worker(&self, task: &str, config: Value) -> Result<String, StoreError> {
        let now = Utc::now();
        let worker_id = format!("{}_{}", now.format("%Y-%m-%dT%H-%M-%S"), slugify(task));
        let dir = self.root.join(&worker_id);
        if dir.exists() {
            return Err(StoreError::Conflict(worker_id));
        }
        fs::create_dir_all(dir.join("tool_calls"))?;

        let meta = WorkerMetadata {
            worker_id: worker_id.clone(),
            task: task.to_string(),
            config,
            status: WorkerStatus::Created,
            created_at: now,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error: None,
            summary: None,
            summary_meta: None,
        };
        self.write_metadata(&meta)?;
        self.upsert_index_entry(IndexEntry::from_metadata(&meta))?;
        tracing::debug!(worker_id = %worker_id, "created worker directory");
        Ok(worker_id)
    }

    /// Transitions `created -> running` and stamps `started_at`.
    pub fn start_worker(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut meta = self.read_metadata(worker_id)?;
        meta.status = WorkerStatus::Running;
        meta.started_at = Some(Utc::now());
        self.write_metadata(&meta)?;
        self.upsert_index_entry(IndexEntry::from_metadata(&meta))
    }

    /// Writes one tool output as `tool_calls/NNN_<tool>.txt`; the caller
    /// supplies the per-worker monotonic sequence. Returns the relative path.
    pub fn save_tool_output(
        &self,
        worker_id: &str,
        tool_name: &str,
        content: &str,
        sequence: u32,
    ) -> Result<String, StoreError> {
        let rel = format!("tool_calls/{sequence:03}_{tool_name}.txt");
        let path = self.worker_dir(worker_id)?.join(&rel);
        fs::write(path, content)?;
        Ok(rel)
    }

    /// Appends one message line to `thread.jsonl`. Concurrent appends for one
    /// worker are serialised by the caller, so lines never interleave.
    pub fn save_message(&self, worker_id: &str, message: &Value) -> Result<(), StoreError> {
        let path = self.worker_dir(worker_id)?.join("thread.jsonl");
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(message)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Writes (or overwrites) `result.txt`.
    pub fn save_result(&self, worker_id: &str, text: &str) -> Result<(), StoreError> {
        let path = self.worker_dir(worker_id)?.join("result.txt");
        fs::write(path, text)?;
        Ok(())
    }

    /// Transitions to a terminal status, stamps `finished_at`, computes
    /// `duration_ms`, and records `error` for failures.
    pub fn complete_worker(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Storage(format!(
                "complete_worker requires a terminal status, got '{}'",
                status.as_str()
            )));
        }
        let mut meta = self.read_metadata(worker_id)?;
        let finished = Utc::now();
        let from = meta.started_at.unwrap_or(meta.created_at);
        meta.status = status;
        meta.finished_at = Some(finished);
        meta.duration_ms = Some((finished - from).num_milliseconds());
        meta.error = error;
        self.write_metadata(&meta)?;
        self.upsert_index_entry(IndexEntry::from_metadata(&meta))
    }

    /// Writes the summary after the terminal transition, so terminal status is
    /// never delayed by summariser latency.
    pub fn update_summary(
        &self,
        worker_id: &str,
        summary: &str,
        summary_meta: SummaryMeta,
    ) -> Result<(), StoreError> {
        let mut meta = self.read_metadata(worker_id)?;
        meta.summary = Some(summary.to_string());
        meta.summary_meta = Some(summary_meta);
        self.write_metadata(&meta)?;
        self.upsert_index_entry(IndexEntry::from_metadata(&meta))
    }

    /// Reads `metadata.json`, enforcing ownership: the stored
    /// `config.owner_id` must match `owner_id`.
    pub fn get_metadata(
        &self,
        worker_id: &str,
        owner_id: i64,
    ) -> Result<WorkerMetadata, StoreError> {
        let meta = self.read_metadata(worker_id)?;
        match meta.owner_id() {
            Some(stored) if stored == owner_id => Ok(meta),
            _ => Err(StoreError::PermissionDenied(worker_id.to_string())),
        }
    }

    /// Reads `result.txt`.
    pub fn get_result(&self, worker_id: &str) -> Result<String, StoreError> {
        let path = self.worker_dir(worker_id)?.join("result.txt");
        if !path.is_file() {
            return Err(StoreError::NotFound(format!("{worker_id}/result.txt")));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Reads an arbitrary file inside the worker directory. The relative path
    /// is normalised first; anything that would escape the worker root
    /// (`..` components, absolute paths, symlinks resolving outside) is
    /// rejected. Files that physically exist are readable regardless of the
    /// worker's phase.
    pub fn read_worker_file(&self, worker_id: &str, rel_path: &str) -> Result<String, StoreError> {
        let dir = self.worker_dir(worker_id)?;
        let candidate = Path::new(rel_path);
        if candidate.is_absolute() {
            return Err(StoreError::InvalidPath(rel_path.to_string()));
        }
        for component in candidate.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StoreError::InvalidPath(rel_path.to_string())),
            }
        }
        let path = dir.join(candidate);
        if !path.is_file() {
            return Err(StoreError::NotFound(format!("{worker_id}/{rel_path}")));
        }
        // Symlink check: the resolved path must stay under the worker root.
        let canonical = path.canonicalize()?;
        let canonical_dir = dir.canonicalize()?;
        if !canonical.starts_with(&canonical_dir) {
            return Err(StoreError::InvalidPath(rel_path.to_string()));
        }
        Ok(fs::read_to_string(canonical)?)
    }

    /// Lists owner-visible workers from the index, newest first.
    ///
    /// `since` keeps workers with `created_at >= since` (inclusive cutoff,
    /// uniform across the store).
    pub fn list_workers(
        &self,
        owner_id: i64,
        limit: usize,
        status: Option<WorkerStatus>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IndexEntry>, StoreError> {
        let mut entries: Vec<IndexEntry> = self
            .read_index()?
            .into_iter()
            .filter(|e| e.owner_id == Some(owner_id))
            .filter(|e| status.map_or(true, |s| e.status == s))
            .filter(|e| since.map_or(true, |t| e.created_at >= t))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn worker_dir(&self, worker_id: &str) -> Result<PathBuf, StoreError> {
        // Worker ids are path segments; reject separators outright.
        if worker_id.contains('/') || worker_id.contains('\\') || worker_id.contains("..") {
            return Err(StoreError::InvalidPath(worker_id.to_string()));
        }
        let dir = self.root.join(worker_id);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(worker_id.to_string()));
        }
        Ok(dir)
    }

    pub(crate) fn read_metadata(&self, worker_id: &str) -> Result<WorkerMetadata, StoreError> {
        let path = self.worker_dir(worker_id)?.join("metadata.json");
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_metadata(&self, meta: &WorkerMetadata) -> Result<(), StoreError> {
        let dir = self.root.join(&meta.worker_id);
        let path = dir.join("metadata.json");
        fs::write(path, serde_json::to_string_pretty(meta)?)?;
        Ok(())
    }

    pub(crate) fn read_index(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let path = self.root.join("index.json");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    /// Rewrites `index.json` under an exclusive lock on the sidecar lock file
    /// so concurrent store handles over the same root serialise their updates.
    fn upsert_index_entry(&self, entry: IndexEntry) -> Result<(), StoreError> {
        let lock_path = self.root.join("index.lock");
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock.lock_exclusive()?;
        let result = (|| {
            let mut index = self.read_index()?;
            match index
                .iter_mut()
                .find(|e| e.worker_id == entry.worker_id)
            {
                Some(existing) => *existing = entry,
                None => index.push(entry),
            }
            let path = self.root.join("index.json");
            fs::write(path, serde_json::to_string_pretty(&index)?)?;
            Ok(())
        })();
        let _ = fs2::FileExt::unlock(&lock);
        result
    }
}

/// Lower-cases the task, maps runs of non-alphanumerics to single `-`, trims
/// leading/trailing `-`, and caps the result at 30 chars.
fn slugify(task: &str) -> String {
    let mut slug = String::with_capacity(task.len());
    let mut last_dash = false;
    for ch in task.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    let mut slug = slug.to_string();
    slug.truncate(SLUG_MAX);
    let trimmed = slug.trim_end_matches('-').to_string();
    if trimmed.is_empty() {
        "task".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn slugify_examples() {
        assert_eq!(slugify("Check disk space"), "check-disk-space");
        assert_eq!(slugify("Deploy to production!!!"), "deploy-to-production");
        assert_eq!(slugify("Test_with_underscores"), "test-with-underscores");
        assert_eq!(slugify("Multiple   spaces   here"), "multiple-spaces-here");
        assert!(slugify("Run SSH command on cube server now").len() <= SLUG_MAX);
        assert_eq!(slugify("!!!"), "task");
    }

    #[test]
    fn create_worker_builds_skeleton_and_index() {
        let (_dir, store) = store();
        let id = store
            .create_worker(
                "Check disk space on all servers",
                json!({"owner_id": 1, "model": "gpt-4o"}),
            )
            .unwrap();
        let (ts, slug) = id.split_once('_').unwrap();
        assert!(ts.contains('T'));
        assert!(slug.starts_with("check-disk-space"));
        assert!(slug.len() <= SLUG_MAX);

        assert!(store.root().join(&id).join("tool_calls").is_dir());
        let meta = store.get_metadata(&id, 1).unwrap();
        assert_eq!(meta.status, WorkerStatus::Created);
        assert!(meta.started_at.is_none());
        assert_eq!(meta.config["model"], "gpt-4o");

        let index = store.read_index().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].worker_id, id);
    }

    #[test]
    fn duplicate_worker_id_conflicts() {
        let (_dir, store) = store();
        // Three back-to-back creates finish well inside one second, so at
        // least two of them generate the same timestamped id.
        let results: Vec<_> = (0..3)
            .map(|_| store.create_worker("same task", json!({"owner_id": 1})))
            .collect();
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(StoreError::Conflict(_)))),
            "expected at least one Conflict, got {results:?}"
        );
    }

    #[test]
    fn lifecycle_transitions_stamp_timestamps() {
        let (_dir, store) = store();
        let id = store.create_worker("lifecycle", json!({"owner_id": 7})).unwrap();
        store.start_worker(&id).unwrap();
        let meta = store.get_metadata(&id, 7).unwrap();
        assert_eq!(meta.status, WorkerStatus::Running);
        assert!(meta.started_at.is_some());

        store
            .complete_worker(&id, WorkerStatus::Success, None)
            .unwrap();
        let meta = store.get_metadata(&id, 7).unwrap();
        assert_eq!(meta.status, WorkerStatus::Success);
        assert!(meta.finished_at.is_some());
        assert!(meta.duration_ms.unwrap() >= 0);

        // Recomputing duration from the stored timestamps agrees.
        let recomputed =
            (meta.finished_at.unwrap() - meta.started_at.unwrap()).num_milliseconds();
        assert!((recomputed - meta.duration_ms.unwrap()).abs() <= 1);
    }

    #[test]
    fn complete_with_error_keeps_directory() {
        let (_dir, store) = store();
        let id = store.create_worker("failing", json!({"owner_id": 7})).unwrap();
        store
            .complete_worker(&id, WorkerStatus::Failed, Some("ssh unreachable".into()))
            .unwrap();
        let meta = store.get_metadata(&id, 7).unwrap();
        assert_eq!(meta.status, WorkerStatus::Failed);
        assert_eq!(meta.error.as_deref(), Some("ssh unreachable"));
        assert!(store.root().join(&id).is_dir());
    }

    #[test]
    fn complete_rejects_non_terminal_status() {
        let (_dir, store) = store();
        let id = store.create_worker("t", json!({"owner_id": 1})).unwrap();
        assert!(store
            .complete_worker(&id, WorkerStatus::Running, None)
            .is_err());
    }

    #[test]
    fn tool_outputs_are_numbered_files() {
        let (_dir, store) = store();
        let id = store.create_worker("outputs", json!({"owner_id": 1})).unwrap();
        let p1 = store.save_tool_output(&id, "ssh_exec", "disk 45%", 1).unwrap();
        let p2 = store
            .save_tool_output(&id, "http_request", "{\"status\":\"ok\"}", 2)
            .unwrap();
        assert_eq!(p1, "tool_calls/001_ssh_exec.txt");
        assert_eq!(p2, "tool_calls/002_http_request.txt");
        assert_eq!(store.read_worker_file(&id, &p1).unwrap(), "disk 45%");
    }

    #[test]
    fn messages_append_to_thread_jsonl() {
        let (_dir, store) = store();
        let id = store.create_worker("messages", json!({"owner_id": 1})).unwrap();
        store
            .save_message(&id, &json!({"role": "user", "content": "hi"}))
            .unwrap();
        store
            .save_message(&id, &json!({"role": "assistant", "content": "hello"}))
            .unwrap();
        let raw = store.read_worker_file(&id, "thread.jsonl").unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["role"], "user");
    }

    #[test]
    fn owner_mismatch_is_permission_denied() {
        let (_dir, store) = store();
        let id = store.create_worker("mine", json!({"owner_id": 1})).unwrap();
        match store.get_metadata(&id, 2) {
            Err(StoreError::PermissionDenied(_)) => {}
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
    }

    #[test]
    fn path_traversal_rejected() {
        let (_dir, store) = store();
        let id = store.create_worker("safe", json!({"owner_id": 1})).unwrap();
        for bad in ["../../../etc/passwd", "/etc/passwd", "a/../../b"] {
            match store.read_worker_file(&id, bad) {
                Err(StoreError::InvalidPath(_)) => {}
                other => panic!("expected InvalidPath for {bad}, got {other:?}"),
            }
        }
    }

    #[test]
    fn read_worker_file_works_before_start() {
        let (_dir, store) = store();
        let id = store.create_worker("fresh", json!({"owner_id": 1})).unwrap();
        // Worker is still `created`; metadata.json physically exists.
        let raw = store.read_worker_file(&id, "metadata.json").unwrap();
        assert!(raw.contains("\"created\""));
    }

    #[test]
    fn get_result_missing_is_not_found() {
        let (_dir, store) = store();
        let id = store.create_worker("no result", json!({"owner_id": 1})).unwrap();
        assert!(matches!(
            store.get_result(&id),
            Err(StoreError::NotFound(_))
        ));
        store.save_result(&id, "(No result generated)").unwrap();
        assert_eq!(store.get_result(&id).unwrap(), "(No result generated)");
    }

    #[test]
    fn list_workers_filters_owner_status_and_since() {
        let (_dir, store) = store();
        let a = store.create_worker("task a", json!({"owner_id": 1})).unwrap();
        let _b = store.create_worker("task b", json!({"owner_id": 2})).unwrap();
        store.complete_worker(&a, WorkerStatus::Success, None).unwrap();

        let mine = store.list_workers(1, 10, None, None).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].worker_id, a);

        let done = store
            .list_workers(1, 10, Some(WorkerStatus::Success), None)
            .unwrap();
        assert_eq!(done.len(), 1);

        // Inclusive cutoff: a worker created exactly at `since` is kept.
        let created = done[0].created_at;
        let at_boundary = store.list_workers(1, 10, None, Some(created)).unwrap();
        assert_eq!(at_boundary.len(), 1);
        let after = store
            .list_workers(1, 10, None, Some(created + chrono::Duration::seconds(1)))
            .unwrap();
        assert!(after.is_empty());
    }

    #[test]
    fn update_summary_preserves_terminal_status() {
        let (_dir, store) = store();
        let id = store.create_worker("summarise", json!({"owner_id": 1})).unwrap();
        store.complete_worker(&id, WorkerStatus::Success, None).unwrap();
        store
            .update_summary(
                &id,
                "Checked 3 servers, all healthy",
                SummaryMeta {
                    version: 1,
                    model: "gpt-4o-mini".into(),
                    generated_at: Utc::now(),
                    error: None,
                },
            )
            .unwrap();
        let meta = store.get_metadata(&id, 1).unwrap();
        assert_eq!(meta.status, WorkerStatus::Success);
        assert_eq!(meta.summary.as_deref(), Some("Checked 3 servers, all healthy"));
        assert_eq!(meta.summary_meta.unwrap().version, 1);
    }
}
