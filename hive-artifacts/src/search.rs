//! Regex search across owner-visible worker files.

use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::StoreError;
use crate::store::ArtifactStore;

/// Cap on hits reported per file, keeping noisy logs from drowning the rest.
const MAX_HITS_PER_FILE: usize = 20;

/// One search match inside a worker file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub worker_id: String,
    /// Path relative to the worker directory.
    pub file: String,
    /// 1-based line number.
    pub line: usize,
    pub content: String,
}

impl ArtifactStore {
    /// Scans text files matching `file_glob` across the owner's workers and
    /// returns lines matching `pattern`.
    ///
    /// `worker_ids` narrows the scan to specific workers; workers belonging to
    /// other owners are silently skipped either way.
    pub fn search_workers(
        &self,
        pattern: &str,
        file_glob: &str,
        worker_ids: Option<&[String]>,
        owner_id: i64,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let regex =
            Regex::new(pattern).map_err(|e| StoreError::InvalidPattern(e.to_string()))?;
        let glob = glob::Pattern::new(file_glob)
            .map_err(|e| StoreError::InvalidPattern(e.to_string()))?;

        let visible: Vec<String> = self
            .read_index()?
            .into_iter()
            .filter(|e| e.owner_id == Some(owner_id))
            .map(|e| e.worker_id)
            .filter(|id| worker_ids.map_or(true, |ids| ids.contains(id)))
            .collect();

        let mut hits = Vec::new();
        for worker_id in visible {
            let dir = match self.worker_dir(&worker_id) {
                Ok(d) => d,
                Err(_) => continue,
            };
            for entry in WalkDir::new(&dir).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = match entry.path().strip_prefix(&dir) {
                    Ok(r) => r.to_string_lossy().into_owned(),
                    Err(_) => continue,
                };
                if !glob.matches(&rel) {
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue; // binary or unreadable, skip
                };
                let mut file_hits = 0;
                for (i, line) in content.lines().enumerate() {
                    if regex.is_match(line) {
                        hits.push(SearchHit {
                            worker_id: worker_id.clone(),
                            file: rel.clone(),
                            line: i + 1,
                            content: line.to_string(),
                        });
                        file_hits += 1;
                        if file_hits >= MAX_HITS_PER_FILE {
                            break;
                        }
                    }
                }
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::WorkerStatus;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn finds_matches_in_tool_outputs() {
        let (_dir, store) = store();
        let id = store.create_worker("disk check", json!({"owner_id": 1})).unwrap();
        store
            .save_tool_output(&id, "ssh_exec", "sda1 45% used\nsdb1 91% used", 1)
            .unwrap();
        store.complete_worker(&id, WorkerStatus::Success, None).unwrap();

        let hits = store.search_workers(r"9\d% used", "tool_calls/*.txt", None, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].worker_id, id);
        assert_eq!(hits[0].file, "tool_calls/001_ssh_exec.txt");
        assert_eq!(hits[0].line, 2);
        assert!(hits[0].content.contains("91%"));
    }

    #[test]
    fn other_owners_workers_are_invisible() {
        let (_dir, store) = store();
        let id = store.create_worker("secret", json!({"owner_id": 2})).unwrap();
        store.save_tool_output(&id, "ssh_exec", "password hint", 1).unwrap();
        let hits = store.search_workers("password", "**/*.txt", None, 1).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn bad_regex_is_invalid_pattern() {
        let (_dir, store) = store();
        assert!(matches!(
            store.search_workers("(unclosed", "*", None, 1),
            Err(StoreError::InvalidPattern(_))
        ));
    }

    #[test]
    fn worker_id_filter_narrows_scan() {
        let (_dir, store) = store();
        let a = store.create_worker("first job", json!({"owner_id": 1})).unwrap();
        store.save_tool_output(&a, "t", "needle here", 1).unwrap();
        let b = store.create_worker("second job", json!({"owner_id": 1})).unwrap();
        store.save_tool_output(&b, "t", "needle there", 1).unwrap();

        let only_b = vec![b.clone()];
        let hits = store
            .search_workers("needle", "tool_calls/*.txt", Some(&only_b), 1)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].worker_id, b);
    }
}
