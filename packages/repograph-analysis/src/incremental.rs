//! Incremental indexing.
//!
//! Keeps a per-repository record of every indexed file's content hash so a
//! later run only re-parses what actually changed, and garbage-collects
//! nodes belonging to files that disappeared. Content hashes are the
//! authority: git commit ids are recorded but only ever advisory, which
//! keeps the classification honest after rebases and checkouts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use repograph_model::{entity_id, kinds, FileInfo, Node};
use repograph_storage::{DeleteReport, GraphStore};

use crate::error::{AnalyzerError, Result};

/// Hash record for one indexed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub hash: String,
    pub indexed_at: DateTime<Utc>,
}

/// Durable per-repository index record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    pub repository_id: String,
    pub commit_sha: Option<String>,
    /// Absolute path -> hash record
    pub files_indexed: BTreeMap<String, IndexedFile>,
    pub total_files_indexed: usize,
    pub last_indexed_at: DateTime<Utc>,
}

impl IndexState {
    fn qualified_name(repository_id: &str) -> String {
        format!("{}:index-state", repository_id)
    }

    pub fn node_entity_id(repository_id: &str) -> String {
        entity_id(kinds::INDEX_STATE, &Self::qualified_name(repository_id))
    }
}

/// Classification of one scan against the previous index state
#[derive(Debug, Default)]
pub struct IncrementalResult {
    pub changed_files: Vec<FileInfo>,
    pub unchanged_files: Vec<FileInfo>,
    /// Absolute paths present in the previous state but gone from the scan
    pub deleted_files: Vec<String>,
    pub is_full_reindex: bool,
    pub reason: String,
}

/// Maintains index state and decides what must be re-parsed
pub struct IncrementalIndexManager {
    store: Arc<dyn GraphStore>,
}

impl IncrementalIndexManager {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn load_index_state(&self, repository_id: &str) -> Result<Option<IndexState>> {
        let node = self
            .store
            .get_node(&IndexState::node_entity_id(repository_id))
            .await
            .map_err(|e| AnalyzerError::IndexState(e.to_string()))?;
        let Some(node) = node else {
            return Ok(None);
        };
        let payload = node
            .property("payload")
            .ok_or_else(|| AnalyzerError::IndexState("index state node without payload".into()))?;
        let state = serde_json::from_value(payload.clone())
            .map_err(|e| AnalyzerError::IndexState(format!("deserialize: {}", e)))?;
        Ok(Some(state))
    }

    pub async fn save_index_state(&self, state: &IndexState) -> Result<()> {
        let payload = serde_json::to_value(state)
            .map_err(|e| AnalyzerError::IndexState(format!("serialize: {}", e)))?;
        let node = Node::builder(kinds::INDEX_STATE, &state.repository_id)
            .entity_id(IndexState::node_entity_id(&state.repository_id))
            .instance_id(format!("index-state-{}", state.repository_id))
            .property("repositoryId", json!(state.repository_id))
            .property("totalFilesIndexed", json!(state.total_files_indexed))
            .property(
                "lastIndexedAt",
                json!(state.last_indexed_at.to_rfc3339()),
            )
            .property("payload", payload)
            .build();
        self.store
            .save_nodes_batch(vec![node], None)
            .await
            .map_err(|e| AnalyzerError::IndexState(e.to_string()))?;
        Ok(())
    }

    /// Fresh state from a full scan
    pub fn create_index_state(
        &self,
        repository_id: &str,
        files: &[FileInfo],
        commit_sha: Option<&str>,
    ) -> IndexState {
        let now = Utc::now();
        let files_indexed: BTreeMap<String, IndexedFile> = files
            .iter()
            .filter_map(|f| {
                let hash = f.content_hash.clone()?;
                Some((
                    f.path_key(),
                    IndexedFile {
                        hash,
                        indexed_at: now,
                    },
                ))
            })
            .collect();
        IndexState {
            repository_id: repository_id.to_string(),
            commit_sha: commit_sha.map(str::to_string),
            total_files_indexed: files_indexed.len(),
            files_indexed,
            last_indexed_at: now,
        }
    }

    /// Merge a run's outcome into the previous state
    pub fn update_index_state(
        &self,
        existing: &IndexState,
        changed_files: &[FileInfo],
        deleted_files: &[String],
        commit_sha: Option<&str>,
    ) -> IndexState {
        let now = Utc::now();
        let mut files_indexed = existing.files_indexed.clone();
        for file in changed_files {
            let Some(hash) = file.content_hash.clone() else {
                continue;
            };
            files_indexed.insert(
                file.path_key(),
                IndexedFile {
                    hash,
                    indexed_at: now,
                },
            );
        }
        for path in deleted_files {
            files_indexed.remove(path);
        }
        IndexState {
            repository_id: existing.repository_id.clone(),
            commit_sha: commit_sha
                .map(str::to_string)
                .or_else(|| existing.commit_sha.clone()),
            total_files_indexed: files_indexed.len(),
            files_indexed,
            last_indexed_at: now,
        }
    }

    /// Classify the current scan against the previous state
    pub async fn determine_files_to_process(
        &self,
        repository_id: &str,
        scanned_files: Vec<FileInfo>,
        force_full_reindex: bool,
    ) -> Result<IncrementalResult> {
        if force_full_reindex {
            return Ok(full_reindex(scanned_files, "full reindex (forced)"));
        }
        let Some(state) = self.load_index_state(repository_id).await? else {
            return Ok(full_reindex(
                scanned_files,
                "full reindex (no prior index state)",
            ));
        };
        Ok(classify(scanned_files, &state))
    }

    /// Same classification, with git metadata treated as advisory.
    ///
    /// Even when the recorded commit matches the current one, every file is
    /// still hash-verified; a matching commit only means the verification
    /// is expected to come back clean.
    pub async fn determine_files_to_process_with_hash_verification(
        &self,
        repository_id: &str,
        scanned_files: Vec<FileInfo>,
        force_full_reindex: bool,
        is_git_repo: bool,
        commit_sha: Option<&str>,
    ) -> Result<IncrementalResult> {
        if is_git_repo {
            if let (Some(current), Ok(Some(state))) =
                (commit_sha, self.load_index_state(repository_id).await)
            {
                if state.commit_sha.as_deref() == Some(current) {
                    debug!(
                        "commit {} unchanged since last index; verifying hashes anyway",
                        current
                    );
                }
            }
        }
        self.determine_files_to_process(repository_id, scanned_files, force_full_reindex)
            .await
    }

    /// Remove every node and edge belonging to deleted files
    pub async fn cleanup_deleted_files(
        &self,
        repository_id: &str,
        paths: &[String],
    ) -> Result<DeleteReport> {
        if paths.is_empty() {
            return Ok(DeleteReport::default());
        }
        info!(
            "cleaning up {} deleted files for {}",
            paths.len(),
            repository_id
        );
        Ok(self
            .store
            .delete_files_and_descendants(repository_id, paths)
            .await?)
    }

    /// Drop files a resumed run has already stored
    pub fn filter_already_processed_files(
        &self,
        files: Vec<FileInfo>,
        processed: &BTreeSet<String>,
    ) -> (Vec<FileInfo>, usize) {
        let before = files.len();
        let remaining: Vec<FileInfo> = files
            .into_iter()
            .filter(|f| !processed.contains(&f.path_key()))
            .collect();
        let skipped = before - remaining.len();
        (remaining, skipped)
    }
}

fn full_reindex(scanned_files: Vec<FileInfo>, reason: &str) -> IncrementalResult {
    IncrementalResult {
        changed_files: scanned_files,
        unchanged_files: Vec::new(),
        deleted_files: Vec::new(),
        is_full_reindex: true,
        reason: reason.to_string(),
    }
}

fn classify(scanned_files: Vec<FileInfo>, state: &IndexState) -> IncrementalResult {
    let mut changed = Vec::new();
    let mut unchanged = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for file in scanned_files {
        let key = file.path_key();
        seen.insert(key.clone());
        match (&file.content_hash, state.files_indexed.get(&key)) {
            (Some(hash), Some(prior)) if *hash == prior.hash => unchanged.push(file),
            // New file, modified file, or no hash to verify with
            _ => changed.push(file),
        }
    }

    let deleted: Vec<String> = state
        .files_indexed
        .keys()
        .filter(|path| !seen.contains(*path))
        .cloned()
        .collect();

    let reason = format!(
        "incremental: {} changed, {} unchanged, {} deleted",
        changed.len(),
        unchanged.len(),
        deleted.len()
    );
    IncrementalResult {
        changed_files: changed,
        unchanged_files: unchanged,
        deleted_files: deleted,
        is_full_reindex: false,
        reason,
    }
}
