//! Crash-safe analysis checkpoints.
//!
//! Progress is persisted into the graph store itself, as one node of kind
//! `AnalysisCheckpoint` per run, so a killed run can resume from the last
//! committed batch. The write path is deliberately write-through: the
//! checkpoint node is updated after every node batch, and the batch
//! listener only returns once that write has completed.
//!
//! A crash between a batch commit and the checkpoint update leaves
//! `files_processed` stale by at most one batch; those files' nodes are
//! already committed and idempotent by `entity_id`, so re-parsing them on
//! resume is safe.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use repograph_model::{entity_id, kinds, Node};
use repograph_storage::{GraphStore, PropertyFilter};

use crate::error::{AnalyzerError, Result};

/// Pipeline phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    Cloning,
    IndexingFiles,
    IncrementalCheck,
    Parsing,
    StoringNodes,
    StoringRelationships,
    ComputingPagerank,
    SavingIndexState,
    Completed,
}

impl AnalysisPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisPhase::Cloning => "cloning",
            AnalysisPhase::IndexingFiles => "indexing_files",
            AnalysisPhase::IncrementalCheck => "incremental_check",
            AnalysisPhase::Parsing => "parsing",
            AnalysisPhase::StoringNodes => "storing_nodes",
            AnalysisPhase::StoringRelationships => "storing_relationships",
            AnalysisPhase::ComputingPagerank => "computing_pagerank",
            AnalysisPhase::SavingIndexState => "saving_index_state",
            AnalysisPhase::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "cloning" => Ok(AnalysisPhase::Cloning),
            "indexing_files" => Ok(AnalysisPhase::IndexingFiles),
            "incremental_check" => Ok(AnalysisPhase::IncrementalCheck),
            "parsing" => Ok(AnalysisPhase::Parsing),
            "storing_nodes" => Ok(AnalysisPhase::StoringNodes),
            "storing_relationships" => Ok(AnalysisPhase::StoringRelationships),
            "computing_pagerank" => Ok(AnalysisPhase::ComputingPagerank),
            "saving_index_state" => Ok(AnalysisPhase::SavingIndexState),
            "completed" => Ok(AnalysisPhase::Completed),
            _ => Err(AnalyzerError::Checkpoint(format!("invalid phase: {}", s))),
        }
    }
}

impl std::fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Checkpoint status; `Running` and `Failed` are resumable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Running,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Running => "running",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, CheckpointStatus::Running | CheckpointStatus::Failed)
    }
}

/// Durable per-run progress record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub analysis_id: String,
    pub repository_id: String,
    pub phase: AnalysisPhase,
    pub files_discovered: usize,
    pub changed_files: usize,
    pub deleted_files: usize,
    pub unchanged_files: usize,
    /// Absolute paths whose node batches have committed; append-only
    pub files_processed: BTreeSet<String>,
    /// Count of completed node batches; only increases
    pub batch_index: usize,
    pub total_batches: usize,
    pub nodes_created: usize,
    pub relationships_created: usize,
    pub is_full_reindex: bool,
    pub indexing_reason: String,
    pub status: CheckpointStatus,
    pub last_updated: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// Inputs for a fresh checkpoint
#[derive(Debug, Clone, Default)]
pub struct CheckpointSeed {
    pub repository_id: String,
    pub files_discovered: usize,
    pub changed_files: usize,
    pub deleted_files: usize,
    pub unchanged_files: usize,
    pub is_full_reindex: bool,
    pub indexing_reason: String,
}

impl Checkpoint {
    fn qualified_name(repository_id: &str, analysis_id: &str) -> String {
        format!("{}:checkpoint:{}", repository_id, analysis_id)
    }

    pub fn node_entity_id(&self) -> String {
        entity_id(
            kinds::ANALYSIS_CHECKPOINT,
            &Self::qualified_name(&self.repository_id, &self.analysis_id),
        )
    }
}

/// Persists checkpoints through the graph store and restores them on resume
pub struct CheckpointManager {
    store: Arc<dyn GraphStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Allocate a new `running` checkpoint and persist it
    pub async fn create_checkpoint(&self, seed: CheckpointSeed) -> Result<Checkpoint> {
        let checkpoint = Checkpoint {
            analysis_id: Uuid::new_v4().to_string(),
            repository_id: seed.repository_id,
            phase: AnalysisPhase::IndexingFiles,
            files_discovered: seed.files_discovered,
            changed_files: seed.changed_files,
            deleted_files: seed.deleted_files,
            unchanged_files: seed.unchanged_files,
            files_processed: BTreeSet::new(),
            batch_index: 0,
            total_batches: 0,
            nodes_created: 0,
            relationships_created: 0,
            is_full_reindex: seed.is_full_reindex,
            indexing_reason: seed.indexing_reason,
            status: CheckpointStatus::Running,
            last_updated: Utc::now(),
            error_message: None,
        };
        self.persist(&checkpoint).await?;
        info!(
            "created checkpoint {} for {}",
            checkpoint.analysis_id, checkpoint.repository_id
        );
        Ok(checkpoint)
    }

    /// Move the run to a new phase and persist
    pub async fn update_phase(
        &self,
        checkpoint: &mut Checkpoint,
        phase: AnalysisPhase,
    ) -> Result<()> {
        debug!(
            "checkpoint {}: phase {} -> {}",
            checkpoint.analysis_id, checkpoint.phase, phase
        );
        checkpoint.phase = phase;
        checkpoint.last_updated = Utc::now();
        self.persist(checkpoint).await
    }

    /// Record a durably committed batch.
    ///
    /// `files_in_batch` is appended to `files_processed` with set semantics;
    /// relationship batches pass an empty slice and advance only counters.
    /// The write completes before this returns, so a checkpoint can never
    /// claim an uncommitted batch.
    pub async fn mark_batch_complete(
        &self,
        checkpoint: &mut Checkpoint,
        files_in_batch: &[String],
        nodes_in_batch: usize,
        relationships_in_batch: usize,
    ) -> Result<()> {
        checkpoint
            .files_processed
            .extend(files_in_batch.iter().cloned());
        if nodes_in_batch > 0 {
            checkpoint.batch_index += 1;
        }
        checkpoint.nodes_created += nodes_in_batch;
        checkpoint.relationships_created += relationships_in_batch;
        checkpoint.last_updated = Utc::now();
        self.persist(checkpoint).await
    }

    /// Most recent `running` or `failed` checkpoint for a repository
    pub async fn load_incomplete_checkpoint(
        &self,
        repository_id: &str,
    ) -> Result<Option<Checkpoint>> {
        let nodes = self
            .store
            .find_nodes(
                kinds::ANALYSIS_CHECKPOINT,
                &[PropertyFilter::eq("repositoryId", repository_id)],
            )
            .await?;

        let mut incomplete: Vec<Checkpoint> = Vec::new();
        for node in nodes {
            match Self::from_node(&node) {
                Ok(cp) if cp.status.is_incomplete() => incomplete.push(cp),
                Ok(_) => {}
                Err(err) => {
                    // Unreadable checkpoints are skipped, not fatal
                    debug!("ignoring unreadable checkpoint node: {}", err);
                }
            }
        }
        incomplete.sort_by_key(|cp| cp.last_updated);
        Ok(incomplete.pop())
    }

    /// Re-bind a resumed checkpoint: back to `running`, error cleared
    pub async fn resume_checkpoint(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.status = CheckpointStatus::Running;
        checkpoint.error_message = None;
        checkpoint.last_updated = Utc::now();
        self.persist(checkpoint).await
    }

    pub async fn complete_checkpoint(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.status = CheckpointStatus::Completed;
        checkpoint.phase = AnalysisPhase::Completed;
        checkpoint.last_updated = Utc::now();
        self.persist(checkpoint).await
    }

    pub async fn fail_checkpoint(
        &self,
        checkpoint: &mut Checkpoint,
        error: impl Into<String>,
    ) -> Result<()> {
        checkpoint.status = CheckpointStatus::Failed;
        checkpoint.error_message = Some(error.into());
        checkpoint.last_updated = Utc::now();
        self.persist(checkpoint).await
    }

    /// Write the checkpoint through to the store as a node upsert
    async fn persist(&self, checkpoint: &Checkpoint) -> Result<()> {
        let payload = serde_json::to_value(checkpoint)
            .map_err(|e| AnalyzerError::Checkpoint(format!("serialize: {}", e)))?;

        let node = Node::builder(kinds::ANALYSIS_CHECKPOINT, &checkpoint.analysis_id)
            .entity_id(checkpoint.node_entity_id())
            .instance_id(&checkpoint.analysis_id)
            .property("repositoryId", json!(checkpoint.repository_id))
            .property("status", json!(checkpoint.status.as_str()))
            .property("lastUpdated", json!(checkpoint.last_updated.to_rfc3339()))
            .property("payload", payload)
            .build();

        self.store
            .save_nodes_batch(vec![node], None)
            .await
            .map_err(|e| AnalyzerError::Checkpoint(e.to_string()))?;
        Ok(())
    }

    fn from_node(node: &Node) -> Result<Checkpoint> {
        let payload: &Value = node
            .property("payload")
            .ok_or_else(|| AnalyzerError::Checkpoint("checkpoint node without payload".into()))?;
        serde_json::from_value(payload.clone())
            .map_err(|e| AnalyzerError::Checkpoint(format!("deserialize: {}", e)))
    }
}
