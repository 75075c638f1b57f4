//! Analysis orchestrator.
//!
//! Sequences the pipeline: scan, build inspection, incremental
//! classification, two-pass parse/resolve, batched storage with checkpoint
//! write-through, optional analytics, index-state save. Data flows strictly
//! forward; the checkpoint listener observes store batch completions and is
//! the only component that mutates run progress.
//!
//! Failure contract: anything thrown between parsing and completion marks
//! the active checkpoint `failed` (with the error message, or `cancelled`)
//! and propagates. The next run for the repository resumes from the last
//! committed batch.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use repograph_model::{FileInfo, InstanceIdAllocator, Node, Relationship, RepositoryContext};
use repograph_storage::{BatchListener, GraphStore, NodeBatchReport};

use crate::analytics;
use crate::build::{BuildSystemInspector, ProjectStructure};
use crate::checkpoint::{
    AnalysisPhase, Checkpoint, CheckpointManager, CheckpointSeed,
};
use crate::error::{AnalyzerError, Result};
use crate::incremental::{IncrementalIndexManager, IncrementalResult};
use crate::parser::{ParseCollector, ParserConfig, ParserRegistry};
use crate::progress::{LogLevel, ProgressReporter, ProgressSink, RunTotals};
use crate::resolver::RelationshipResolver;
use crate::scanner::{enrich_with_modules, FileScanner, ScannerConfig};
use crate::synthesis::synthesize;

/// Orchestrator configuration
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    pub scanner: ScannerConfig,
    pub parser: ParserConfig,
    /// PageRank phase toggle; failures there are non-fatal either way
    pub analytics_enabled: bool,
}

impl AnalyzerConfig {
    pub fn with_analytics() -> Self {
        Self {
            analytics_enabled: true,
            ..Self::default()
        }
    }
}

/// Per-call options
#[derive(Clone)]
pub struct AnalyzeOptions {
    pub force_full_reindex: bool,
    /// When false the run behaves as a full reindex
    pub incremental: bool,
    pub commit_sha: Option<String>,
    pub cancel: Option<CancellationToken>,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            force_full_reindex: false,
            incremental: true,
            commit_sha: None,
            cancel: None,
            progress: None,
        }
    }
}

impl AnalyzeOptions {
    pub fn incremental() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            force_full_reindex: true,
            ..Self::default()
        }
    }
}

/// What one `analyze` call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub files_scanned: usize,
    /// Entities that did not exist in the store before this run
    pub nodes_created: usize,
    pub relationships_created: usize,
    pub was_incremental: bool,
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub indexing_reason: String,
    pub resumed: bool,
}

/// Top-level analysis pipeline
pub struct AnalyzerOrchestrator {
    store: Arc<dyn GraphStore>,
    registry: Arc<ParserRegistry>,
    config: AnalyzerConfig,
    active_repositories: Arc<Mutex<HashSet<String>>>,
}

impl AnalyzerOrchestrator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        registry: Arc<ParserRegistry>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            active_repositories: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run one analysis over `directory`, scoped to `repo`.
    pub async fn analyze(
        &self,
        directory: &Path,
        repo: RepositoryContext,
        options: AnalyzeOptions,
    ) -> Result<AnalysisReport> {
        let _lock =
            RepositoryLock::acquire(self.active_repositories.clone(), &repo.repository_id)?;
        let cancel = options.cancel.clone().unwrap_or_default();
        let reporter = ProgressReporter::new(options.progress.clone());

        self.store.initialize().await?;
        let checkpoints = Arc::new(CheckpointManager::new(self.store.clone()));
        let index_mgr = IncrementalIndexManager::new(self.store.clone());

        // 1. Detect an interrupted run for this repository
        let existing = checkpoints
            .load_incomplete_checkpoint(&repo.repository_id)
            .await?;

        // 2. Scan with hashes
        reporter.phase(AnalysisPhase::IndexingFiles);
        let scanner = FileScanner::new(self.config.scanner.clone())?;
        let mut files = scanner.scan_with_hashes(directory)?;
        let files_scanned = files.len();
        check_cancel(&cancel)?;

        // 3. Build-system structure
        let structure = BuildSystemInspector::inspect(directory, &repo.repository_name);
        if let Some(structure) = &structure {
            enrich_with_modules(&mut files, structure);
        }

        // 4. Incremental classification and deleted-file cleanup
        reporter.phase(AnalysisPhase::IncrementalCheck);
        let force = options.force_full_reindex || !options.incremental;
        let is_git_repo = directory.join(".git").exists();
        let classification = index_mgr
            .determine_files_to_process_with_hash_verification(
                &repo.repository_id,
                files.clone(),
                force,
                is_git_repo,
                options.commit_sha.as_deref(),
            )
            .await?;
        let files_deleted = classification.deleted_files.len();
        if files_deleted > 0 {
            index_mgr
                .cleanup_deleted_files(&repo.repository_id, &classification.deleted_files)
                .await?;
        }
        check_cancel(&cancel)?;

        // Bind or create the checkpoint for this run
        let mut resumed = false;
        let mut checkpoint = match existing {
            Some(mut prior) if !options.force_full_reindex => {
                info!(
                    "resuming analysis {} for {} ({} files already processed)",
                    prior.analysis_id,
                    repo.repository_id,
                    prior.files_processed.len()
                );
                checkpoints.resume_checkpoint(&mut prior).await?;
                resumed = true;
                prior
            }
            Some(mut prior) => {
                checkpoints
                    .fail_checkpoint(&mut prior, "superseded by forced full reindex")
                    .await?;
                checkpoints
                    .create_checkpoint(seed_from(&repo, files_scanned, &classification))
                    .await?
            }
            None => {
                checkpoints
                    .create_checkpoint(seed_from(&repo, files_scanned, &classification))
                    .await?
            }
        };

        // 5. A resumed run skips files whose batches already committed
        let mut to_process = classification.changed_files;
        let mut files_skipped = classification.unchanged_files.len();
        if resumed {
            let (remaining, skipped) = index_mgr
                .filter_already_processed_files(to_process, &checkpoint.files_processed);
            to_process = remaining;
            files_skipped += skipped;
        }

        // 6. Early exits
        if files_scanned == 0 {
            info!("{}: empty repository", repo.repository_id);
            checkpoints.complete_checkpoint(&mut checkpoint).await?;
            reporter.completed(true, RunTotals::default());
            return Ok(AnalysisReport {
                files_scanned: 0,
                was_incremental: !classification.is_full_reindex,
                files_deleted,
                indexing_reason: classification.reason,
                resumed,
                ..AnalysisReport::default()
            });
        }
        if to_process.is_empty() {
            let reason = if resumed {
                classification.reason.clone()
            } else {
                "up to date".to_string()
            };
            info!("{}: {}", repo.repository_id, reason);
            let state = index_mgr.create_index_state(
                &repo.repository_id,
                &files,
                options.commit_sha.as_deref(),
            );
            if let Err(err) = index_mgr.save_index_state(&state).await {
                warn!("index state save failed (next run reindexes): {}", err);
            }
            checkpoints.complete_checkpoint(&mut checkpoint).await?;
            reporter.completed(
                true,
                RunTotals {
                    files_scanned,
                    ..RunTotals::default()
                },
            );
            return Ok(AnalysisReport {
                files_scanned,
                was_incremental: !classification.is_full_reindex,
                files_skipped,
                files_deleted,
                indexing_reason: reason,
                resumed,
                ..AnalysisReport::default()
            });
        }

        // 7..12 with failure -> failed checkpoint
        let shared = Arc::new(tokio::sync::Mutex::new(checkpoint));
        let outcome = self
            .run_main_phases(
                &repo,
                &files,
                to_process,
                structure.as_ref(),
                &options,
                &checkpoints,
                shared.clone(),
                &index_mgr,
                &reporter,
                &cancel,
            )
            .await;

        let mut checkpoint = shared.lock().await;
        match outcome {
            Ok((node_report, relationships_created)) => {
                // 13. Complete
                checkpoints.complete_checkpoint(&mut checkpoint).await?;
                let totals = RunTotals {
                    files_scanned,
                    nodes_created: node_report.nodes_created,
                    relationships_created,
                };
                reporter.completed(true, totals);
                info!(
                    "{}: analysis complete, {} nodes created, {} updated, {} relationships",
                    repo.repository_id,
                    node_report.nodes_created,
                    node_report.nodes_updated,
                    relationships_created
                );
                Ok(AnalysisReport {
                    files_scanned,
                    nodes_created: node_report.nodes_created,
                    relationships_created,
                    was_incremental: !classification.is_full_reindex,
                    files_skipped,
                    files_deleted,
                    indexing_reason: classification.reason,
                    resumed,
                })
            }
            Err(err) => {
                let message = match &err {
                    AnalyzerError::Cancelled => "cancelled".to_string(),
                    other => other.to_string(),
                };
                error!("{}: analysis failed: {}", repo.repository_id, message);
                if let Err(cp_err) = checkpoints.fail_checkpoint(&mut checkpoint, &message).await
                {
                    warn!("could not record failed checkpoint: {}", cp_err);
                }
                reporter.completed(false, RunTotals::default());
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_main_phases(
        &self,
        repo: &RepositoryContext,
        files: &[FileInfo],
        to_process: Vec<FileInfo>,
        structure: Option<&ProjectStructure>,
        options: &AnalyzeOptions,
        checkpoints: &Arc<CheckpointManager>,
        checkpoint: Arc<tokio::sync::Mutex<Checkpoint>>,
        index_mgr: &IncrementalIndexManager,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(NodeBatchReport, usize)> {
        // 7. Parse (pass 1)
        self.enter_phase(checkpoints, &checkpoint, reporter, AnalysisPhase::Parsing)
            .await?;
        check_cancel(cancel)?;
        let ids = InstanceIdAllocator::new();
        let collector = ParseCollector::new(self.registry.clone(), self.config.parser.clone());
        let parsed = collector
            .parse_files(&to_process, repo, &ids, cancel)
            .await?;
        check_cancel(cancel)?;
        reporter.progress(AnalysisPhase::Parsing, to_process.len(), to_process.len());
        if parsed.stats.files_failed > 0 {
            reporter.log(
                LogLevel::Warn,
                AnalysisPhase::Parsing,
                format!("{} files failed to parse", parsed.stats.files_failed),
            );
        }

        // 8. Structural synthesis; synthetic nodes lead, then per-file groups
        let structural = synthesize(repo, structure, files, &parsed.all_nodes, &ids);
        let mut all_nodes: Vec<Node> =
            Vec::with_capacity(structural.nodes.len() + parsed.all_nodes.len());
        all_nodes.extend(structural.nodes);
        all_nodes.extend(parsed.all_nodes);

        // 9. Resolve (pass 2) and combine
        let resolver = RelationshipResolver::new(self.registry.clone());
        let mut relationships = parsed.all_relationships;
        relationships.extend(structural.relationships);
        let (relationships, resolution) = resolver.resolve(&all_nodes, relationships);
        debug!(
            "resolution: {} resolved, {} passthrough, {} dropped, {} deduplicated",
            resolution.resolved,
            resolution.passthrough,
            resolution.dropped,
            resolution.deduplicated
        );

        // 10a. Store nodes, checkpoint advancing after every committed batch.
        // Batches are packed at file-group boundaries: a file whose batch
        // has committed is wholly in the store, so skipping it on resume is
        // always safe.
        let batch_size = self.store.batch_size().max(1);
        let total_nodes = all_nodes.len();
        let batches = pack_into_batches(all_nodes, batch_size);
        {
            let mut cp = checkpoint.lock().await;
            cp.total_batches = batches.len();
            checkpoints
                .update_phase(&mut cp, AnalysisPhase::StoringNodes)
                .await?;
        }
        reporter.phase(AnalysisPhase::StoringNodes);

        let listener = CheckpointingListener {
            manager: checkpoints.clone(),
            checkpoint: checkpoint.clone(),
        };

        let mut node_report = NodeBatchReport::default();
        for batch in batches {
            check_cancel(cancel)?;
            let report = self
                .store
                .save_nodes_batch(batch, Some(&listener))
                .await
                .map_err(AnalyzerError::StoreBatch)?;
            node_report.merge(&report);
            reporter.progress(
                AnalysisPhase::StoringNodes,
                node_report.nodes_stored,
                total_nodes,
            );
        }

        // 10b. Store relationships grouped by type
        self.enter_phase(
            checkpoints,
            &checkpoint,
            reporter,
            AnalysisPhase::StoringRelationships,
        )
        .await?;
        let mut by_type: BTreeMap<String, Vec<Relationship>> = BTreeMap::new();
        for rel in relationships {
            by_type.entry(rel.rel_type.clone()).or_default().push(rel);
        }
        let mut relationships_created = 0;
        for (rel_type, rels) in by_type {
            check_cancel(cancel)?;
            relationships_created += self
                .store
                .save_relationships_batch(&rel_type, rels, Some(&listener))
                .await
                .map_err(AnalyzerError::StoreBatch)?;
        }

        // 11. Analytics; never fatal
        self.enter_phase(
            checkpoints,
            &checkpoint,
            reporter,
            AnalysisPhase::ComputingPagerank,
        )
        .await?;
        if self.config.analytics_enabled {
            match analytics::compute_pagerank(self.store.as_ref()).await {
                Ok(annotated) => debug!("pagerank annotated {} nodes", annotated),
                Err(err) => {
                    warn!("pagerank failed (non-fatal): {}", err);
                    reporter.log(
                        LogLevel::Warn,
                        AnalysisPhase::ComputingPagerank,
                        format!("analytics skipped: {}", err),
                    );
                }
            }
        }

        // 12. Index state; failure degrades the next run to a full reindex
        self.enter_phase(
            checkpoints,
            &checkpoint,
            reporter,
            AnalysisPhase::SavingIndexState,
        )
        .await?;
        let state = index_mgr.create_index_state(
            &repo.repository_id,
            files,
            options.commit_sha.as_deref(),
        );
        if let Err(err) = index_mgr.save_index_state(&state).await {
            warn!("index state save failed (next run reindexes): {}", err);
            reporter.log(
                LogLevel::Warn,
                AnalysisPhase::SavingIndexState,
                format!("index state not saved: {}", err),
            );
        }

        Ok((node_report, relationships_created))
    }

    async fn enter_phase(
        &self,
        checkpoints: &Arc<CheckpointManager>,
        checkpoint: &Arc<tokio::sync::Mutex<Checkpoint>>,
        reporter: &ProgressReporter,
        phase: AnalysisPhase,
    ) -> Result<()> {
        let mut cp = checkpoint.lock().await;
        checkpoints.update_phase(&mut cp, phase).await?;
        reporter.phase(phase);
        Ok(())
    }
}

fn seed_from(
    repo: &RepositoryContext,
    files_scanned: usize,
    classification: &IncrementalResult,
) -> CheckpointSeed {
    CheckpointSeed {
        repository_id: repo.repository_id.clone(),
        files_discovered: files_scanned,
        changed_files: classification.changed_files.len(),
        deleted_files: classification.deleted_files.len(),
        unchanged_files: classification.unchanged_files.len(),
        is_full_reindex: classification.is_full_reindex,
        indexing_reason: classification.reason.clone(),
    }
}

/// Pack nodes into store-sized batches without splitting a file's group
/// (its `File` node plus following descendants) across a batch boundary.
/// Groups larger than one batch still split, with the `File` node leading
/// the first piece.
fn pack_into_batches(nodes: Vec<Node>, batch_size: usize) -> Vec<Vec<Node>> {
    use repograph_model::kinds;

    // A `File` node opens a new group; synthetic nodes before the first
    // file form a group of their own.
    let mut groups: Vec<Vec<Node>> = Vec::new();
    for node in nodes {
        if node.kind == kinds::FILE || groups.is_empty() {
            groups.push(Vec::new());
        }
        groups.last_mut().expect("just pushed").push(node);
    }

    let mut batches: Vec<Vec<Node>> = Vec::new();
    let mut current: Vec<Node> = Vec::new();
    for group in groups {
        if !current.is_empty() && current.len() + group.len() > batch_size {
            batches.push(std::mem::take(&mut current));
        }
        if group.len() > batch_size {
            // Oversized group: flush whole chunks directly
            for chunk in group.chunks(batch_size) {
                if chunk.len() == batch_size {
                    batches.push(chunk.to_vec());
                } else {
                    current.extend_from_slice(chunk);
                }
            }
        } else {
            current.extend(group);
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AnalyzerError::Cancelled)
    } else {
        Ok(())
    }
}

/// Writes checkpoint progress synchronously with batch commits.
///
/// Checkpoint write failures are logged, not raised: the batch itself is
/// durable, only resume accuracy degrades.
struct CheckpointingListener {
    manager: Arc<CheckpointManager>,
    checkpoint: Arc<tokio::sync::Mutex<Checkpoint>>,
}

#[async_trait::async_trait]
impl BatchListener for CheckpointingListener {
    async fn on_node_batch_complete(
        &self,
        _batch_index: usize,
        files_in_batch: &[String],
        nodes_in_batch: usize,
    ) {
        let mut cp = self.checkpoint.lock().await;
        if let Err(err) = self
            .manager
            .mark_batch_complete(&mut cp, files_in_batch, nodes_in_batch, 0)
            .await
        {
            warn!("checkpoint update failed (resume safety degraded): {}", err);
        }
    }

    async fn on_relationship_batch_complete(
        &self,
        _batch_index: usize,
        _rel_type: &str,
        count: usize,
    ) {
        let mut cp = self.checkpoint.lock().await;
        if let Err(err) = self.manager.mark_batch_complete(&mut cp, &[], 0, count).await {
            warn!("checkpoint update failed (resume safety degraded): {}", err);
        }
    }
}

/// In-process guard: at most one live analysis per repository id
struct RepositoryLock {
    repositories: Arc<Mutex<HashSet<String>>>,
    repository_id: String,
}

impl RepositoryLock {
    fn acquire(
        repositories: Arc<Mutex<HashSet<String>>>,
        repository_id: &str,
    ) -> Result<Self> {
        {
            let mut active = repositories.lock();
            if !active.insert(repository_id.to_string()) {
                return Err(AnalyzerError::RepositoryBusy(repository_id.to_string()));
            }
        }
        Ok(Self {
            repositories,
            repository_id: repository_id.to_string(),
        })
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        self.repositories.lock().remove(&self.repository_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_lock_excludes_same_repo() {
        let repos = Arc::new(Mutex::new(HashSet::new()));
        let first = RepositoryLock::acquire(repos.clone(), "r1").unwrap();
        assert!(matches!(
            RepositoryLock::acquire(repos.clone(), "r1"),
            Err(AnalyzerError::RepositoryBusy(_))
        ));
        // A different repository is fine
        let _other = RepositoryLock::acquire(repos.clone(), "r2").unwrap();

        drop(first);
        let _again = RepositoryLock::acquire(repos, "r1").unwrap();
    }

    #[test]
    fn test_pack_into_batches_keeps_file_groups_whole() {
        use repograph_model::kinds;

        let node = |kind: &str, tag: &str| {
            Node::builder(kind, tag)
                .entity_id(tag)
                .instance_id(tag)
                .build()
        };
        // repo + 2 files with 2 descendants each
        let nodes = vec![
            node(kinds::REPOSITORY, "repo"),
            node(kinds::FILE, "f1"),
            node("Class", "f1c"),
            node("Method", "f1m"),
            node(kinds::FILE, "f2"),
            node("Class", "f2c"),
        ];

        let batches = pack_into_batches(nodes, 4);
        // repo + f1 group fill batch 0; f2 group must not split into it
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 4);
        assert_eq!(batches[1].len(), 2);
        assert_eq!(batches[1][0].kind, kinds::FILE);
    }

    #[test]
    fn test_pack_into_batches_oversized_group_splits() {
        use repograph_model::kinds;

        let node = |kind: &str, tag: String| {
            Node::builder(kind, tag.as_str())
                .entity_id(tag.as_str())
                .instance_id(tag)
                .build()
        };
        let mut nodes = vec![node(kinds::FILE, "f".to_string())];
        for i in 0..5 {
            nodes.push(node("Method", format!("m{}", i)));
        }

        let batches = pack_into_batches(nodes, 2);
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 6);
        assert!(batches.iter().all(|b| b.len() <= 2));
        // The File node leads the first piece
        assert_eq!(batches[0][0].kind, kinds::FILE);
    }

    #[test]
    fn test_options_presets() {
        let inc = AnalyzeOptions::incremental();
        assert!(inc.incremental);
        assert!(!inc.force_full_reindex);

        let full = AnalyzeOptions::full();
        assert!(full.force_full_reindex);
    }
}
