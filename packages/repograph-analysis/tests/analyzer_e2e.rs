//! End-to-end analyzer scenarios against the SQLite store.
//!
//! Uses a line-oriented fixture parser so node/relationship production is
//! deterministic without pulling real language grammars into the tests.
//! Fixture file format:
//!
//! ```text
//! class Widget
//!   method render
//!     calls src/Other.java#Other.run
//! extends src/Base.java#Base
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use repograph_analysis::parser::synthesize_file_node;
use repograph_analysis::{
    AnalyzeOptions, AnalyzerConfig, AnalyzerError, AnalyzerOrchestrator, CheckpointManager,
    LanguageParser, ParseFailure, ParserRegistry, SingleFileParseResult,
};
use repograph_model::{
    entity_id, kinds, qualified_name, rel_types, FileInfo, InstanceIdAllocator, Language, Node,
    Relationship, RepositoryContext, Span,
};
use repograph_storage::{
    BatchConfig, BatchListener, DeleteReport, GraphStore, NodeBatchReport, PropertyFilter,
    SqliteGraphStore, StorageError,
};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Line-oriented fixture parser for `.java` files
struct OutlineParser;

#[async_trait]
impl LanguageParser for OutlineParser {
    fn language(&self) -> Language {
        Language::Java
    }

    async fn parse_file(
        &self,
        file: &FileInfo,
        ctx: &RepositoryContext,
        ids: &InstanceIdAllocator,
    ) -> Result<SingleFileParseResult, ParseFailure> {
        let content = tokio::fs::read_to_string(&file.absolute_path)
            .await
            .map_err(|e| ParseFailure {
                file_path: file.path_key(),
                reason: e.to_string(),
            })?;

        let file_node = synthesize_file_node(file, ctx, ids, Some(Language::Java));
        let file_entity = file_node.entity_id.clone();
        let mut nodes = vec![file_node];
        let mut relationships = Vec::new();
        let mut current_class: Option<(String, String)> = None;
        let mut current_method: Option<String> = None;

        for (idx, raw) in content.lines().enumerate() {
            let line_no = (idx + 1) as u32;
            let line = raw.trim();
            if let Some(name) = line.strip_prefix("class ") {
                let qn = qualified_name(&ctx.repository_id, &file.relative_path, name);
                let node = Node::builder("Class", name)
                    .entity_id(entity_id("Class", &qn))
                    .instance_id(ids.next("Class", name))
                    .file_path(file.path_key())
                    .language("java")
                    .span(Span::new(line_no, 0, line_no, 0))
                    .parent_id(&file_entity)
                    .property("qualifiedName", json!(qn))
                    .build();
                current_class = Some((node.entity_id.clone(), name.to_string()));
                current_method = None;
                nodes.push(node);
            } else if let Some(name) = line.strip_prefix("method ") {
                let Some((class_id, class_name)) = &current_class else {
                    continue;
                };
                let symbol = format!("{}.{}", class_name, name);
                let qn = qualified_name(&ctx.repository_id, &file.relative_path, &symbol);
                let node = Node::builder("Method", name)
                    .entity_id(entity_id("Method", &qn))
                    .instance_id(ids.next("Method", name))
                    .file_path(file.path_key())
                    .language("java")
                    .span(Span::new(line_no, 0, line_no, 0))
                    .parent_id(class_id)
                    .property("qualifiedName", json!(qn))
                    .build();
                current_method = Some(node.entity_id.clone());
                nodes.push(node);
            } else if let Some(target) = line.strip_prefix("calls ") {
                let Some((path, symbol)) = target.split_once('#') else {
                    continue;
                };
                let source = current_method
                    .clone()
                    .or_else(|| current_class.as_ref().map(|(id, _)| id.clone()))
                    .unwrap_or_else(|| file_entity.clone());
                let qn = qualified_name(&ctx.repository_id, path, symbol);
                relationships.push(Relationship::unresolved(
                    rel_types::CALLS,
                    source,
                    qn,
                    ids.next(rel_types::CALLS, symbol),
                ));
            } else if let Some(target) = line.strip_prefix("extends ") {
                let (Some((path, symbol)), Some((class_id, _))) =
                    (target.split_once('#'), &current_class)
                else {
                    continue;
                };
                let qn = qualified_name(&ctx.repository_id, path, symbol);
                relationships.push(Relationship::unresolved(
                    "EXTENDS",
                    class_id.clone(),
                    qn,
                    ids.next("EXTENDS", symbol),
                ));
            }
        }

        Ok(SingleFileParseResult {
            file_path: file.path_key(),
            nodes,
            relationships,
        })
    }
}

fn registry() -> Arc<ParserRegistry> {
    let mut registry = ParserRegistry::new();
    registry.register(Arc::new(OutlineParser));
    Arc::new(registry)
}

fn repo_ctx(id: &str, root: &Path) -> RepositoryContext {
    RepositoryContext::new(id, format!("{}-name", id), root)
}

fn small_batch_store(path: &Path) -> Arc<SqliteGraphStore> {
    Arc::new(
        SqliteGraphStore::open(path).unwrap().with_config(BatchConfig {
            batch_size: 2,
            ..BatchConfig::default()
        }),
    )
}

fn orchestrator(store: Arc<dyn GraphStore>) -> AnalyzerOrchestrator {
    AnalyzerOrchestrator::new(store, registry(), AnalyzerConfig::default())
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

async fn graph_signature(store: &dyn GraphStore) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut nodes = BTreeSet::new();
    for kind in [kinds::REPOSITORY, kinds::MODULE, kinds::FILE, "Class", "Method"] {
        for node in store.find_nodes(kind, &[]).await.unwrap() {
            nodes.insert(node.entity_id);
        }
    }
    let rels = store
        .find_relationships(None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.entity_id)
        .collect();
    (nodes, rels)
}

// E1: empty repository
#[tokio::test]
async fn test_empty_repository() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
    let orch = orchestrator(store.clone());

    let report = orch
        .analyze(dir.path(), repo_ctx("r1", dir.path()), AnalyzeOptions::incremental())
        .await
        .unwrap();

    assert_eq!(report.files_scanned, 0);
    assert_eq!(report.nodes_created, 0);
    assert_eq!(report.relationships_created, 0);
    assert!(!report.was_incremental);

    // No incomplete checkpoint remains
    let checkpoints = CheckpointManager::new(store);
    assert!(checkpoints
        .load_incomplete_checkpoint("r1")
        .await
        .unwrap()
        .is_none());
}

// E2: single-file repository, then an idempotent rerun
#[tokio::test]
async fn test_single_file_and_idempotent_rerun() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.java", "class A\n  method run\n");
    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
    let orch = orchestrator(store.clone());
    let ctx = repo_ctx("r1", dir.path());

    let first = orch
        .analyze(dir.path(), ctx.clone(), AnalyzeOptions::incremental())
        .await
        .unwrap();
    assert_eq!(first.files_scanned, 1);
    assert!(first.nodes_created >= 3, "repository + file + class");

    // Repository and File nodes with a BELONGS_TO edge between them
    let file_entity = entity_id(kinds::FILE, &qualified_name("r1", "a.java", ""));
    let repo_entity = entity_id(kinds::REPOSITORY, "r1");
    assert!(store.get_node(&file_entity).await.unwrap().is_some());
    assert!(store.get_node(&repo_entity).await.unwrap().is_some());
    let belongs = store
        .find_relationships(Some(rel_types::BELONGS_TO))
        .await
        .unwrap();
    assert!(belongs
        .iter()
        .any(|r| r.source_id == file_entity && r.target_id == repo_entity));

    let second = orch
        .analyze(dir.path(), ctx, AnalyzeOptions::incremental())
        .await
        .unwrap();
    assert_eq!(second.files_scanned, 1);
    assert_eq!(second.files_skipped, 1);
    assert_eq!(second.nodes_created, 0);
    assert!(second.was_incremental);
}

// E3: modified file re-parses, same entity ids, updated properties
#[tokio::test]
async fn test_modified_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.java", "class A\n");
    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
    let orch = orchestrator(store.clone());
    let ctx = repo_ctx("r1", dir.path());

    orch.analyze(dir.path(), ctx.clone(), AnalyzeOptions::incremental())
        .await
        .unwrap();
    let file_entity = entity_id(kinds::FILE, &qualified_name("r1", "a.java", ""));
    let old_hash = store
        .get_node(&file_entity)
        .await
        .unwrap()
        .unwrap()
        .property_str("contentHash")
        .unwrap()
        .to_string();

    write(dir.path(), "a.java", "class A\n  method run\n");
    let report = orch
        .analyze(dir.path(), ctx, AnalyzeOptions::incremental())
        .await
        .unwrap();

    assert_eq!(report.files_scanned, 1);
    assert_eq!(report.files_skipped, 0);
    assert!(report.was_incremental);
    assert!(report.indexing_reason.contains("changed"));

    // Same File entity, new hash
    let node = store.get_node(&file_entity).await.unwrap().unwrap();
    assert_ne!(node.property_str("contentHash").unwrap(), old_hash);
    assert_eq!(store.count_nodes(Some(kinds::FILE)).await.unwrap(), 1);
}

// E4: deleted file is garbage-collected, repository remains
#[tokio::test]
async fn test_deleted_file_cleanup() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.java", "class A\n  method run\n");
    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
    let orch = orchestrator(store.clone());
    let ctx = repo_ctx("r1", dir.path());

    orch.analyze(dir.path(), ctx.clone(), AnalyzeOptions::incremental())
        .await
        .unwrap();
    assert!(store.count_nodes(Some("Class")).await.unwrap() >= 1);

    fs::remove_file(dir.path().join("a.java")).unwrap();
    let report = orch
        .analyze(dir.path(), ctx, AnalyzeOptions::incremental())
        .await
        .unwrap();

    assert_eq!(report.files_deleted, 1);
    assert_eq!(store.count_nodes(Some(kinds::FILE)).await.unwrap(), 0);
    assert_eq!(store.count_nodes(Some("Class")).await.unwrap(), 0);
    assert_eq!(store.count_nodes(Some("Method")).await.unwrap(), 0);
    // Repository node survives
    let repo_entity = entity_id(kinds::REPOSITORY, "r1");
    assert!(store.get_node(&repo_entity).await.unwrap().is_some());
}

// E5: multi-module Gradle project
#[tokio::test]
async fn test_multi_module_project() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "settings.gradle",
        "rootProject.name = 'demo'\ninclude ':m1', ':m2'\n",
    );
    write(
        dir.path(),
        "m1/build.gradle",
        "plugins {\n    id 'java-library'\n}\n",
    );
    write(
        dir.path(),
        "m2/build.gradle",
        "plugins {\n    id 'application'\n}\n\ndependencies {\n    implementation project(':m1')\n    implementation 'g:a:1.0'\n}\n",
    );
    write(dir.path(), "m1/src/main/java/A.java", "class A\n");
    write(
        dir.path(),
        "m2/src/main/java/B.java",
        "class B\nextends m1/src/main/java/A.java#A\n",
    );

    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
    let orch = orchestrator(store.clone());
    let report = orch
        .analyze(dir.path(), repo_ctx("r1", dir.path()), AnalyzeOptions::incremental())
        .await
        .unwrap();
    assert_eq!(report.files_scanned, 2);

    // HAS_MODULE from the repository to each module
    let has_module = store
        .find_relationships(Some(rel_types::HAS_MODULE))
        .await
        .unwrap();
    assert_eq!(has_module.len(), 2);

    // DEPENDS_ON_MODULE m2 -> m1
    let module_deps = store
        .find_relationships(Some(rel_types::DEPENDS_ON_MODULE))
        .await
        .unwrap();
    assert_eq!(module_deps.len(), 1);

    // One external dependency node with a HAS_DEPENDENCY edge from m2
    let deps = store
        .find_nodes(kinds::EXTERNAL_DEPENDENCY, &[])
        .await
        .unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].name, "g:a:1.0");
    let has_dep = store
        .find_relationships(Some(rel_types::HAS_DEPENDENCY))
        .await
        .unwrap();
    assert_eq!(has_dep.len(), 1);
    assert_eq!(has_dep[0].target_id, deps[0].entity_id);

    // Every source file is contained in its module
    let contains = store
        .find_relationships(Some(rel_types::CONTAINS_FILE))
        .await
        .unwrap();
    assert_eq!(contains.len(), 2);

    // The cross-module extends reference resolved
    let extends = store.find_relationships(Some("EXTENDS")).await.unwrap();
    assert_eq!(extends.len(), 1);
    let target = entity_id(
        "Class",
        &qualified_name("r1", "m1/src/main/java/A.java", "A"),
    );
    assert_eq!(extends[0].target_id, target);
}

/// Referential integrity: every stored relationship's endpoints exist
#[tokio::test]
async fn test_referential_integrity() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.java", "class A\n  method run\n    calls b.java#B.go\n");
    write(dir.path(), "b.java", "class B\n  method go\n");
    // A reference into the void must be dropped, not stored dangling
    write(dir.path(), "c.java", "class C\ncalls nowhere.java#Missing.sym\n");

    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
    let orch = orchestrator(store.clone());
    orch.analyze(dir.path(), repo_ctx("r1", dir.path()), AnalyzeOptions::incremental())
        .await
        .unwrap();

    let mut known = BTreeSet::new();
    for kind in [kinds::REPOSITORY, kinds::FILE, "Class", "Method"] {
        for node in store.find_nodes(kind, &[]).await.unwrap() {
            known.insert(node.entity_id);
        }
    }
    let rels = store.find_relationships(None).await.unwrap();
    assert!(!rels.is_empty());
    for rel in rels {
        assert!(known.contains(&rel.source_id), "dangling source {}", rel.source_id);
        assert!(known.contains(&rel.target_id), "dangling target {}", rel.target_id);
    }
}

/// Fault-injecting wrapper: fails node batch saves from a given call count
struct FlakyStore {
    inner: Arc<SqliteGraphStore>,
    node_batches_before_failure: usize,
    node_batch_calls: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: Arc<SqliteGraphStore>, node_batches_before_failure: usize) -> Self {
        Self {
            inner,
            node_batches_before_failure,
            node_batch_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn initialize(&self) -> repograph_storage::Result<()> {
        self.inner.initialize().await
    }

    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    async fn save_nodes_batch(
        &self,
        nodes: Vec<Node>,
        listener: Option<&dyn BatchListener>,
    ) -> repograph_storage::Result<NodeBatchReport> {
        // Checkpoint and index-state writes go in without a listener and
        // must not trip the fault injection.
        if listener.is_some() {
            let calls = self.node_batch_calls.fetch_add(1, Ordering::SeqCst);
            if calls >= self.node_batches_before_failure {
                return Err(StorageError::transaction("injected batch failure"));
            }
        }
        self.inner.save_nodes_batch(nodes, listener).await
    }

    async fn save_relationships_batch(
        &self,
        rel_type: &str,
        relationships: Vec<Relationship>,
        listener: Option<&dyn BatchListener>,
    ) -> repograph_storage::Result<usize> {
        self.inner
            .save_relationships_batch(rel_type, relationships, listener)
            .await
    }

    async fn delete_files_and_descendants(
        &self,
        repository_id: &str,
        paths: &[String],
    ) -> repograph_storage::Result<DeleteReport> {
        self.inner
            .delete_files_and_descendants(repository_id, paths)
            .await
    }

    async fn get_node(&self, entity_id: &str) -> repograph_storage::Result<Option<Node>> {
        self.inner.get_node(entity_id).await
    }

    async fn find_nodes(
        &self,
        kind: &str,
        filters: &[PropertyFilter],
    ) -> repograph_storage::Result<Vec<Node>> {
        self.inner.find_nodes(kind, filters).await
    }

    async fn find_relationships(
        &self,
        rel_type: Option<&str>,
    ) -> repograph_storage::Result<Vec<Relationship>> {
        self.inner.find_relationships(rel_type).await
    }

    async fn merge_node_properties(
        &self,
        updates: Vec<(String, serde_json::Map<String, serde_json::Value>)>,
    ) -> repograph_storage::Result<usize> {
        self.inner.merge_node_properties(updates).await
    }

    async fn count_nodes(&self, kind: Option<&str>) -> repograph_storage::Result<usize> {
        self.inner.count_nodes(kind).await
    }

    async fn count_relationships(
        &self,
        rel_type: Option<&str>,
    ) -> repograph_storage::Result<usize> {
        self.inner.count_relationships(rel_type).await
    }
}

fn crash_fixture(root: &Path) {
    // One class per file keeps each file group within one store batch, so
    // a crash boundary always falls between whole files
    for name in ["a", "b", "c", "d", "e", "f"] {
        write(
            root,
            &format!("{}.java", name),
            &format!("class {}\n", name.to_uppercase()),
        );
    }
}

// E6: a run killed mid-storage resumes and converges to the baseline graph
#[tokio::test]
async fn test_crash_resume_converges() {
    init_tracing();
    // Baseline: uninterrupted run on a fresh database
    let baseline_dir = tempfile::tempdir().unwrap();
    crash_fixture(baseline_dir.path());
    let baseline_db = tempfile::tempdir().unwrap();
    let baseline_store = small_batch_store(&baseline_db.path().join("graph.db"));
    let orch = orchestrator(baseline_store.clone());
    orch.analyze(
        baseline_dir.path(),
        repo_ctx("r1", baseline_dir.path()),
        AnalyzeOptions::incremental(),
    )
    .await
    .unwrap();
    let baseline = graph_signature(baseline_store.as_ref()).await;

    // Interrupted run: fail after three committed node batches
    let crash_dir = tempfile::tempdir().unwrap();
    crash_fixture(crash_dir.path());
    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("graph.db");
    let flaky = Arc::new(FlakyStore::new(small_batch_store(&db_path), 3));
    let orch = orchestrator(flaky.clone());
    let err = orch
        .analyze(
            crash_dir.path(),
            repo_ctx("r1", crash_dir.path()),
            AnalyzeOptions::incremental(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AnalyzerError::StoreBatch(_)));

    // A failed checkpoint exists with partial progress
    let inspect_store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open(&db_path).unwrap());
    let checkpoints = CheckpointManager::new(inspect_store.clone());
    let failed = checkpoints
        .load_incomplete_checkpoint("r1")
        .await
        .unwrap()
        .expect("failed checkpoint persisted");
    assert!(!failed.files_processed.is_empty());
    assert!(failed.files_processed.len() < 6);
    assert!(failed.error_message.is_some());

    // Resume on a healthy store over the same database
    let resume_store = small_batch_store(&db_path);
    let orch = orchestrator(resume_store.clone());
    let report = orch
        .analyze(
            crash_dir.path(),
            repo_ctx("r1", crash_dir.path()),
            AnalyzeOptions::incremental(),
        )
        .await
        .unwrap();
    assert!(report.resumed);
    assert!(report.files_skipped >= failed.files_processed.len());

    // No incomplete checkpoint remains and the graph matches the baseline
    let checkpoints = CheckpointManager::new(resume_store.clone() as Arc<dyn GraphStore>);
    assert!(checkpoints
        .load_incomplete_checkpoint("r1")
        .await
        .unwrap()
        .is_none());

    // Entity ids derive from repository id and relative paths, so the
    // resumed graph must match the uninterrupted baseline exactly
    let resumed = graph_signature(resume_store.as_ref()).await;
    assert_eq!(resumed, baseline);
}

// Cancellation before parsing leaves the graph untouched
#[tokio::test]
async fn test_cancellation_before_parsing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.java", "class A\n");
    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
    let orch = orchestrator(store.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut options = AnalyzeOptions::incremental();
    options.cancel = Some(cancel);

    let err = orch
        .analyze(dir.path(), repo_ctx("r1", dir.path()), options)
        .await
        .unwrap_err();
    assert!(matches!(err, AnalyzerError::Cancelled));
    assert_eq!(store.count_nodes(None).await.unwrap(), 0);
    assert_eq!(store.count_relationships(None).await.unwrap(), 0);
}

// Identity stability across independent runs and processes (same inputs,
// fresh id factories, fresh stores)
#[tokio::test]
async fn test_entity_ids_stable_across_runs() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.java", "class A\n  method run\n");

    let mut signatures = Vec::new();
    for _ in 0..2 {
        let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let orch = orchestrator(store.clone());
        orch.analyze(dir.path(), repo_ctx("r1", dir.path()), AnalyzeOptions::incremental())
            .await
            .unwrap();
        signatures.push(graph_signature(store.as_ref()).await);
    }
    assert_eq!(signatures[0], signatures[1]);
}
