//! Parser dispatch (pass 1).
//!
//! Concrete language parsers are external collaborators; this module owns
//! the port they implement, the registry that routes files to them, and the
//! collector that fans parsing out across files and gathers
//! `(nodes, relationships)` under the pass-1 contract:
//!
//! - every file yields exactly one node of kind `File` (synthesized here
//!   when the parser omits it, or when no parser is registered)
//! - a file's `File` node leads its descendants in the output, so the
//!   storage layer can attribute each file to exactly one batch
//! - a single file's parse failure or timeout is logged and skipped; the
//!   pipeline proceeds

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use repograph_model::{
    entity_id, kinds, qualified_name, FileInfo, InstanceIdAllocator, Language, Node, Relationship,
    RepositoryContext,
};

use crate::error::Result;

/// One file's pass-1 output
#[derive(Debug, Clone, Default)]
pub struct SingleFileParseResult {
    pub file_path: String,
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

/// Skippable per-file failure; never carries structural corruption
#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub file_path: String,
    pub reason: String,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.file_path, self.reason)
    }
}

/// Per-language parser port.
///
/// Implementations must be pure with respect to their input `FileInfo`:
/// same file content, same result. Nodes must carry valid `entity_id`,
/// `kind`, `name`, `file_path`, `language` and positional coordinates
/// (1-based lines, 0-based cols, zeros for synthetic nodes), and the
/// qualified name used for id derivation under `properties["qualifiedName"]`
/// so the resolver can index them.
#[async_trait]
pub trait LanguageParser: Send + Sync {
    fn language(&self) -> Language;

    async fn parse_file(
        &self,
        file: &FileInfo,
        ctx: &RepositoryContext,
        ids: &InstanceIdAllocator,
    ) -> std::result::Result<SingleFileParseResult, ParseFailure>;

    /// Cross-file resolution hook (pass 2): given an unresolved qualified
    /// name and the set of exported qualified names, pick a target. The
    /// default is no language-specific rule.
    fn resolve_symbol(
        &self,
        _qualified_name: &str,
        _exports: &HashMap<String, String>,
    ) -> Option<String> {
        None
    }
}

/// Language -> parser routing table
#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<Language, Arc<dyn LanguageParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, parser: Arc<dyn LanguageParser>) {
        self.parsers.insert(parser.language(), parser);
    }

    pub fn get(&self, language: Language) -> Option<Arc<dyn LanguageParser>> {
        self.parsers.get(&language).cloned()
    }

    pub fn for_file(&self, file: &FileInfo) -> Option<(Language, Arc<dyn LanguageParser>)> {
        let language = Language::from_extension(&file.extension)?;
        let parser = self.get(language)?;
        Some((language, parser))
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Concurrent per-file parse tasks
    pub max_concurrency: usize,
    /// Per-file timeout; a timeout counts as a parse failure
    pub file_timeout: Option<Duration>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get(),
            file_timeout: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub files_parsed: usize,
    pub files_failed: usize,
    /// Files with no registered parser; they still yield a `File` node
    pub files_unparsed: usize,
}

/// Combined pass-1 output
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub all_nodes: Vec<Node>,
    pub all_relationships: Vec<Relationship>,
    pub stats: ParseStats,
}

/// Fans files out to parsers and collects results keyed by path
pub struct ParseCollector {
    registry: Arc<ParserRegistry>,
    config: ParserConfig,
}

impl ParseCollector {
    pub fn new(registry: Arc<ParserRegistry>, config: ParserConfig) -> Self {
        Self { registry, config }
    }

    pub async fn parse_files(
        &self,
        files: &[FileInfo],
        ctx: &RepositoryContext,
        ids: &InstanceIdAllocator,
        cancel: &CancellationToken,
    ) -> Result<ParseOutput> {
        // Per-file result slots keyed by path: no contention between tasks
        let results: DashMap<String, (SingleFileParseResult, FileOutcome)> = DashMap::new();

        stream::iter(files)
            .for_each_concurrent(self.config.max_concurrency, |file| {
                let results = &results;
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let (result, outcome) = self.parse_one(file, ctx, ids).await;
                    results.insert(file.path_key(), (result, outcome));
                }
            })
            .await;

        let mut output = ParseOutput::default();
        // Deterministic assembly order, file by file
        let mut keys: Vec<String> = results.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        for key in keys {
            let Some((_, (result, outcome))) = results.remove(&key) else {
                continue;
            };
            match outcome {
                FileOutcome::Parsed => output.stats.files_parsed += 1,
                FileOutcome::Failed => output.stats.files_failed += 1,
                FileOutcome::Unparsed => output.stats.files_unparsed += 1,
            }
            output.all_nodes.extend(result.nodes);
            output.all_relationships.extend(result.relationships);
        }
        Ok(output)
    }

    async fn parse_one(
        &self,
        file: &FileInfo,
        ctx: &RepositoryContext,
        ids: &InstanceIdAllocator,
    ) -> (SingleFileParseResult, FileOutcome) {
        let Some((language, parser)) = self.registry.for_file(file) else {
            debug!("no parser for {}, file node only", file.relative_path);
            return (
                SingleFileParseResult {
                    file_path: file.path_key(),
                    nodes: vec![synthesize_file_node(file, ctx, ids, None)],
                    relationships: Vec::new(),
                },
                FileOutcome::Unparsed,
            );
        };

        let parsed = match self.config.file_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, parser.parse_file(file, ctx, ids)).await {
                    Ok(result) => result,
                    Err(_) => Err(ParseFailure {
                        file_path: file.path_key(),
                        reason: format!("parser timed out after {:?}", timeout),
                    }),
                }
            }
            None => parser.parse_file(file, ctx, ids).await,
        };

        match parsed {
            Ok(result) => (
                normalize_result(result, file, ctx, ids, language),
                FileOutcome::Parsed,
            ),
            Err(failure) => {
                warn!("parse failed, skipping file: {}", failure);
                (
                    SingleFileParseResult {
                        file_path: file.path_key(),
                        nodes: vec![synthesize_file_node(file, ctx, ids, Some(language))],
                        relationships: Vec::new(),
                    },
                    FileOutcome::Failed,
                )
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FileOutcome {
    Parsed,
    Failed,
    Unparsed,
}

/// Deterministic `File` node for a scanned file
pub fn synthesize_file_node(
    file: &FileInfo,
    ctx: &RepositoryContext,
    ids: &InstanceIdAllocator,
    language: Option<Language>,
) -> Node {
    let qn = qualified_name(&ctx.repository_id, &file.relative_path, "");
    let mut builder = Node::builder(kinds::FILE, &file.relative_path)
        .entity_id(entity_id(kinds::FILE, &qn))
        .instance_id(ids.next(kinds::FILE, &file.relative_path))
        .file_path(file.path_key())
        .language(language.map(|l| l.name()).unwrap_or(""))
        .property("qualifiedName", json!(qn))
        .property("repositoryId", json!(ctx.repository_id))
        .property("relativePath", json!(file.relative_path))
        .property("extension", json!(file.extension))
        .property("size", json!(file.size))
        .property("sourceType", json!(file.source_type.as_str()));
    if let Some(hash) = &file.content_hash {
        builder = builder.property("contentHash", json!(hash));
    }
    if let Some(module) = &file.module_name {
        builder = builder.property("moduleName", json!(module));
    }
    builder.build()
}

/// Enforce the pass-1 contract on a parser's raw output
fn normalize_result(
    mut result: SingleFileParseResult,
    file: &FileInfo,
    ctx: &RepositoryContext,
    ids: &InstanceIdAllocator,
    language: Language,
) -> SingleFileParseResult {
    if result.file_path.is_empty() {
        result.file_path = file.path_key();
    }
    for node in result.nodes.iter_mut() {
        if node.file_path.is_empty() {
            node.file_path = file.path_key();
        }
        if node.language.is_empty() {
            node.language = language.name().to_string();
        }
    }

    // Exactly one File node, leading its descendants
    let file_positions: Vec<usize> = result
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.kind == kinds::FILE)
        .map(|(i, _)| i)
        .collect();
    match file_positions.first() {
        None => {
            let file_node = synthesize_file_node(file, ctx, ids, Some(language));
            result.nodes.insert(0, file_node);
        }
        Some(&first) => {
            if file_positions.len() > 1 {
                warn!(
                    "{}: parser emitted {} File nodes, keeping the first",
                    file.relative_path,
                    file_positions.len()
                );
                for &idx in file_positions.iter().skip(1).rev() {
                    result.nodes.remove(idx);
                }
            }
            if first != 0 {
                let file_node = result.nodes.remove(first);
                result.nodes.insert(0, file_node);
            }
        }
    }

    result
}
