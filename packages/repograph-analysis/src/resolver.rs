//! Relationship resolution (pass 2).
//!
//! Builds a read-only index over the pass-1 nodes, then walks the pass-1
//! relationships resolving unresolved targets. Single-threaded: the index
//! is built once, then only read.
//!
//! Resolution ladder, in order:
//! 1. already-resolved target id present in the run or assumed in the store
//! 2. qualified-name lookup within the source node's file
//! 3. cross-file qualified-name lookup, then language-specific rules from
//!    the parser, then an unambiguous simple-name match
//! 4. otherwise the relationship is dropped, never emitted

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use repograph_model::{kinds, Language, Node, Relationship};

use crate::parser::ParserRegistry;

/// Read-only index over pass-1 nodes.
///
/// Nodes stay in the flat pipeline buffer; the index holds ids only, so
/// cyclic references in the graph never become owning cycles here.
pub struct NodeIndex {
    ids: HashMap<String, NodeMeta>,
    /// (file_path, qualified name) -> entity id
    by_file_and_qn: HashMap<(String, String), String>,
    /// qualified name -> entity id (all files)
    by_qualified_name: HashMap<String, String>,
    /// simple name -> entity ids (for the last-resort match)
    by_simple_name: HashMap<String, Vec<String>>,
}

struct NodeMeta {
    file_path: String,
    language: Option<Language>,
}

impl NodeIndex {
    pub fn build(nodes: &[Node]) -> Self {
        let mut index = Self {
            ids: HashMap::with_capacity(nodes.len()),
            by_file_and_qn: HashMap::with_capacity(nodes.len()),
            by_qualified_name: HashMap::with_capacity(nodes.len()),
            by_simple_name: HashMap::new(),
        };
        for node in nodes {
            index.ids.insert(
                node.entity_id.clone(),
                NodeMeta {
                    file_path: node.file_path.clone(),
                    language: Language::from_extension(
                        node.file_path.rsplit('.').next().unwrap_or(""),
                    )
                    .or_else(|| language_by_name(&node.language)),
                },
            );
            if let Some(qn) = node.property_str("qualifiedName") {
                index
                    .by_file_and_qn
                    .insert((node.file_path.clone(), qn.to_string()), node.entity_id.clone());
                index
                    .by_qualified_name
                    .insert(qn.to_string(), node.entity_id.clone());
            }
            if node.kind != kinds::FILE {
                index
                    .by_simple_name
                    .entry(node.name.clone())
                    .or_default()
                    .push(node.entity_id.clone());
            }
        }
        index
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.ids.contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn file_of(&self, entity_id: &str) -> Option<&str> {
        self.ids.get(entity_id).map(|m| m.file_path.as_str())
    }

    fn language_of(&self, entity_id: &str) -> Option<Language> {
        self.ids.get(entity_id).and_then(|m| m.language)
    }

    /// Exported qualified names, for the parser resolution hook
    fn exports(&self) -> &HashMap<String, String> {
        &self.by_qualified_name
    }
}

fn language_by_name(name: &str) -> Option<Language> {
    match name {
        "c" => Some(Language::C),
        "cpp" => Some(Language::Cpp),
        "java" => Some(Language::Java),
        "go" => Some(Language::Go),
        "csharp" => Some(Language::CSharp),
        "typescript" => Some(Language::TypeScript),
        "javascript" => Some(Language::JavaScript),
        "python" => Some(Language::Python),
        "jsp" => Some(Language::Jsp),
        "xml" => Some(Language::Xml),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    /// Relationships that arrived resolved and were kept
    pub passthrough: usize,
    /// Unresolved references resolved to a target
    pub resolved: usize,
    /// References with no resolvable target, dropped
    pub dropped: usize,
    /// Duplicate relationship ids collapsed (last writer wins)
    pub deduplicated: usize,
}

/// Second-pass resolver
pub struct RelationshipResolver {
    registry: Arc<ParserRegistry>,
}

impl RelationshipResolver {
    pub fn new(registry: Arc<ParserRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve, drop misses, and deduplicate by relationship `entity_id`
    pub fn resolve(
        &self,
        nodes: &[Node],
        relationships: Vec<Relationship>,
    ) -> (Vec<Relationship>, ResolutionStats) {
        let index = NodeIndex::build(nodes);
        let mut stats = ResolutionStats::default();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut out: Vec<Relationship> = Vec::with_capacity(relationships.len());

        for mut rel in relationships {
            if rel.is_resolved() {
                stats.passthrough += 1;
            } else {
                match self.resolve_target(&rel, &index) {
                    Some(target) => {
                        rel.resolve_target(target);
                        stats.resolved += 1;
                    }
                    None => {
                        debug!(
                            "dropping unresolvable {} from {} -> {:?}",
                            rel.rel_type,
                            rel.source_id,
                            rel.target_qualified_name()
                        );
                        stats.dropped += 1;
                        continue;
                    }
                }
            }

            match seen.get(&rel.entity_id) {
                Some(&at) => {
                    stats.deduplicated += 1;
                    out[at] = rel;
                }
                None => {
                    seen.insert(rel.entity_id.clone(), out.len());
                    out.push(rel);
                }
            }
        }

        (out, stats)
    }

    fn resolve_target(&self, rel: &Relationship, index: &NodeIndex) -> Option<String> {
        let qn = rel.target_qualified_name()?;

        // Same-file symbol
        if let Some(source_file) = index.file_of(&rel.source_id) {
            if let Some(id) = index
                .by_file_and_qn
                .get(&(source_file.to_string(), qn.to_string()))
            {
                return Some(id.clone());
            }
        }

        // Cross-file: exact qualified name
        if let Some(id) = index.by_qualified_name.get(qn) {
            return Some(id.clone());
        }

        // Cross-file: language-specific rules from the source's parser
        if let Some(language) = index.language_of(&rel.source_id) {
            if let Some(parser) = self.registry.get(language) {
                if let Some(id) = parser.resolve_symbol(qn, index.exports()) {
                    if index.contains(&id) {
                        return Some(id);
                    }
                }
            }
        }

        // Last resort: unambiguous simple name
        let simple = qn.rsplit(['.', ':']).next().unwrap_or(qn);
        match index.by_simple_name.get(simple).map(Vec::as_slice) {
            Some([only]) => Some(only.clone()),
            _ => None,
        }
    }
}
