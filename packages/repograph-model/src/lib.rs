//! Core data model for the repograph property graph.
//!
//! Everything the pipeline produces is expressed with two value records:
//!
//! - [`Node`]: an entity (file, class, method, module, dependency, ...)
//!   discriminated by an open `kind` string tag
//! - [`Relationship`]: a typed edge carrying two entity ids
//!
//! Nodes never point at each other; cycles in the code graph (mutual calls,
//! supertype chains) are represented purely through id references, and any
//! traversal builds its own `entity_id -> &Node` index over a flat buffer.
//!
//! Identity comes in two flavors:
//!
//! - `entity_id`: deterministic digest of `(kind, qualified name)`, stable
//!   across runs, processes and machines ([`ids::entity_id`])
//! - `instance_id`: unique within one analysis run, never used as a
//!   persistent key ([`ids::InstanceIdAllocator`])

pub mod file_info;
pub mod ids;
pub mod language;
pub mod node;
pub mod relationship;
pub mod repo;
pub mod span;

pub use file_info::{FileInfo, SourceType};
pub use ids::{
    dependency_qualified_name, entity_id, module_qualified_name, qualified_name,
    InstanceIdAllocator,
};
pub use language::Language;
pub use node::{Node, NodeBuilder};
pub use relationship::Relationship;
pub use repo::RepositoryContext;
pub use span::Span;

/// Well-known node kinds. `Node.kind` is an open tag; these constants cover
/// the kinds the pipeline itself creates or queries.
pub mod kinds {
    pub const FILE: &str = "File";
    pub const REPOSITORY: &str = "Repository";
    pub const MODULE: &str = "Module";
    pub const EXTERNAL_DEPENDENCY: &str = "ExternalDependency";
    pub const INDEX_STATE: &str = "IndexState";
    pub const ANALYSIS_CHECKPOINT: &str = "AnalysisCheckpoint";
}

/// Well-known relationship types created by the pipeline itself. Parsers may
/// emit any other type tag (`CALLS`, `IMPORTS`, `EXTENDS`, ...).
pub mod rel_types {
    pub const BELONGS_TO: &str = "BELONGS_TO";
    pub const HAS_MODULE: &str = "HAS_MODULE";
    pub const CONTAINS_FILE: &str = "CONTAINS_FILE";
    pub const DEPENDS_ON_MODULE: &str = "DEPENDS_ON_MODULE";
    pub const DEFINED_IN_MODULE: &str = "DEFINED_IN_MODULE";
    pub const HAS_DEPENDENCY: &str = "HAS_DEPENDENCY";
    pub const CALLS: &str = "CALLS";
}
