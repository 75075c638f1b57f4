//! Domain layer: the graph store port.
//!
//! # Batching contract
//!
//! Writes are buffered into fixed-size batches; each batch commits in one
//! transaction (all rows or none). Nodes must be committed before any
//! relationship referencing them, and relationships are committed grouped
//! by type. Identity is `entity_id`: committing an existing id updates
//! mutable properties, never clones.
//!
//! After a batch commits durably, the listener fires *before* the next
//! batch's transaction begins. That synchrony is what makes checkpoints
//! written from the listener safe: a checkpoint can never claim files whose
//! batch has not committed.
//!
//! # Port Trait
//!
//! - [`GraphStore`]: transactional batch writes plus the indexed reads the
//!   checkpoint and index-state managers need
//!
//! # Implementations
//!
//! - [`crate::infrastructure::sqlite::SqliteGraphStore`]

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use repograph_model::{Node, Relationship};

use crate::Result;

/// Batch writer configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Rows per transaction
    pub batch_size: usize,
    /// Retry attempts for a failed batch commit before the error propagates
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries
    pub retry_base_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Report for a node batch-write call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeBatchReport {
    /// Rows written (created + updated)
    pub nodes_stored: usize,
    /// Entity ids that did not exist before this call
    pub nodes_created: usize,
    /// Entity ids that already existed and were upserted
    pub nodes_updated: usize,
    /// Number of transactions committed
    pub total_batches: usize,
}

impl NodeBatchReport {
    pub fn merge(&mut self, other: &NodeBatchReport) {
        self.nodes_stored += other.nodes_stored;
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.total_batches += other.total_batches;
    }
}

/// Report for a delete call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub nodes_deleted: usize,
    pub relationships_deleted: usize,
}

/// Per-batch completion callbacks.
///
/// Invoked synchronously with respect to the commit point: only after the
/// transaction has durably committed, and awaited before the next batch
/// begins. Relationship batches are file-neutral progress; `files_in_batch`
/// is only meaningful for node batches.
#[async_trait]
pub trait BatchListener: Send + Sync {
    /// `files_in_batch`: absolute paths of files whose `File` node is in
    /// this batch. A file whose descendants span batches is reported with
    /// the batch containing its `File` node, at most once.
    async fn on_node_batch_complete(
        &self,
        batch_index: usize,
        files_in_batch: &[String],
        nodes_in_batch: usize,
    );

    async fn on_relationship_batch_complete(
        &self,
        batch_index: usize,
        rel_type: &str,
        count: usize,
    );
}

/// Property equality filter for [`GraphStore::find_nodes`].
///
/// Matches against the node's `properties` map by string equality.
#[derive(Debug, Clone)]
pub struct PropertyFilter {
    pub key: String,
    pub value: String,
}

impl PropertyFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Graph storage abstraction.
///
/// Backend-agnostic contract: upsert by `entity_id` with transactional
/// batches, delete by file path, and indexed property reads.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create schema/indexes; idempotent
    async fn initialize(&self) -> Result<()>;

    /// Rows per transaction this store commits; callers that need
    /// cancellation between batches feed work in chunks of this size
    fn batch_size(&self) -> usize;

    /// Split `nodes` into batches and commit each in one transaction,
    /// firing `listener` after every commit.
    ///
    /// Callers pack nodes file-by-file with the `File` node leading its
    /// descendants so batch/file attribution stays exact.
    async fn save_nodes_batch(
        &self,
        nodes: Vec<Node>,
        listener: Option<&dyn BatchListener>,
    ) -> Result<NodeBatchReport>;

    /// Commit relationships of a single type in batches.
    ///
    /// Returns the number of relationships stored.
    async fn save_relationships_batch(
        &self,
        rel_type: &str,
        relationships: Vec<Relationship>,
        listener: Option<&dyn BatchListener>,
    ) -> Result<usize>;

    /// Delete every node whose `file_path` is in `paths` (File nodes and
    /// descendants alike) and all edges incident to those nodes.
    async fn delete_files_and_descendants(
        &self,
        repository_id: &str,
        paths: &[String],
    ) -> Result<DeleteReport>;

    /// Fetch a node by its entity id
    async fn get_node(&self, entity_id: &str) -> Result<Option<Node>>;

    /// Indexed lookup: nodes of `kind` whose properties match every filter
    async fn find_nodes(&self, kind: &str, filters: &[PropertyFilter]) -> Result<Vec<Node>>;

    /// All relationships of a type (`None` = all types)
    async fn find_relationships(&self, rel_type: Option<&str>) -> Result<Vec<Relationship>>;

    /// Merge property maps into existing nodes (analytics write-back).
    /// Unknown entity ids are skipped; returns the number updated.
    async fn merge_node_properties(
        &self,
        updates: Vec<(String, Map<String, Value>)>,
    ) -> Result<usize>;

    /// Node count, optionally restricted to one kind
    async fn count_nodes(&self, kind: Option<&str>) -> Result<usize>;

    /// Relationship count, optionally restricted to one type
    async fn count_relationships(&self, rel_type: Option<&str>) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_config_default() {
        let config = BatchConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_node_batch_report_merge() {
        let mut a = NodeBatchReport {
            nodes_stored: 10,
            nodes_created: 8,
            nodes_updated: 2,
            total_batches: 1,
        };
        let b = NodeBatchReport {
            nodes_stored: 5,
            nodes_created: 0,
            nodes_updated: 5,
            total_batches: 1,
        };
        a.merge(&b);
        assert_eq!(a.nodes_stored, 15);
        assert_eq!(a.nodes_created, 8);
        assert_eq!(a.nodes_updated, 7);
        assert_eq!(a.total_batches, 2);
    }

    #[test]
    fn test_property_filter() {
        let f = PropertyFilter::eq("status", "running");
        assert_eq!(f.key, "status");
        assert_eq!(f.value, "running");
    }
}
