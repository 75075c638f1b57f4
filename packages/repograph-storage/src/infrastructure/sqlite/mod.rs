//! SQLite adapter for [`GraphStore`].
//!
//! Single-connection store guarded by a mutex: one write transaction at a
//! time, which is exactly the serialization the batching contract requires.
//! Each batch commits with `BEGIN IMMEDIATE` so a failed batch rolls back
//! atomically; listeners fire only after `COMMIT` returns.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, Row, TransactionBehavior};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use repograph_model::{kinds, Node, Relationship, Span};

use crate::domain::{
    BatchConfig, BatchListener, DeleteReport, GraphStore, NodeBatchReport, PropertyFilter,
};
use crate::{Result, StorageError};

/// How many bound variables an id list may use in one statement
const ID_CHUNK: usize = 400;

/// Files-deleted grouping: one transaction per this many paths
const DELETE_GROUP: usize = 50;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    entity_id   TEXT PRIMARY KEY,
    instance_id TEXT NOT NULL,
    kind        TEXT NOT NULL,
    name        TEXT NOT NULL,
    file_path   TEXT NOT NULL DEFAULT '',
    language    TEXT NOT NULL DEFAULT '',
    start_line  INTEGER NOT NULL DEFAULT 0,
    start_col   INTEGER NOT NULL DEFAULT 0,
    end_line    INTEGER NOT NULL DEFAULT 0,
    end_col     INTEGER NOT NULL DEFAULT 0,
    parent_id   TEXT,
    properties  TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);
CREATE INDEX IF NOT EXISTS idx_nodes_file_path ON nodes(file_path);

CREATE TABLE IF NOT EXISTS relationships (
    entity_id   TEXT PRIMARY KEY,
    instance_id TEXT NOT NULL,
    rel_type    TEXT NOT NULL,
    source_id   TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    properties  TEXT,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rels_type ON relationships(rel_type);
CREATE INDEX IF NOT EXISTS idx_rels_source ON relationships(source_id);
CREATE INDEX IF NOT EXISTS idx_rels_target ON relationships(target_id);
";

const UPSERT_NODE: &str = "
INSERT INTO nodes (entity_id, instance_id, kind, name, file_path, language,
                   start_line, start_col, end_line, end_col, parent_id,
                   properties, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(entity_id) DO UPDATE SET
    instance_id = excluded.instance_id,
    kind        = excluded.kind,
    name        = excluded.name,
    file_path   = excluded.file_path,
    language    = excluded.language,
    start_line  = excluded.start_line,
    start_col   = excluded.start_col,
    end_line    = excluded.end_line,
    end_col     = excluded.end_col,
    parent_id   = excluded.parent_id,
    properties  = excluded.properties
";

const UPSERT_RELATIONSHIP: &str = "
INSERT INTO relationships (entity_id, instance_id, rel_type, source_id,
                           target_id, properties, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(entity_id) DO UPDATE SET
    instance_id = excluded.instance_id,
    rel_type    = excluded.rel_type,
    source_id   = excluded.source_id,
    target_id   = excluded.target_id,
    properties  = excluded.properties
";

const SELECT_NODE: &str = "
SELECT entity_id, instance_id, kind, name, file_path, language,
       start_line, start_col, end_line, end_col, parent_id,
       properties, created_at
FROM nodes
";

/// SQLite-backed graph store
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
    config: BatchConfig,
}

impl SqliteGraphStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory store, used by tests and callers that only need a
    /// run-scoped graph
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            config: BatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn batch_config(&self) -> &BatchConfig {
        &self.config
    }

    /// One transaction: upsert a chunk of nodes, distinguishing inserts
    /// from updates of pre-existing entity ids
    fn commit_node_chunk(&self, chunk: &[Node]) -> Result<(usize, usize)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut existing = BTreeSet::new();
        {
            let ids: Vec<&str> = chunk.iter().map(|n| n.entity_id.as_str()).collect();
            for group in ids.chunks(ID_CHUNK) {
                let sql = format!(
                    "SELECT entity_id FROM nodes WHERE entity_id IN ({})",
                    placeholders(group.len())
                );
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(group.iter()), |row| {
                    row.get::<_, String>(0)
                })?;
                for row in rows {
                    existing.insert(row?);
                }
            }
        }

        {
            let mut stmt = tx.prepare_cached(UPSERT_NODE)?;
            for node in chunk {
                let properties = serde_json::to_string(&node.properties)?;
                stmt.execute(params![
                    node.entity_id,
                    node.instance_id,
                    node.kind,
                    node.name,
                    node.file_path,
                    node.language,
                    node.span.start_line,
                    node.span.start_col,
                    node.span.end_line,
                    node.span.end_col,
                    node.parent_id,
                    properties,
                    node.created_at.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;

        let updated = chunk
            .iter()
            .filter(|n| existing.contains(&n.entity_id))
            .count();
        Ok((chunk.len() - updated, updated))
    }

    fn commit_relationship_chunk(&self, chunk: &[Relationship]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_RELATIONSHIP)?;
            for rel in chunk {
                let properties = rel
                    .properties
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                stmt.execute(params![
                    rel.entity_id,
                    rel.instance_id,
                    rel.rel_type,
                    rel.source_id,
                    rel.target_id,
                    properties,
                    rel.created_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Retry a batch commit with exponential backoff before giving up
    async fn retry_batch<T>(&self, what: &str, mut attempt_fn: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            match attempt_fn() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "{} batch commit failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, self.config.max_retries, delay, err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(StorageError::transaction(format!(
                        "{} batch failed after {} attempts: {}",
                        what,
                        attempt + 1,
                        err
                    )));
                }
            }
        }
    }
}

fn placeholders(n: usize) -> String {
    let mut out = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<(Node, String, String)> {
    // Returns the node plus raw properties/created_at for later parsing
    let span = Span::new(
        row.get::<_, i64>(6)? as u32,
        row.get::<_, i64>(7)? as u32,
        row.get::<_, i64>(8)? as u32,
        row.get::<_, i64>(9)? as u32,
    );
    let node = Node {
        entity_id: row.get(0)?,
        instance_id: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        file_path: row.get(4)?,
        language: row.get(5)?,
        span,
        created_at: Utc::now(),
        properties: Map::new(),
        parent_id: row.get(10)?,
    };
    let properties: String = row.get(11)?;
    let created_at: String = row.get(12)?;
    Ok((node, properties, created_at))
}

fn finish_node((mut node, properties, created_at): (Node, String, String)) -> Result<Node> {
    node.properties = serde_json::from_str(&properties)?;
    node.created_at = parse_timestamp(&created_at)?;
    Ok(node)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::serialization(format!("bad timestamp {:?}: {}", raw, e)))
}

fn row_to_relationship(row: &Row<'_>) -> rusqlite::Result<(Relationship, Option<String>, String)> {
    let rel = Relationship {
        entity_id: row.get(0)?,
        instance_id: row.get(1)?,
        rel_type: row.get(2)?,
        source_id: row.get(3)?,
        target_id: row.get(4)?,
        created_at: Utc::now(),
        properties: None,
    };
    let properties: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok((rel, properties, created_at))
}

fn finish_relationship(
    (mut rel, properties, created_at): (Relationship, Option<String>, String),
) -> Result<Relationship> {
    rel.properties = properties.as_deref().map(serde_json::from_str).transpose()?;
    rel.created_at = parse_timestamp(&created_at)?;
    Ok(rel)
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    async fn save_nodes_batch(
        &self,
        nodes: Vec<Node>,
        listener: Option<&dyn BatchListener>,
    ) -> Result<NodeBatchReport> {
        let mut report = NodeBatchReport::default();
        if nodes.is_empty() {
            return Ok(report);
        }

        for (batch_index, chunk) in nodes.chunks(self.config.batch_size).enumerate() {
            let (created, updated) = self
                .retry_batch("node", || self.commit_node_chunk(chunk))
                .await?;

            report.nodes_stored += chunk.len();
            report.nodes_created += created;
            report.nodes_updated += updated;
            report.total_batches += 1;

            // A file travels with the batch holding its File node
            let files_in_batch: Vec<String> = chunk
                .iter()
                .filter(|n| n.kind == kinds::FILE && !n.file_path.is_empty())
                .map(|n| n.file_path.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            debug!(
                "node batch {} committed: {} nodes, {} files",
                batch_index,
                chunk.len(),
                files_in_batch.len()
            );

            if let Some(listener) = listener {
                listener
                    .on_node_batch_complete(batch_index, &files_in_batch, chunk.len())
                    .await;
            }
        }

        Ok(report)
    }

    async fn save_relationships_batch(
        &self,
        rel_type: &str,
        relationships: Vec<Relationship>,
        listener: Option<&dyn BatchListener>,
    ) -> Result<usize> {
        if relationships.is_empty() {
            return Ok(0);
        }

        let mut stored = 0;
        for (batch_index, chunk) in relationships.chunks(self.config.batch_size).enumerate() {
            self.retry_batch("relationship", || self.commit_relationship_chunk(chunk))
                .await?;
            stored += chunk.len();

            debug!(
                "relationship batch {} ({}) committed: {} rows",
                batch_index,
                rel_type,
                chunk.len()
            );

            if let Some(listener) = listener {
                listener
                    .on_relationship_batch_complete(batch_index, rel_type, chunk.len())
                    .await;
            }
        }

        Ok(stored)
    }

    async fn delete_files_and_descendants(
        &self,
        repository_id: &str,
        paths: &[String],
    ) -> Result<DeleteReport> {
        // Paths are absolute, so they are already repository-scoped; the id
        // is only used for logging.
        let mut report = DeleteReport::default();
        if paths.is_empty() {
            return Ok(report);
        }

        let mut conn = self.conn.lock();
        for group in paths.chunks(DELETE_GROUP) {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut doomed: Vec<String> = Vec::new();
            {
                let sql = format!(
                    "SELECT entity_id FROM nodes WHERE file_path IN ({})",
                    placeholders(group.len())
                );
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(group.iter()), |row| {
                    row.get::<_, String>(0)
                })?;
                for row in rows {
                    doomed.push(row?);
                }
            }

            for ids in doomed.chunks(ID_CHUNK) {
                let ph = placeholders(ids.len());
                let sql = format!(
                    "DELETE FROM relationships WHERE source_id IN ({ph}) OR target_id IN ({ph})",
                );
                let mut bound: Vec<&str> = ids.iter().map(String::as_str).collect();
                bound.extend(ids.iter().map(String::as_str));
                report.relationships_deleted +=
                    tx.execute(&sql, params_from_iter(bound.iter()))?;
            }

            {
                let sql = format!(
                    "DELETE FROM nodes WHERE file_path IN ({})",
                    placeholders(group.len())
                );
                report.nodes_deleted += tx.execute(&sql, params_from_iter(group.iter()))?;
            }

            tx.commit()?;
        }

        debug!(
            "deleted {} nodes / {} relationships for {} removed files in {}",
            report.nodes_deleted,
            report.relationships_deleted,
            paths.len(),
            repository_id
        );
        Ok(report)
    }

    async fn get_node(&self, entity_id: &str) -> Result<Option<Node>> {
        let conn = self.conn.lock();
        let sql = format!("{} WHERE entity_id = ?1", SELECT_NODE);
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map(params![entity_id], row_to_node)?;
        match rows.next() {
            Some(row) => Ok(Some(finish_node(row?)?)),
            None => Ok(None),
        }
    }

    async fn find_nodes(&self, kind: &str, filters: &[PropertyFilter]) -> Result<Vec<Node>> {
        let conn = self.conn.lock();

        let mut sql = format!("{} WHERE kind = ?1", SELECT_NODE);
        let mut bound: Vec<String> = vec![kind.to_string()];
        for filter in filters {
            sql.push_str(" AND json_extract(properties, ?) = ?");
            bound.push(format!("$.{}", filter.key));
            bound.push(filter.value.clone());
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), row_to_node)?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(finish_node(row?)?);
        }
        Ok(nodes)
    }

    async fn find_relationships(&self, rel_type: Option<&str>) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        let base = "SELECT entity_id, instance_id, rel_type, source_id, target_id, \
                    properties, created_at FROM relationships";
        let mut out = Vec::new();
        match rel_type {
            Some(t) => {
                let sql = format!("{} WHERE rel_type = ?1", base);
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![t], row_to_relationship)?;
                for row in rows {
                    out.push(finish_relationship(row?)?);
                }
            }
            None => {
                let mut stmt = conn.prepare_cached(base)?;
                let rows = stmt.query_map([], row_to_relationship)?;
                for row in rows {
                    out.push(finish_relationship(row?)?);
                }
            }
        }
        Ok(out)
    }

    async fn merge_node_properties(
        &self,
        updates: Vec<(String, Map<String, Value>)>,
    ) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut merged = 0;
        {
            let mut select = tx.prepare_cached(
                "SELECT properties FROM nodes WHERE entity_id = ?1",
            )?;
            let mut update = tx.prepare_cached(
                "UPDATE nodes SET properties = ?2 WHERE entity_id = ?1",
            )?;
            for (entity_id, extra) in &updates {
                let raw: Option<String> = select
                    .query_map(params![entity_id], |row| row.get(0))?
                    .next()
                    .transpose()?;
                let Some(raw) = raw else {
                    continue;
                };
                let mut properties: Map<String, Value> = serde_json::from_str(&raw)?;
                for (key, value) in extra {
                    properties.insert(key.clone(), value.clone());
                }
                update.execute(params![entity_id, serde_json::to_string(&properties)?])?;
                merged += 1;
            }
        }
        tx.commit()?;
        Ok(merged)
    }

    async fn count_nodes(&self, kind: Option<&str>) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = match kind {
            Some(k) => conn.query_row(
                "SELECT COUNT(*) FROM nodes WHERE kind = ?1",
                params![k],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    async fn count_relationships(&self, rel_type: Option<&str>) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = match rel_type {
            Some(t) => conn.query_row(
                "SELECT COUNT(*) FROM relationships WHERE rel_type = ?1",
                params![t],
                |row| row.get(0),
            )?,
            None => {
                conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?
            }
        };
        Ok(count as usize)
    }
}
