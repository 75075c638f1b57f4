//! Batch-oriented graph storage for repograph.
//!
//! The [`GraphStore`] port groups nodes and relationships into typed
//! batches, commits each batch in one transaction, and fires per-batch
//! completion callbacks synchronously with the commit point — the hook the
//! analysis pipeline's checkpointing hangs off.
//!
//! The SQLite adapter ([`SqliteGraphStore`]) is the bundled backend; any
//! store with transactional batch writes and indexed property lookups can
//! implement the port.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::{
    BatchConfig, BatchListener, DeleteReport, GraphStore, NodeBatchReport, PropertyFilter,
};
pub use error::{ErrorKind, Result, StorageError};
pub use infrastructure::sqlite::SqliteGraphStore;
