//! Identity generation.
//!
//! Two id spaces with different guarantees:
//!
//! - [`entity_id`] is the persistent key of every node and relationship.
//!   It is a pure function of `(kind, qualified_name)` so re-parsing an
//!   unchanged file re-derives the same entities on any machine.
//! - [`InstanceIdAllocator`] hands out per-run ids for tracing a single
//!   analysis. They are never stored as keys.
//!
//! Qualified names incorporate the repository id and file path, so the same
//! symbol in two repositories yields two distinct entities:
//! `repository_id:relative_path:symbol_path` (symbol path empty for the
//! file itself).

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Separator between kind and qualified name inside the digest input.
/// A non-printable byte so no qualified name can collide across kinds.
const KIND_SEPARATOR: u8 = 0x1f;

/// Hex length of an entity id (128 bits of a SHA-256 digest)
const ENTITY_ID_LEN: usize = 32;

/// Deterministic entity id for `(kind, qualified_name)`.
///
/// Byte-identical across runs, processes and machines. Collisions are
/// treated as programming errors; qualified-name construction must
/// guarantee uniqueness.
pub fn entity_id(kind: &str, qualified_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([KIND_SEPARATOR]);
    hasher.update(qualified_name.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(ENTITY_ID_LEN);
    for byte in digest.iter().take(ENTITY_ID_LEN / 2) {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Qualified name for a symbol inside a file.
///
/// `symbol_path` is the dot-joined ancestor chain within the file; pass an
/// empty string for the `File` node itself.
pub fn qualified_name(repository_id: &str, relative_path: &str, symbol_path: &str) -> String {
    if symbol_path.is_empty() {
        format!("{}:{}", repository_id, relative_path)
    } else {
        format!("{}:{}:{}", repository_id, relative_path, symbol_path)
    }
}

/// Qualified name for a module entity
pub fn module_qualified_name(repository_id: &str, module_name: &str) -> String {
    format!("{}:module:{}", repository_id, module_name)
}

/// Qualified name for an external dependency, global across repositories so
/// the same coordinate deduplicates to one node
pub fn dependency_qualified_name(group: &str, artifact: &str, version: &str) -> String {
    format!("dep:{}:{}:{}", group, artifact, version)
}

/// Per-run instance id allocator.
///
/// Unique within one analysis run; a fresh allocator binds a new run uuid,
/// so ids never repeat across runs either. No global state: the allocator
/// is created by the orchestrator and passed down explicitly.
#[derive(Debug)]
pub struct InstanceIdAllocator {
    run_id: String,
    counter: AtomicU64,
}

impl InstanceIdAllocator {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().simple().to_string(),
            counter: AtomicU64::new(0),
        }
    }

    /// Run identifier this allocator is bound to
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Next instance id, e.g. `a3f1...-42-Method-parse`
    pub fn next(&self, kind: &str, name: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}-{}", self.run_id, n, kind, sanitize(name))
    }

    /// How many ids have been handed out
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for InstanceIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .take(48)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_deterministic() {
        let a = entity_id("Method", "repo:src/App.java:App.run");
        let b = entity_id("Method", "repo:src/App.java:App.run");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_entity_id_kind_separation() {
        // Same qualified name under a different kind is a different entity
        let a = entity_id("Class", "repo:src/App.java:App");
        let b = entity_id("Field", "repo:src/App.java:App");
        assert_ne!(a, b);
    }

    #[test]
    fn test_entity_id_no_concat_ambiguity() {
        // "Clas" + "sApp..." must not collide with "Class" + "App..."
        let a = entity_id("Clas", "sX:y");
        let b = entity_id("Class", "X:y");
        assert_ne!(a, b);
    }

    #[test]
    fn test_qualified_name_shapes() {
        assert_eq!(qualified_name("r1", "src/a.java", ""), "r1:src/a.java");
        assert_eq!(
            qualified_name("r1", "src/a.java", "A.run"),
            "r1:src/a.java:A.run"
        );
        assert_eq!(module_qualified_name("r1", "core"), "r1:module:core");
        assert_eq!(
            dependency_qualified_name("g", "a", "1.0"),
            "dep:g:a:1.0"
        );
    }

    #[test]
    fn test_repositories_do_not_share_entities() {
        let a = entity_id("File", &qualified_name("r1", "src/a.java", ""));
        let b = entity_id("File", &qualified_name("r2", "src/a.java", ""));
        assert_ne!(a, b);
    }

    #[test]
    fn test_instance_ids_unique_within_run() {
        let alloc = InstanceIdAllocator::new();
        let a = alloc.next("Method", "run");
        let b = alloc.next("Method", "run");
        assert_ne!(a, b);
        assert_eq!(alloc.issued(), 2);
    }

    #[test]
    fn test_instance_ids_unique_across_allocators() {
        let a = InstanceIdAllocator::new().next("File", "a.java");
        let b = InstanceIdAllocator::new().next("File", "a.java");
        assert_ne!(a, b);
    }
}
