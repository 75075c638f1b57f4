//! Graph relationship record.
//!
//! Plain value record carrying two entity ids; never an owning pointer.
//! Pass-1 parsers may emit relationships whose target is not yet known:
//! those carry an empty `target_id` and the target's qualified name under
//! `properties["targetQualifiedName"]` for the resolver to fill in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property key holding the unresolved target's qualified name
pub const TARGET_QUALIFIED_NAME: &str = "targetQualifiedName";

/// A typed edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Deterministic identity: digest of `(rel_type, source:target)`
    pub entity_id: String,
    /// Per-run identity
    pub instance_id: String,
    /// Open type tag (`CALLS`, `IMPORTS`, `EXTENDS`, `BELONGS_TO`, ...)
    pub rel_type: String,
    pub source_id: String,
    /// Empty until resolved for pass-1 references
    pub target_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
}

impl Relationship {
    /// Resolved relationship between two known entities
    pub fn new(
        rel_type: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        let rel_type = rel_type.into();
        let source_id = source_id.into();
        let target_id = target_id.into();
        let entity_id = crate::ids::entity_id(
            &rel_type,
            &format!("{}:{}", source_id, target_id),
        );
        Self {
            entity_id,
            instance_id: instance_id.into(),
            rel_type,
            source_id,
            target_id,
            created_at: Utc::now(),
            properties: None,
        }
    }

    /// Pass-1 relationship whose target is only known by qualified name
    pub fn unresolved(
        rel_type: impl Into<String>,
        source_id: impl Into<String>,
        target_qualified_name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        let rel_type = rel_type.into();
        let source_id = source_id.into();
        let target_qn = target_qualified_name.into();
        // Identity is derived from the reference itself so the same
        // unresolved reference dedups before and after resolution.
        let entity_id =
            crate::ids::entity_id(&rel_type, &format!("{}:?{}", source_id, target_qn));
        let mut properties = Map::new();
        properties.insert(TARGET_QUALIFIED_NAME.to_string(), Value::String(target_qn));
        Self {
            entity_id,
            instance_id: instance_id.into(),
            rel_type,
            source_id,
            target_id: String::new(),
            created_at: Utc::now(),
            properties: Some(properties),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn is_resolved(&self) -> bool {
        !self.target_id.is_empty()
    }

    /// Qualified name of the unresolved target, if any
    pub fn target_qualified_name(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.get(TARGET_QUALIFIED_NAME))
            .and_then(Value::as_str)
    }

    /// Resolve the target in place, keeping the original entity id so
    /// duplicate references collapse regardless of resolution order
    pub fn resolve_target(&mut self, target_id: impl Into<String>) {
        self.target_id = target_id.into();
        if let Some(props) = self.properties.as_mut() {
            props.remove(TARGET_QUALIFIED_NAME);
            if props.is_empty() {
                self.properties = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_relationship() {
        let rel = Relationship::new("CALLS", "src", "dst", "i1");
        assert!(rel.is_resolved());
        assert_eq!(rel.rel_type, "CALLS");
        assert!(rel.target_qualified_name().is_none());
    }

    #[test]
    fn test_identity_deterministic() {
        let a = Relationship::new("CALLS", "src", "dst", "i1");
        let b = Relationship::new("CALLS", "src", "dst", "i2");
        assert_eq!(a.entity_id, b.entity_id);
    }

    #[test]
    fn test_identity_varies_by_type() {
        let a = Relationship::new("CALLS", "src", "dst", "i1");
        let b = Relationship::new("IMPORTS", "src", "dst", "i1");
        assert_ne!(a.entity_id, b.entity_id);
    }

    #[test]
    fn test_unresolved_then_resolve() {
        let mut rel = Relationship::unresolved("EXTENDS", "src", "r1:a.java:Base", "i1");
        assert!(!rel.is_resolved());
        assert_eq!(rel.target_qualified_name(), Some("r1:a.java:Base"));

        rel.resolve_target("target-entity");
        assert!(rel.is_resolved());
        assert!(rel.target_qualified_name().is_none());
        assert!(rel.properties.is_none());
    }

    #[test]
    fn test_serde_roundtrip() {
        let rel = Relationship::unresolved("IMPORTS", "src", "r1:b.java", "i1");
        let json = serde_json::to_string(&rel).unwrap();
        let back: Relationship = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rel);
    }
}
