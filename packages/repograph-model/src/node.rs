//! Graph node record.
//!
//! A single record with an open `kind` tag replaces per-kind node types;
//! the pipeline never switches on concrete subtypes. Kind-specific data
//! lives in the untyped `properties` map, validated where the node is
//! constructed rather than at storage time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::span::Span;

/// A graph entity: file, class, method, module, dependency, endpoint, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Deterministic identity, stable across runs ([`crate::ids::entity_id`])
    pub entity_id: String,
    /// Per-run identity, never a persistent key
    pub instance_id: String,
    /// Open discriminator tag (`File`, `Class`, `Method`, ...)
    pub kind: String,
    pub name: String,
    /// Absolute path of the source file this entity belongs to; empty for
    /// synthetic entities (repository, module, external dependency)
    pub file_path: String,
    pub language: String,
    pub span: Span,
    pub created_at: DateTime<Utc>,
    /// Kind-specific payload
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Containing entity, when the parser knows it
    pub parent_id: Option<String>,
}

impl Node {
    pub fn builder(kind: impl Into<String>, name: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(kind, name)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }
}

/// Builder for [`Node`]
///
/// `entity_id` and `instance_id` are required; everything else defaults to
/// empty (synthetic node with a zero span).
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    entity_id: String,
    instance_id: String,
    kind: String,
    name: String,
    file_path: String,
    language: String,
    span: Span,
    properties: Map<String, Value>,
    parent_id: Option<String>,
}

impl NodeBuilder {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_id: String::new(),
            instance_id: String::new(),
            kind: kind.into(),
            name: name.into(),
            file_path: String::new(),
            language: String::new(),
            span: Span::zero(),
            properties: Map::new(),
            parent_id: None,
        }
    }

    pub fn entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = id.into();
        self
    }

    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    pub fn file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = path.into();
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn parent_id(mut self, id: impl Into<String>) -> Self {
        self.parent_id = Some(id.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Node {
        debug_assert!(!self.entity_id.is_empty(), "node without entity_id");
        Node {
            entity_id: self.entity_id,
            instance_id: self.instance_id,
            kind: self.kind,
            name: self.name,
            file_path: self.file_path,
            language: self.language,
            span: self.span,
            created_at: Utc::now(),
            properties: self.properties,
            parent_id: self.parent_id,
        }
    }
}
