//! Relations: typed edges between canonical entities

use super::entity::CanonicalId;
use super::value::Properties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// UUID v5 namespace for relation ids
const RELATION_NS: Uuid = Uuid::from_bytes([
    0x8a, 0x27, 0xc1, 0x04, 0x6e, 0xd3, 0x4f, 0x95, 0xb0, 0x1d, 0x5f, 0x42, 0x77, 0xe9, 0x0b, 0x3c,
]);

/// Identifier of a relation, derived from its type and endpoints
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(String);

impl RelationId {
    /// Same (type, source, target) always yields the same id, which is what
    /// makes duplicate edges merge.
    pub fn mint(type_name: &str, source: &CanonicalId, target: &CanonicalId) -> Self {
        let key = format!("{}\u{1f}{}\u{1f}{}", type_name, source, target);
        let uuid = Uuid::new_v5(&RELATION_NS, key.as_bytes());
        Self(format!("{}:{}", type_name, uuid))
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed, typed relation between two canonical entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub source_entity: CanonicalId,
    pub target_entity: CanonicalId,
    /// Ontology edge type name (e.g., "has_member", "interacts_with")
    pub type_name: String,
    pub properties: Properties,
    pub provenance: Vec<String>,
    #[serde(default)]
    pub property_sources: BTreeMap<String, String>,
}

impl Relation {
    pub fn new(source: CanonicalId, target: CanonicalId, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            id: RelationId::mint(&type_name, &source, &target),
            source_entity: source,
            target_entity: target,
            type_name,
            properties: Properties::new(),
            provenance: Vec::new(),
            property_sources: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        if !self.provenance.contains(&source) {
            self.provenance.push(source);
        }
        self
    }

    pub fn with_properties(mut self, properties: Properties, source: &str) -> Self {
        for key in properties.keys() {
            self.property_sources.insert(key.clone(), source.to_string());
        }
        self.properties = properties;
        self
    }
}
