//! Canonical entities: the deduplicated nodes of the harmonized graph

use super::value::Properties;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// UUID v5 namespace for canonical entity ids
const ENTITY_NS: Uuid = Uuid::from_bytes([
    0x3d, 0x0e, 0x5a, 0x9c, 0x41, 0x7f, 0x4b, 0x2e, 0x9a, 0x61, 0x0c, 0x52, 0xd8, 0x7e, 0x13, 0xa4,
]);

/// Stable, type-prefixed identifier of a canonical entity
///
/// Serializes as a plain string like `Protein:5b1f...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Mint an id from a type name and a set of identifier strings.
    ///
    /// The identifiers are sorted and deduplicated first, so the same set
    /// yields the same id in any order, in any process.
    pub fn mint<'a>(type_name: &str, identifiers: impl IntoIterator<Item = &'a str>) -> Self {
        let sorted: BTreeSet<&str> = identifiers.into_iter().collect();
        let mut key = String::from(type_name);
        for id in sorted {
            key.push('\u{1f}');
            key.push_str(id);
        }
        let uuid = Uuid::new_v5(&ENTITY_NS, key.as_bytes());
        Self(format!("{}:{}", type_name, uuid))
    }

    /// Wrap an existing id string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single deduplicated representation of one real-world object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub canonical_id: CanonicalId,
    /// Ontology node type name
    pub type_name: String,
    pub properties: Properties,
    /// External identifier strings mapped onto this entity
    pub aliases: BTreeSet<String>,
    /// Contributing sources, in first-contribution order
    pub provenance: Vec<String>,
    /// Source that supplied each property's current value
    #[serde(default)]
    pub property_sources: BTreeMap<String, String>,
}

impl CanonicalEntity {
    pub fn new(canonical_id: CanonicalId, type_name: impl Into<String>) -> Self {
        Self {
            canonical_id,
            type_name: type_name.into(),
            properties: Properties::new(),
            aliases: BTreeSet::new(),
            provenance: Vec::new(),
            property_sources: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        if !self.provenance.contains(&source) {
            self.provenance.push(source);
        }
        self
    }

    /// Set every property's origin to the given source.
    pub fn with_properties(mut self, properties: Properties, source: &str) -> Self {
        for key in properties.keys() {
            self.property_sources.insert(key.clone(), source.to_string());
        }
        self.properties = properties;
        self
    }
}
