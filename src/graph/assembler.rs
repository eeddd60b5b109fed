//! GraphAssembler: the running canonical graph
//!
//! Merge rules for an insertion whose id already exists:
//! - aliases: union
//! - provenance: append sources not yet listed
//! - scalar properties: first writer wins; a differing later value is
//!   recorded in the conflict log and dropped
//! - array properties: set union
//!
//! Relations merge the same way, keyed by (type, source, target).

use super::entity::{CanonicalEntity, CanonicalId};
use super::relation::{Relation, RelationId};
use super::value::{union, Properties, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Two sources supplied different scalar values for the same property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConflict {
    /// Canonical id or relation id
    pub subject: String,
    pub property: String,
    pub kept_value: PropertyValue,
    pub kept_source: String,
    pub rejected_value: PropertyValue,
    pub rejected_source: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum AssemblyError {
    #[error("relation {relation} references missing entity {missing}")]
    DanglingReference {
        relation: RelationId,
        missing: CanonicalId,
    },

    #[error("entity {id} is a {existing}, cannot merge a {incoming} into it")]
    TypeMismatch {
        id: CanonicalId,
        existing: String,
        incoming: String,
    },
}

/// What an insertion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Merged { conflicts: usize },
}

/// Accumulates canonical entities and relations across all source runs.
#[derive(Debug, Clone, Default)]
pub struct GraphAssembler {
    entities: BTreeMap<CanonicalId, CanonicalEntity>,
    relations: BTreeMap<RelationId, Relation>,
    conflicts: Vec<PropertyConflict>,
}

impl GraphAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge an entity contributed by `source`.
    pub fn insert_entity(
        &mut self,
        incoming: CanonicalEntity,
        source: &str,
    ) -> Result<MergeOutcome, AssemblyError> {
        let Some(existing) = self.entities.get_mut(&incoming.canonical_id) else {
            let entity = incoming.with_source(source);
            self.entities.insert(entity.canonical_id.clone(), entity);
            return Ok(MergeOutcome::Inserted);
        };

        if existing.type_name != incoming.type_name {
            return Err(AssemblyError::TypeMismatch {
                id: incoming.canonical_id,
                existing: existing.type_name.clone(),
                incoming: incoming.type_name,
            });
        }

        existing.aliases.extend(incoming.aliases);
        append_provenance(&mut existing.provenance, &incoming.provenance, source);
        let conflicts = merge_properties(
            existing.canonical_id.as_str(),
            &mut existing.properties,
            &mut existing.property_sources,
            incoming.properties,
            source,
            &mut self.conflicts,
        );
        Ok(MergeOutcome::Merged { conflicts })
    }

    /// Insert or merge a relation. Both endpoints must already exist.
    pub fn insert_relation(
        &mut self,
        incoming: Relation,
        source: &str,
    ) -> Result<MergeOutcome, AssemblyError> {
        for endpoint in [&incoming.source_entity, &incoming.target_entity] {
            if !self.entities.contains_key(endpoint) {
                return Err(AssemblyError::DanglingReference {
                    relation: incoming.id.clone(),
                    missing: endpoint.clone(),
                });
            }
        }

        let Some(existing) = self.relations.get_mut(&incoming.id) else {
            let relation = incoming.with_source(source);
            self.relations.insert(relation.id.clone(), relation);
            return Ok(MergeOutcome::Inserted);
        };

        append_provenance(&mut existing.provenance, &incoming.provenance, source);
        let conflicts = merge_properties(
            existing.id.as_str(),
            &mut existing.properties,
            &mut existing.property_sources,
            incoming.properties,
            source,
            &mut self.conflicts,
        );
        Ok(MergeOutcome::Merged { conflicts })
    }

    pub fn entity(&self, id: &CanonicalId) -> Option<&CanonicalEntity> {
        self.entities.get(id)
    }

    pub fn relation(&self, id: &RelationId) -> Option<&Relation> {
        self.relations.get(id)
    }

    /// All entities, ordered by canonical id
    pub fn entities(&self) -> impl Iterator<Item = &CanonicalEntity> {
        self.entities.values()
    }

    /// All relations, ordered by relation id
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn conflicts(&self) -> &[PropertyConflict] {
        &self.conflicts
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }
}

fn append_provenance(existing: &mut Vec<String>, incoming: &[String], source: &str) {
    for s in incoming.iter().map(String::as_str).chain(std::iter::once(source)) {
        if !existing.iter().any(|e| e == s) {
            existing.push(s.to_string());
        }
    }
}

/// Merge `incoming` into `existing`, returning the number of conflicts logged.
fn merge_properties(
    subject: &str,
    existing: &mut Properties,
    sources: &mut BTreeMap<String, String>,
    incoming: Properties,
    source: &str,
    log: &mut Vec<PropertyConflict>,
) -> usize {
    let mut conflicts = 0;
    for (key, value) in incoming {
        let Some(current) = existing.get_mut(&key) else {
            sources.insert(key.clone(), source.to_string());
            existing.insert(key, value);
            continue;
        };

        match (current, &value) {
            (PropertyValue::Array(held), PropertyValue::Array(new)) => {
                *held = union(held, new);
            }
            (held, new) if *held == *new => {}
            (held, _) => {
                let kept_source = sources.get(&key).cloned().unwrap_or_default();
                tracing::warn!(
                    subject,
                    property = %key,
                    kept = %held,
                    kept_source = %kept_source,
                    rejected = %value,
                    rejected_source = source,
                    "scalar property conflict, keeping first value"
                );
                log.push(PropertyConflict {
                    subject: subject.to_string(),
                    property: key,
                    kept_value: held.clone(),
                    kept_source,
                    rejected_value: value,
                    rejected_source: source.to_string(),
                });
                conflicts += 1;
            }
        }
    }
    conflicts
}
