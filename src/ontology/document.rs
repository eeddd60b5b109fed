//! Human-editable YAML persistence of the ontology
//!
//! The document is a mapping from type name to its definition:
//!
//! ```yaml
//! Gene:
//!   properties:
//!     symbol: str
//! Protein:
//!   parent: Gene
//!   properties:
//!     mass: float
//!     synonyms: str[]
//! interacts_with:
//!   kind: edge
//! ```
//!
//! `kind` defaults to `node`. `introduced_by`, `revision` and `revised_at`
//! are written on save and optional on load.

use super::registry::{validate_type_name, OntologyError, OntologyRegistry, OntologyResult};
use super::types::{OntologyType, PropertySchema, TypeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const BASE_SOURCE: &str = "base";

/// One entry of the ontology document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default)]
    pub properties: PropertySchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_at: Option<u64>,
}

/// The whole ontology document, keyed by type name.
pub type OntologyDocument = BTreeMap<String, TypeEntry>;

/// Parse a YAML document into a registry.
///
/// Types are restored parents-first. A parent missing from the document or
/// a cycle in the `is_a` links is fatal.
pub fn parse_document(yaml: &str) -> OntologyResult<OntologyRegistry> {
    let document: OntologyDocument = if yaml.trim().is_empty() {
        OntologyDocument::new()
    } else {
        serde_yaml::from_str(yaml).map_err(|e| OntologyError::Document(e.to_string()))?
    };
    from_document(document)
}

/// Load a registry from a YAML file.
pub fn load_document(path: impl AsRef<Path>) -> OntologyResult<OntologyRegistry> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| OntologyError::Document(format!("{}: {}", path.display(), e)))?;
    parse_document(&yaml)
}

/// Render the full registry as a YAML document.
pub fn render_document(registry: &OntologyRegistry) -> OntologyResult<String> {
    serde_yaml::to_string(&to_document(registry)).map_err(|e| OntologyError::Document(e.to_string()))
}

/// Write the full registry to a YAML file.
pub fn save_document(registry: &OntologyRegistry, path: impl AsRef<Path>) -> OntologyResult<()> {
    let path = path.as_ref();
    let yaml = render_document(registry)?;
    std::fs::write(path, yaml)
        .map_err(|e| OntologyError::Document(format!("{}: {}", path.display(), e)))
}

pub fn to_document(registry: &OntologyRegistry) -> OntologyDocument {
    registry
        .types()
        .map(|ty| {
            (
                ty.name.clone(),
                TypeEntry {
                    parent: ty.parent.clone(),
                    kind: ty.kind,
                    properties: ty.properties.clone(),
                    introduced_by: Some(ty.introduced_by.clone()),
                    revision: Some(ty.revision),
                    revised_at: (ty.revised_at > ty.revision).then_some(ty.revised_at),
                },
            )
        })
        .collect()
}

pub fn from_document(document: OntologyDocument) -> OntologyResult<OntologyRegistry> {
    for (name, entry) in &document {
        validate_type_name(name)?;
        if let Some(parent) = &entry.parent {
            if !document.contains_key(parent) {
                return Err(OntologyError::UnknownParent {
                    type_name: name.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }
    if let Some(cycle) = find_cycle(&document) {
        return Err(OntologyError::Cycle(cycle));
    }

    // Restore in recorded revision order, unrevisioned entries last, then by
    // name; defer any entry whose parent is not restored yet.
    let mut pending: Vec<(&String, &TypeEntry)> = document.iter().collect();
    pending.sort_by_key(|(name, entry)| (entry.revision.unwrap_or(u64::MAX), (*name).clone()));

    let mut registry = OntologyRegistry::new();
    while !pending.is_empty() {
        let before = pending.len();
        let mut deferred = Vec::new();
        for (name, entry) in pending {
            let parent_ready = entry
                .parent
                .as_ref()
                .map_or(true, |p| registry.lookup_type(p).is_some());
            if !parent_ready {
                deferred.push((name, entry));
                continue;
            }
            let revision = match entry.revision {
                Some(rev) => rev,
                None => registry.next_revision(),
            };
            registry.restore(OntologyType {
                name: name.clone(),
                parent: entry.parent.clone(),
                kind: entry.kind,
                properties: entry.properties.clone(),
                introduced_by: entry.introduced_by.clone().unwrap_or_else(|| BASE_SOURCE.to_string()),
                revision,
                revised_at: entry.revised_at.map_or(revision, |rev| rev.max(revision)),
            })?;
        }
        if deferred.len() == before {
            // Unreachable after the cycle check, kept as a hard stop.
            let names = deferred.iter().map(|(n, _)| (*n).clone()).collect();
            return Err(OntologyError::Cycle(names));
        }
        pending = deferred;
    }
    Ok(registry)
}

/// Follow each parent chain; revisiting a name on the current chain is a cycle.
fn find_cycle(document: &OntologyDocument) -> Option<Vec<String>> {
    for start in document.keys() {
        let mut chain = vec![start.clone()];
        let mut current = start;
        while let Some(parent) = document.get(current).and_then(|e| e.parent.as_ref()) {
            if let Some(pos) = chain.iter().position(|n| n == parent) {
                let mut cycle = chain[pos..].to_vec();
                cycle.push(parent.clone());
                return Some(cycle);
            }
            chain.push(parent.clone());
            current = parent;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{PropertyType, TypeDeclaration};

    const DOC: &str = r#"
Protein:
  parent: Gene
  properties:
    mass: float
    synonyms: str[]
Gene:
  properties:
    symbol: str
interacts_with:
  kind: edge
  properties:
    score: float
"#;

    #[test]
    fn parses_types_with_parents_first() {
        let registry = parse_document(DOC).unwrap();
        assert_eq!(registry.len(), 3);
        let protein = registry.lookup_type("Protein").unwrap();
        assert_eq!(protein.parent.as_deref(), Some("Gene"));
        assert_eq!(protein.properties["synonyms"], PropertyType::StrArray);
        assert_eq!(protein.introduced_by, "base");
        assert!(protein.revision > registry.lookup_type("Gene").unwrap().revision);
        assert_eq!(registry.lookup_type("interacts_with").unwrap().kind, TypeKind::Edge);
    }

    #[test]
    fn cycle_in_document_is_fatal() {
        let doc = "A:\n  parent: B\nB:\n  parent: A\n";
        let err = parse_document(doc).unwrap_err();
        assert!(matches!(err, OntologyError::Cycle(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_parent_is_rejected() {
        let err = parse_document("Protein:\n  parent: Gene\n").unwrap_err();
        assert!(matches!(err, OntologyError::UnknownParent { .. }));
    }

    #[test]
    fn path_like_type_name_in_document_is_rejected() {
        let err = parse_document("GO/term:\n  kind: node\n").unwrap_err();
        assert!(matches!(err, OntologyError::InvalidTypeName { .. }));
    }

    #[test]
    fn unparsable_document_is_fatal() {
        let err = parse_document("Gene: [unterminated").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn render_then_parse_preserves_revisions_and_origin() {
        let mut registry = parse_document(DOC).unwrap();
        registry
            .register_type(
                TypeDeclaration::node("Kinase")
                    .with_parent("Protein")
                    .with_property("ec_number", PropertyType::Str),
                "BRENDA",
            )
            .unwrap();

        let yaml = render_document(&registry).unwrap();
        let reloaded = parse_document(&yaml).unwrap();

        let kinase = reloaded.lookup_type("Kinase").unwrap();
        assert_eq!(kinase.introduced_by, "BRENDA");
        assert_eq!(kinase.revision, registry.lookup_type("Kinase").unwrap().revision);
        assert_eq!(reloaded.revision(), registry.revision());
    }

    #[test]
    fn extension_revision_survives_reload() {
        let mut registry = parse_document(DOC).unwrap();
        registry
            .extend_type(
                "Gene",
                PropertySchema::from([("strand".to_string(), PropertyType::Str)]),
                "Ensembl",
            )
            .unwrap();
        let extended = registry.revision();
        assert_eq!(registry.lookup_type("Gene").unwrap().revised_at, extended);

        let yaml = render_document(&registry).unwrap();
        assert!(yaml.contains("revised_at"));
        let mut reloaded = parse_document(&yaml).unwrap();
        assert_eq!(reloaded.revision(), extended);

        let delta = reloaded
            .register_type(TypeDeclaration::node("Transcript").with_parent("Gene"), "Ensembl")
            .unwrap()
            .unwrap();
        assert_eq!(delta.revision, extended + 1);
    }

    #[test]
    fn empty_document_is_an_empty_registry() {
        let registry = parse_document("  \n").unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.revision(), 0);
    }
}
