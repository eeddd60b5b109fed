//! OntologyRegistry: the global, append-only type schema
//!
//! Types are registered with an optional `is_a` parent. Registration never
//! removes or retypes a declared property; it can only add new ones. Every
//! mutation bumps a monotonic revision counter and records an
//! [`OntologyDelta`] so each source run can report what it introduced.

use super::types::{OntologyDelta, OntologyType, PropertySchema, PropertyType, TypeDeclaration, TypeKind};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Why a registration was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictReason {
    /// An already-declared property was requested with a different type
    PropertyRetyped {
        property: String,
        existing: PropertyType,
        requested: PropertyType,
    },
    /// The type exists with a different `is_a` parent
    ParentChanged {
        existing: Option<String>,
        requested: String,
    },
    /// The type exists as a node and was requested as an edge, or vice versa
    KindChanged { existing: TypeKind, requested: TypeKind },
    /// The parent is a different kind than the type
    ParentKindMismatch { parent: String, parent_kind: TypeKind },
    /// The parent link would close a cycle (path from parent back to the type)
    ParentCycle(Vec<String>),
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PropertyRetyped { property, existing, requested } => write!(
                f,
                "property '{}' is declared as {} and cannot become {}",
                property, existing, requested
            ),
            Self::ParentChanged { existing, requested } => write!(
                f,
                "parent is {} and cannot become {}",
                existing.as_deref().unwrap_or("<none>"),
                requested
            ),
            Self::KindChanged { existing, requested } => {
                write!(f, "kind is {} and cannot become {}", existing, requested)
            }
            Self::ParentKindMismatch { parent, parent_kind } => {
                write!(f, "parent '{}' is a {} type", parent, parent_kind)
            }
            Self::ParentCycle(path) => write!(f, "is_a cycle {}", path.join(" -> ")),
        }
    }
}

/// Errors from ontology operations
#[derive(Debug, Error)]
pub enum OntologyError {
    #[error("ontology conflict on type '{type_name}': {reason}")]
    Conflict {
        type_name: String,
        reason: ConflictReason,
    },

    #[error("unknown parent type '{parent}' for '{type_name}'")]
    UnknownParent { type_name: String, parent: String },

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("invalid type name {name:?}: {reason}")]
    InvalidTypeName { name: String, reason: &'static str },

    #[error("cycle in is_a hierarchy: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("invalid ontology document: {0}")]
    Document(String),
}

impl OntologyError {
    /// Cycles and unreadable documents abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Cycle(_) | Self::Document(_))
    }

    fn conflict(type_name: &str, reason: ConflictReason) -> Self {
        Self::Conflict {
            type_name: type_name.to_string(),
            reason,
        }
    }
}

pub type OntologyResult<T> = Result<T, OntologyError>;

/// Type names become table file names, so they must be a single plain path
/// component.
pub fn validate_type_name(name: &str) -> OntologyResult<()> {
    let reason = if name.trim().is_empty() {
        Some("empty")
    } else if name.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if name.starts_with('.') {
        Some("starts with '.'")
    } else if name.chars().any(char::is_control) {
        Some("contains a control character")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(OntologyError::InvalidTypeName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// The global type schema.
///
/// Owned by the harmonization engine and mutated only under its exclusive
/// section, so registrations land strictly in source execution order.
#[derive(Debug, Clone, Default)]
pub struct OntologyRegistry {
    types: BTreeMap<String, OntologyType>,
    children: BTreeMap<String, BTreeSet<String>>,
    revision: u64,
    deltas: Vec<OntologyDelta>,
}

impl OntologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision; never decreases.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All types, ordered by name.
    pub fn types(&self) -> impl Iterator<Item = &OntologyType> {
        self.types.values()
    }

    /// Look up a type by name. Never mutates.
    pub fn lookup_type(&self, name: &str) -> Option<&OntologyType> {
        self.types.get(name)
    }

    /// Register a new type, or extend an existing one with compatible
    /// properties.
    ///
    /// Returns the delta recorded for the revision bump, or `None` when the
    /// declaration added nothing.
    pub fn register_type(
        &mut self,
        decl: TypeDeclaration,
        source: &str,
    ) -> OntologyResult<Option<OntologyDelta>> {
        validate_type_name(&decl.name)?;
        if let Some(parent) = &decl.parent {
            let parent_type = self.types.get(parent).ok_or_else(|| OntologyError::UnknownParent {
                type_name: decl.name.clone(),
                parent: parent.clone(),
            })?;
            if parent_type.kind != decl.kind {
                return Err(OntologyError::conflict(
                    &decl.name,
                    ConflictReason::ParentKindMismatch {
                        parent: parent.clone(),
                        parent_kind: parent_type.kind,
                    },
                ));
            }
            let mut path = vec![parent.clone()];
            path.extend(self.ancestors(parent).map(|t| t.name.clone()));
            if path.iter().any(|p| p == &decl.name) {
                let end = path.iter().position(|p| p == &decl.name).unwrap_or(0);
                let mut cycle = vec![decl.name.clone()];
                cycle.extend(path.into_iter().take(end + 1));
                return Err(OntologyError::conflict(&decl.name, ConflictReason::ParentCycle(cycle)));
            }
        }

        if let Some(existing) = self.types.get(&decl.name) {
            if existing.kind != decl.kind {
                return Err(OntologyError::conflict(
                    &decl.name,
                    ConflictReason::KindChanged {
                        existing: existing.kind,
                        requested: decl.kind,
                    },
                ));
            }
            if let Some(requested) = &decl.parent {
                if existing.parent.as_ref() != Some(requested) {
                    return Err(OntologyError::conflict(
                        &decl.name,
                        ConflictReason::ParentChanged {
                            existing: existing.parent.clone(),
                            requested: requested.clone(),
                        },
                    ));
                }
            }
            return self.extend_type(&decl.name, decl.properties, source);
        }

        // Properties inherited from ancestors cannot be retyped by the child.
        if let Some(parent) = &decl.parent {
            let inherited = self.effective_properties(parent);
            Self::check_retype(&decl.name, &inherited, &decl.properties)?;
        }

        self.revision += 1;
        let ty = OntologyType {
            name: decl.name.clone(),
            parent: decl.parent.clone(),
            kind: decl.kind,
            properties: decl.properties.clone(),
            introduced_by: source.to_string(),
            revision: self.revision,
            revised_at: self.revision,
        };
        self.link(&ty);
        self.types.insert(ty.name.clone(), ty);

        let delta = OntologyDelta {
            revision: self.revision,
            type_name: decl.name,
            created: true,
            added_properties: decl.properties,
            source: source.to_string(),
        };
        self.deltas.push(delta.clone());
        Ok(Some(delta))
    }

    /// Add optional properties to an existing type.
    ///
    /// All-or-nothing: if any requested property conflicts with an existing
    /// declaration (on the type or an ancestor), nothing is added.
    pub fn extend_type(
        &mut self,
        name: &str,
        properties: PropertySchema,
        source: &str,
    ) -> OntologyResult<Option<OntologyDelta>> {
        if !self.types.contains_key(name) {
            return Err(OntologyError::UnknownType(name.to_string()));
        }

        let effective = self.effective_properties(name);
        Self::check_retype(name, &effective, &properties)?;
        // A descendant's own declaration would be shadowed by the new one.
        for descendant in self.list_descendants(name) {
            Self::check_retype(&descendant.name, &descendant.properties, &properties)?;
        }

        let added: PropertySchema = properties
            .into_iter()
            .filter(|(prop, _)| !effective.contains_key(prop))
            .collect();
        if added.is_empty() {
            return Ok(None);
        }

        self.revision += 1;
        if let Some(ty) = self.types.get_mut(name) {
            ty.properties.extend(added.clone());
            ty.revised_at = self.revision;
        }

        let delta = OntologyDelta {
            revision: self.revision,
            type_name: name.to_string(),
            created: false,
            added_properties: added,
            source: source.to_string(),
        };
        self.deltas.push(delta.clone());
        Ok(Some(delta))
    }

    /// Lazily walk every type that is transitively `is_a` `name`
    /// (breadth-first, children in name order). `name` itself is excluded.
    pub fn list_descendants<'a>(&'a self, name: &str) -> Descendants<'a> {
        let mut queue = VecDeque::new();
        if let Some(children) = self.children.get(name) {
            queue.extend(children.iter().map(String::as_str));
        }
        Descendants {
            registry: self,
            queue,
        }
    }

    /// Walk the `is_a` chain upwards, starting at the parent of `name`.
    pub fn ancestors<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a OntologyType> + 'a {
        let limit = self.types.len();
        let mut current = self.types.get(name).and_then(|t| t.parent.clone());
        std::iter::from_fn(move || {
            let next = self.types.get(current.as_deref()?)?;
            current = next.parent.clone();
            Some(next)
        })
        .take(limit)
    }

    /// True if `name` is `ancestor` or transitively `is_a` it.
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        name == ancestor || self.ancestors(name).any(|t| t.name == ancestor)
    }

    /// Properties declared on the type and all its ancestors.
    pub fn effective_properties(&self, name: &str) -> PropertySchema {
        let mut chain: Vec<&OntologyType> = self.types.get(name).into_iter().collect();
        chain.extend(self.ancestors(name));
        let mut merged = PropertySchema::new();
        for ty in chain.into_iter().rev() {
            for (prop, decl) in &ty.properties {
                merged.entry(prop.clone()).or_insert(*decl);
            }
        }
        merged
    }

    /// Declared type of a property, looked up through the `is_a` chain.
    pub fn property_type(&self, type_name: &str, property: &str) -> Option<PropertyType> {
        self.types
            .get(type_name)
            .into_iter()
            .chain(self.ancestors(type_name))
            .find_map(|t| t.properties.get(property).copied())
    }

    /// Deltas recorded after the given revision.
    pub fn deltas_since(&self, revision: u64) -> Vec<OntologyDelta> {
        self.deltas
            .iter()
            .filter(|d| d.revision > revision)
            .cloned()
            .collect()
    }

    /// Insert a type loaded from a persisted document, keeping its recorded
    /// revision and origin. The parent must already be present.
    pub(crate) fn restore(&mut self, ty: OntologyType) -> OntologyResult<()> {
        if let Some(parent) = &ty.parent {
            if !self.types.contains_key(parent) {
                return Err(OntologyError::UnknownParent {
                    type_name: ty.name.clone(),
                    parent: parent.clone(),
                });
            }
        }
        self.revision = self.revision.max(ty.revision).max(ty.revised_at);
        self.link(&ty);
        self.types.insert(ty.name.clone(), ty);
        Ok(())
    }

    /// Assign the next revision to a restored type that carried none.
    pub(crate) fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn link(&mut self, ty: &OntologyType) {
        if let Some(parent) = &ty.parent {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(ty.name.clone());
        }
    }

    fn check_retype(
        type_name: &str,
        existing: &PropertySchema,
        requested: &PropertySchema,
    ) -> OntologyResult<()> {
        for (prop, ty) in requested {
            if let Some(current) = existing.get(prop) {
                if current != ty {
                    return Err(OntologyError::conflict(
                        type_name,
                        ConflictReason::PropertyRetyped {
                            property: prop.clone(),
                            existing: *current,
                            requested: *ty,
                        },
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Lazy breadth-first iterator over descendants of a type.
pub struct Descendants<'a> {
    registry: &'a OntologyRegistry,
    queue: VecDeque<&'a str>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a OntologyType;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.queue.pop_front()?;
        if let Some(children) = self.registry.children.get(name) {
            self.queue.extend(children.iter().map(String::as_str));
        }
        self.registry.types.get(name)
    }
}
