//! Ontology registry: the global, incrementally growing type schema

mod document;
mod registry;
mod types;

pub use document::{
    from_document, load_document, parse_document, render_document, save_document, to_document,
    OntologyDocument, TypeEntry,
};
pub use registry::{
    validate_type_name, ConflictReason, Descendants, OntologyError, OntologyRegistry,
    OntologyResult,
};
pub use types::{
    OntologyDelta, OntologyType, PropertySchema, PropertyType, TypeDeclaration, TypeKind,
};
