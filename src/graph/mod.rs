//! Canonical graph data structures

mod assembler;
mod entity;
mod relation;
mod value;
mod violation;

pub use assembler::{AssemblyError, GraphAssembler, MergeOutcome, PropertyConflict};
pub use entity::{CanonicalEntity, CanonicalId};
pub use relation::{Relation, RelationId};
pub use value::{normalize, union, Properties, PropertyValue};
pub use violation::SchemaViolation;
