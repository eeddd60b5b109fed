//! biomerge: Ontology-Driven Harmonization Engine
//!
//! Folds many independent biological databases into one deduplicated
//! knowledge graph under a single, incrementally growing ontology.
//!
//! # Core Concepts
//!
//! - **Ontology**: the type hierarchy (`is_a` DAG) with declared properties.
//!   Sources may extend it; types are never removed or retyped.
//! - **Canonical entities**: one node per real-world object, found through
//!   the external identifiers (aliases) sources know it by
//! - **Source runs**: sources are folded in one at a time, in a fixed order,
//!   so later sources see every schema extension made before them
//!
//! # Example
//!
//! ```
//! use biomerge::{HarmonizationEngine, OntologyRegistry, ResolverPolicy};
//!
//! let engine = HarmonizationEngine::new(OntologyRegistry::new(), ResolverPolicy::default());
//! engine.ensure_core_types().unwrap();
//! assert_eq!(engine.revision(), 3);
//! ```

pub mod adapter;
pub mod config;
mod engine;
pub mod export;
pub mod graph;
pub mod ontology;
pub mod pipeline;
pub mod resolve;
pub mod storage;

pub use adapter::{
    AdapterError, AdapterRunner, CancellationToken, RawRecord, RunStatus, SourceModule, SourceRun,
    SourceSpec,
};
pub use config::{ConfigError, PipelineConfig};
pub use engine::{EngineState, HarmonizationEngine, CORE_SOURCE};
pub use export::{Manifest, Serializer};
pub use graph::{CanonicalEntity, CanonicalId, GraphAssembler, PropertyValue, Relation};
pub use ontology::{OntologyError, OntologyRegistry, TypeDeclaration, TypeKind};
pub use pipeline::{Pipeline, PipelineError, PipelineResult, RunMode};
pub use resolve::{EntityResolver, ResolverPolicy};
pub use storage::{OpenStore, SqliteStore, StateStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
