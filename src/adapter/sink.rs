//! AdapterSink trait and emission result types
//!
//! The sink is the interface through which source runs push records into
//! the engine. `emit()` is async: the runner awaits per-record feedback.

use super::source::RawRecord;
use crate::graph::SchemaViolation;
use crate::ontology::{OntologyDelta, OntologyError, TypeDeclaration, TypeKind};
use crate::resolve::ResolutionAmbiguity;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// Type not in the ontology and the source may not extend it
    UnknownType(String),
    /// Entity record naming an edge type, or the reverse
    KindMismatch { type_name: String, kind: TypeKind },
    /// Relation endpoint not known under any alias
    MissingEndpoint(String),
    /// Entity record without identifiers
    NoIdentifiers,
    /// Identifier that could not be parsed
    InvalidIdentifier(String),
    /// Type name unusable as a table name
    InvalidTypeName(String),
    /// Graph assembly refused the record
    Other(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownType(name) => write!(f, "unknown type {}", name),
            Self::KindMismatch { type_name, kind } => {
                write!(f, "{} is declared as {} type", type_name, kind)
            }
            Self::MissingEndpoint(id) => write!(f, "missing endpoint {}", id),
            Self::NoIdentifiers => write!(f, "no identifiers"),
            Self::InvalidIdentifier(msg) => write!(f, "invalid identifier: {}", msg),
            Self::InvalidTypeName(msg) => write!(f, "{}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// A rejected record.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// Human-readable description of what was rejected
    pub description: String,
    pub reason: RejectionReason,
}

impl Rejection {
    pub fn new(description: impl Into<String>, reason: RejectionReason) -> Self {
        Self {
            description: description.into(),
            reason,
        }
    }
}

/// The result of an `emit()` call.
///
/// A record is either rejected as a whole or committed; committed records
/// may still lose individual properties to schema violations.
#[derive(Debug, Clone, Default)]
pub struct EmitResult {
    /// Canonical entities inserted or merged (composite members included)
    pub entities_committed: usize,
    pub relations_committed: usize,
    pub rejections: Vec<Rejection>,
    pub violations: Vec<SchemaViolation>,
    /// Scalar conflicts logged while merging
    pub conflicts: usize,
    pub ambiguity: Option<ResolutionAmbiguity>,
}

impl EmitResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rejected(rejection: Rejection) -> Self {
        Self {
            rejections: vec![rejection],
            ..Self::default()
        }
    }

    pub fn is_rejected(&self) -> bool {
        !self.rejections.is_empty()
    }
}

/// Errors that end a source run (as opposed to rejecting one record).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter failure: {0}")]
    Failure(String),
    #[error("adapter cancelled")]
    Cancelled,
    #[error("time budget of {0:?} exhausted")]
    TimedOut(Duration),
    #[error(transparent)]
    Ontology(#[from] OntologyError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The interface through which source runs push into the engine.
///
/// Declarations and records are applied in call order; each call is
/// committed atomically before it returns.
#[async_trait]
pub trait AdapterSink: Send + Sync {
    /// Register (or compatibly re-register) a type on behalf of the source.
    async fn declare(
        &self,
        declaration: TypeDeclaration,
    ) -> Result<Option<OntologyDelta>, AdapterError>;

    /// Type, resolve and commit one record.
    async fn emit(&self, record: RawRecord) -> Result<EmitResult, AdapterError>;
}
