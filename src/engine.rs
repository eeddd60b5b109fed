//! HarmonizationEngine: the shared state every source run commits into
//!
//! Registry, resolver and assembler live behind one mutex. A record is
//! typed, resolved and merged inside a single `with_state_mut` call, so no
//! other writer can observe a half-applied record.

use crate::graph::{GraphAssembler, SchemaViolation};
use crate::ontology::{OntologyDelta, OntologyRegistry, OntologyResult, TypeDeclaration};
use crate::resolve::{EntityResolver, ResolutionAmbiguity, ResolverPolicy};
use std::sync::Mutex;
use tracing::info;

/// Source name recorded on types the engine seeds itself
pub const CORE_SOURCE: &str = "core";

/// Everything a record commit touches.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub registry: OntologyRegistry,
    pub resolver: EntityResolver,
    pub assembler: GraphAssembler,
    pub ambiguities: Vec<ResolutionAmbiguity>,
    pub violations: Vec<SchemaViolation>,
}

impl EngineState {
    pub fn new(registry: OntologyRegistry, policy: ResolverPolicy) -> Self {
        Self {
            registry,
            resolver: EntityResolver::new(policy),
            assembler: GraphAssembler::new(),
            ambiguities: Vec::new(),
            violations: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct HarmonizationEngine {
    state: Mutex<EngineState>,
}

impl HarmonizationEngine {
    pub fn new(registry: OntologyRegistry, policy: ResolverPolicy) -> Self {
        Self {
            state: Mutex::new(EngineState::new(registry, policy)),
        }
    }

    /// Make sure the composite type, member relation and member type exist.
    ///
    /// Types already present (from the base ontology) are left alone.
    pub fn ensure_core_types(&self) -> OntologyResult<Vec<OntologyDelta>> {
        self.with_state_mut(|state| {
            let policy = state.resolver.policy().clone();
            let core = [
                TypeDeclaration::node(&policy.composite_type),
                TypeDeclaration::edge(&policy.member_relation),
                TypeDeclaration::node(&policy.member_type),
            ];
            let mut deltas = Vec::new();
            for declaration in core {
                if state.registry.lookup_type(&declaration.name).is_some() {
                    continue;
                }
                if let Some(delta) = state.registry.register_type(declaration, CORE_SOURCE)? {
                    info!(type_name = %delta.type_name, revision = delta.revision, "seeded core type");
                    deltas.push(delta);
                }
            }
            Ok(deltas)
        })
    }

    /// Run `f` with exclusive access to the state.
    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        let state = self.state.lock().unwrap();
        f(&state)
    }

    pub fn revision(&self) -> u64 {
        self.with_state(|state| state.registry.revision())
    }

    /// Clone of the current state, for export.
    pub fn snapshot(&self) -> EngineState {
        self.with_state(Clone::clone)
    }
}
