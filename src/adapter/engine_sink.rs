//! EngineSink: the AdapterSink implementation backed by the harmonization engine
//!
//! Each record is handled in three phases under the engine lock:
//! - Typing: unknown types are registered (if the source may extend the
//!   schema) or rejected; undeclared properties are added or dropped
//! - Resolution: identifiers are mapped onto canonical ids
//! - Assembly: the entity or relation is inserted or merged
//!
//! Every declaration and record the sink accepts is appended to its commit
//! journal, which a completed run persists for replay.

use super::sink::{AdapterError, AdapterSink, EmitResult, Rejection, RejectionReason};
use super::source::{EndpointRef, RawProperties, RawRecord};
use crate::engine::{EngineState, HarmonizationEngine};
use crate::graph::{
    CanonicalEntity, CanonicalId, MergeOutcome, Properties, PropertyValue, Relation,
    SchemaViolation,
};
use crate::ontology::{validate_type_name, OntologyDelta, PropertySchema, TypeDeclaration, TypeKind};
use crate::resolve::{ExternalId, Mention};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// One committed step of a source run, in commit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum JournalEntry {
    Declare(TypeDeclaration),
    Record(RawRecord),
}

/// What the engine knows about the source behind an emission.
#[derive(Debug, Clone)]
pub struct FrameworkContext {
    /// Source module name, used for provenance and conflict tags
    pub source: String,
    /// Whether the source may add types and properties
    pub extends_schema: bool,
}

impl FrameworkContext {
    pub fn new(source: impl Into<String>, extends_schema: bool) -> Self {
        Self {
            source: source.into(),
            extends_schema,
        }
    }
}

pub struct EngineSink {
    engine: Arc<HarmonizationEngine>,
    framework: FrameworkContext,
    journal: Mutex<Vec<JournalEntry>>,
}

impl EngineSink {
    pub fn new(engine: Arc<HarmonizationEngine>, framework: FrameworkContext) -> Self {
        Self {
            engine,
            framework,
            journal: Mutex::new(Vec::new()),
        }
    }

    pub fn framework(&self) -> &FrameworkContext {
        &self.framework
    }

    /// Drain the entries committed so far.
    pub fn take_journal(&self) -> Vec<JournalEntry> {
        std::mem::take(&mut *self.journal.lock().unwrap())
    }

    pub(crate) fn declare_inner(
        state: &mut EngineState,
        declaration: TypeDeclaration,
        framework: &FrameworkContext,
    ) -> Result<Option<OntologyDelta>, AdapterError> {
        let delta = state.registry.register_type(declaration, &framework.source)?;
        if let Some(ref delta) = delta {
            info!(
                source = %framework.source,
                type_name = %delta.type_name,
                revision = delta.revision,
                created = delta.created,
                "ontology extended"
            );
        }
        Ok(delta)
    }

    /// Core record logic operating on the locked engine state.
    pub(crate) fn emit_inner(
        state: &mut EngineState,
        record: RawRecord,
        framework: &FrameworkContext,
    ) -> Result<EmitResult, AdapterError> {
        let description = record.describe();
        let result = match record {
            RawRecord::Entity {
                type_name,
                ids,
                properties,
            } => Self::commit_entity(state, &type_name, &ids, properties, framework)?,
            RawRecord::Relation {
                type_name,
                source,
                target,
                properties,
            } => Self::commit_relation(state, &type_name, &source, &target, properties, framework)?,
        };

        for rejection in &result.rejections {
            warn!(
                source = %framework.source,
                record = %description,
                reason = %rejection.reason,
                "record rejected"
            );
        }
        Ok(result)
    }

    fn commit_entity(
        state: &mut EngineState,
        type_name: &str,
        ids: &[String],
        properties: RawProperties,
        framework: &FrameworkContext,
    ) -> Result<EmitResult, AdapterError> {
        let description = format!("{} [{}]", type_name, ids.join(", "));
        let mention = match Mention::parse(type_name, ids.iter().map(String::as_str)) {
            Ok(mention) => mention,
            Err(msg) => {
                return Ok(EmitResult::rejected(Rejection::new(
                    description,
                    RejectionReason::InvalidIdentifier(msg),
                )))
            }
        };
        if mention.ids.is_empty() {
            return Ok(EmitResult::rejected(Rejection::new(
                description,
                RejectionReason::NoIdentifiers,
            )));
        }

        let mut result = EmitResult::empty();
        if !Self::ensure_type(state, type_name, TypeKind::Node, &properties, framework, &mut result)? {
            return Ok(result);
        }

        let subject = mention.id_strings().join(",");
        let props = Self::conform_properties(state, type_name, &subject, properties, framework, &mut result)?;

        let resolution = state.resolver.resolve(&state.registry, &mention);
        let canonical_id = resolution.entity.canonical_id.clone();
        if let Some(existing) = state.assembler.entity(&canonical_id) {
            if existing.type_name != type_name {
                result.rejections.push(Rejection::new(
                    description,
                    RejectionReason::Other(format!(
                        "{} already holds a {}",
                        canonical_id, existing.type_name
                    )),
                ));
                return Ok(result);
            }
        }

        // Members first, so has_member edges find both endpoints
        for member in resolution.members.iter().filter(|m| m.minted) {
            let mut entity = CanonicalEntity::new(member.canonical_id.clone(), &member.type_name);
            entity.aliases = member.aliases.clone();
            Self::insert_entity(state, entity, framework, &mut result);
        }

        let mut entity = CanonicalEntity::new(canonical_id.clone(), type_name)
            .with_properties(props, &framework.source);
        entity.aliases = resolution.entity.aliases.clone();
        Self::insert_entity(state, entity, framework, &mut result);
        state.resolver.commit(&resolution);

        if let Some(mut ambiguity) = resolution.ambiguity {
            ambiguity.source = framework.source.clone();
            warn!(
                source = %framework.source,
                chosen = %ambiguity.chosen,
                discarded = ambiguity.discarded.len(),
                "ambiguous resolution"
            );
            state.ambiguities.push(ambiguity.clone());
            result.ambiguity = Some(ambiguity);
        }

        let member_relation = state.resolver.policy().member_relation.clone();
        for member in &resolution.members {
            let relation = Relation::new(canonical_id.clone(), member.canonical_id.clone(), &member_relation);
            Self::insert_relation(state, relation, framework, &mut result);
        }

        debug!(source = %framework.source, canonical_id = %canonical_id, "entity committed");
        Ok(result)
    }

    fn commit_relation(
        state: &mut EngineState,
        type_name: &str,
        source: &EndpointRef,
        target: &EndpointRef,
        properties: RawProperties,
        framework: &FrameworkContext,
    ) -> Result<EmitResult, AdapterError> {
        let description = format!("{} {}→{}", type_name, source.id, target.id);
        let mut result = EmitResult::empty();
        if !Self::ensure_type(state, type_name, TypeKind::Edge, &properties, framework, &mut result)? {
            return Ok(result);
        }

        let missing = |endpoint: &EndpointRef| {
            Rejection::new(
                description.clone(),
                RejectionReason::MissingEndpoint(format!("{}:{}", endpoint.type_name, endpoint.id)),
            )
        };
        let Some(source_id) = Self::resolve_endpoint(state, source) else {
            result.rejections.push(missing(source));
            return Ok(result);
        };
        let Some(target_id) = Self::resolve_endpoint(state, target) else {
            result.rejections.push(missing(target));
            return Ok(result);
        };

        let subject = format!("{}→{}", source.id, target.id);
        let props = Self::conform_properties(state, type_name, &subject, properties, framework, &mut result)?;
        let relation = Relation::new(source_id, target_id, type_name).with_properties(props, &framework.source);
        Self::insert_relation(state, relation, framework, &mut result);
        Ok(result)
    }

    fn resolve_endpoint(state: &EngineState, endpoint: &EndpointRef) -> Option<CanonicalId> {
        let id = ExternalId::parse(&endpoint.id).ok()?;
        state.registry.lookup_type(&endpoint.type_name)?;
        state
            .resolver
            .lookup_in_hierarchy(&state.registry, &endpoint.type_name, &id.value)
            .map(|(_, canonical_id)| canonical_id)
    }

    /// Returns false when the record was rejected.
    fn ensure_type(
        state: &mut EngineState,
        type_name: &str,
        kind: TypeKind,
        properties: &RawProperties,
        framework: &FrameworkContext,
        result: &mut EmitResult,
    ) -> Result<bool, AdapterError> {
        match state.registry.lookup_type(type_name) {
            Some(ty) if ty.kind != kind => {
                result.rejections.push(Rejection::new(
                    type_name,
                    RejectionReason::KindMismatch {
                        type_name: type_name.to_string(),
                        kind: ty.kind,
                    },
                ));
                Ok(false)
            }
            Some(_) => Ok(true),
            None if framework.extends_schema => {
                if let Err(e) = validate_type_name(type_name) {
                    result.rejections.push(Rejection::new(
                        type_name,
                        RejectionReason::InvalidTypeName(e.to_string()),
                    ));
                    return Ok(false);
                }
                let declaration = TypeDeclaration {
                    name: type_name.to_string(),
                    parent: None,
                    kind,
                    properties: infer_schema(properties),
                };
                Self::declare_inner(state, declaration, framework)?;
                Ok(true)
            }
            None => {
                result.rejections.push(Rejection::new(
                    type_name,
                    RejectionReason::UnknownType(type_name.to_string()),
                ));
                Ok(false)
            }
        }
    }

    /// Convert raw values to the declared property types, extending the
    /// type first when the source is allowed to.
    fn conform_properties(
        state: &mut EngineState,
        type_name: &str,
        subject: &str,
        raw: RawProperties,
        framework: &FrameworkContext,
        result: &mut EmitResult,
    ) -> Result<Properties, AdapterError> {
        let mut schema = state.registry.effective_properties(type_name);
        if framework.extends_schema {
            let additions: PropertySchema = raw
                .iter()
                .filter(|(name, _)| !schema.contains_key(*name))
                .filter_map(|(name, value)| {
                    PropertyValue::infer_type(value).map(|ty| (name.clone(), ty))
                })
                .collect();
            if !additions.is_empty() {
                if let Some(delta) = state.registry.extend_type(type_name, additions, &framework.source)? {
                    info!(
                        source = %framework.source,
                        type_name,
                        revision = delta.revision,
                        added = delta.added_properties.len(),
                        "ontology extended"
                    );
                }
                schema = state.registry.effective_properties(type_name);
            }
        }

        let mut properties = Properties::new();
        for (name, value) in raw {
            if value.is_null() {
                continue;
            }
            let outcome = match schema.get(&name) {
                Some(ty) => PropertyValue::conform(&value, *ty),
                None => Err("undeclared property".to_string()),
            };
            match outcome {
                Ok(Some(converted)) => {
                    properties.insert(name, converted);
                }
                Ok(None) => {}
                Err(reason) => {
                    let violation = SchemaViolation {
                        source: framework.source.clone(),
                        type_name: type_name.to_string(),
                        subject: subject.to_string(),
                        property: name,
                        reason,
                    };
                    warn!(source = %framework.source, violation = %violation, "property dropped");
                    state.violations.push(violation.clone());
                    result.violations.push(violation);
                }
            }
        }
        Ok(properties)
    }

    fn insert_entity(
        state: &mut EngineState,
        entity: CanonicalEntity,
        framework: &FrameworkContext,
        result: &mut EmitResult,
    ) {
        let label = entity.canonical_id.to_string();
        match state.assembler.insert_entity(entity, &framework.source) {
            Ok(outcome) => {
                result.entities_committed += 1;
                result.conflicts += conflicts_of(outcome);
            }
            Err(e) => result
                .rejections
                .push(Rejection::new(label, RejectionReason::Other(e.to_string()))),
        }
    }

    fn insert_relation(
        state: &mut EngineState,
        relation: Relation,
        framework: &FrameworkContext,
        result: &mut EmitResult,
    ) {
        let label = relation.id.to_string();
        match state.assembler.insert_relation(relation, &framework.source) {
            Ok(outcome) => {
                result.relations_committed += 1;
                result.conflicts += conflicts_of(outcome);
            }
            Err(e) => result
                .rejections
                .push(Rejection::new(label, RejectionReason::Other(e.to_string()))),
        }
    }
}

fn conflicts_of(outcome: MergeOutcome) -> usize {
    match outcome {
        MergeOutcome::Inserted => 0,
        MergeOutcome::Merged { conflicts } => conflicts,
    }
}

/// Property types inferred from the first record of a new type
fn infer_schema(properties: &RawProperties) -> PropertySchema {
    properties
        .iter()
        .filter_map(|(name, value)| PropertyValue::infer_type(value).map(|ty| (name.clone(), ty)))
        .collect()
}

#[async_trait]
impl AdapterSink for EngineSink {
    async fn declare(
        &self,
        declaration: TypeDeclaration,
    ) -> Result<Option<OntologyDelta>, AdapterError> {
        let entry = JournalEntry::Declare(declaration.clone());
        let delta = self
            .engine
            .with_state_mut(|state| Self::declare_inner(state, declaration, &self.framework))?;
        self.journal.lock().unwrap().push(entry);
        Ok(delta)
    }

    async fn emit(&self, record: RawRecord) -> Result<EmitResult, AdapterError> {
        let entry = JournalEntry::Record(record.clone());
        let result = self
            .engine
            .with_state_mut(|state| Self::emit_inner(state, record, &self.framework))?;
        self.journal.lock().unwrap().push(entry);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{OntologyRegistry, PropertyType};
    use crate::resolve::ResolverPolicy;
    use serde_json::json;

    fn engine() -> Arc<HarmonizationEngine> {
        let engine = HarmonizationEngine::new(OntologyRegistry::new(), ResolverPolicy::default());
        engine.ensure_core_types().unwrap();
        Arc::new(engine)
    }

    fn sink(engine: &Arc<HarmonizationEngine>, source: &str, extends: bool) -> EngineSink {
        EngineSink::new(engine.clone(), FrameworkContext::new(source, extends))
    }

    #[tokio::test]
    async fn unknown_type_registered_when_authorized() {
        let engine = engine();
        let uniprot = sink(&engine, "UniProt", true);

        let result = uniprot
            .emit(RawRecord::entity("Protein", ["uniprot:P1"]).with_property("mass", json!(120.1)))
            .await
            .unwrap();

        assert_eq!(result.entities_committed, 1);
        engine.with_state(|state| {
            let ty = state.registry.lookup_type("Protein").unwrap();
            assert_eq!(ty.introduced_by, "UniProt");
            assert_eq!(ty.properties.get("mass"), Some(&PropertyType::Float));
        });
    }

    #[tokio::test]
    async fn unknown_type_rejected_without_authority() {
        let engine = engine();
        let reader = sink(&engine, "Reader", false);
        let result = reader.emit(RawRecord::entity("Protein", ["uniprot:P1"])).await.unwrap();
        assert!(result.is_rejected());
        assert_eq!(
            result.rejections[0].reason,
            RejectionReason::UnknownType("Protein".to_string())
        );
        assert_eq!(engine.with_state(|s| s.assembler.entity_count()), 0);
    }

    #[tokio::test]
    async fn path_like_type_name_is_rejected_not_registered() {
        let engine = engine();
        let source = sink(&engine, "Rogue", true);
        let revision = engine.with_state(|s| s.registry.revision());

        for name in ["../../escaped", "GO/term"] {
            let result = source.emit(RawRecord::entity(name, ["x:1"])).await.unwrap();
            assert!(result.is_rejected());
            assert!(matches!(
                result.rejections[0].reason,
                RejectionReason::InvalidTypeName(_)
            ));
        }
        engine.with_state(|state| {
            assert_eq!(state.registry.revision(), revision);
            assert_eq!(state.assembler.entity_count(), 0);
        });
    }

    #[tokio::test]
    async fn undeclared_property_dropped_without_authority() {
        let engine = engine();
        let reader = sink(&engine, "Reader", false);
        let result = reader
            .emit(RawRecord::entity("Gene", ["gene:A"]).with_property("symbol", json!("A")))
            .await
            .unwrap();

        assert_eq!(result.entities_committed, 1);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].property, "symbol");
        engine.with_state(|state| {
            let entity = state.assembler.entities().next().unwrap();
            assert!(entity.properties.is_empty());
            assert_eq!(state.violations.len(), 1);
        });
    }

    #[tokio::test]
    async fn mistyped_value_is_a_violation_not_a_rejection() {
        let engine = engine();
        let source = sink(&engine, "S", true);
        source
            .declare(TypeDeclaration::node("Protein").with_property("mass", PropertyType::Float))
            .await
            .unwrap();
        let result = source
            .emit(RawRecord::entity("Protein", ["uniprot:P1"]).with_property("mass", json!("heavy")))
            .await
            .unwrap();
        assert!(!result.is_rejected());
        assert_eq!(result.violations.len(), 1);
    }

    #[tokio::test]
    async fn relation_with_unknown_endpoint_is_rejected() {
        let engine = engine();
        let source = sink(&engine, "IntAct", true);
        source.emit(RawRecord::entity("Gene", ["gene:A"])).await.unwrap();

        let result = source
            .emit(RawRecord::relation(
                "interacts_with",
                EndpointRef::new("Gene", "gene:A"),
                EndpointRef::new("Gene", "gene:Z"),
            ))
            .await
            .unwrap();

        assert!(matches!(
            result.rejections[0].reason,
            RejectionReason::MissingEndpoint(ref id) if id == "Gene:gene:Z"
        ));
        assert_eq!(engine.with_state(|s| s.assembler.relation_count()), 0);
    }

    #[tokio::test]
    async fn relation_endpoints_found_through_descendants() {
        let engine = engine();
        let source = sink(&engine, "S", true);
        source
            .declare(TypeDeclaration::node("Protein").with_parent("Gene"))
            .await
            .unwrap();
        source.emit(RawRecord::entity("Protein", ["uniprot:P1"])).await.unwrap();
        source.emit(RawRecord::entity("Gene", ["gene:G1"])).await.unwrap();

        let result = source
            .emit(
                RawRecord::relation(
                    "encodes",
                    EndpointRef::new("Gene", "gene:G1"),
                    EndpointRef::new("Gene", "uniprot:P1"),
                )
                .with_property("evidence", json!(["ECO:1"])),
            )
            .await
            .unwrap();

        assert_eq!(result.relations_committed, 1);
        engine.with_state(|state| {
            let relation = state.assembler.relations().next().unwrap();
            assert!(relation.target_entity.as_str().starts_with("Protein:"));
            assert_eq!(
                state.registry.lookup_type("encodes").unwrap().kind,
                TypeKind::Edge
            );
        });
    }

    #[tokio::test]
    async fn entity_record_for_edge_type_is_rejected() {
        let engine = engine();
        let source = sink(&engine, "S", true);
        let result = source.emit(RawRecord::entity("has_member", ["x:1"])).await.unwrap();
        assert!(matches!(
            result.rejections[0].reason,
            RejectionReason::KindMismatch { kind: TypeKind::Edge, .. }
        ));
    }

    #[tokio::test]
    async fn complex_emits_member_relations() {
        let engine = engine();
        let source = sink(&engine, "ComplexPortal", true);
        source
            .declare(TypeDeclaration::node("Protein").with_parent("Gene"))
            .await
            .unwrap();
        source.emit(RawRecord::entity("Protein", ["gene:GENE1"])).await.unwrap();

        let result = source
            .emit(RawRecord::entity("Complex", ["gene:GENE1", "gene:GENE2"]))
            .await
            .unwrap();

        // The complex and the new GENE2 member
        assert_eq!(result.entities_committed, 2);
        assert_eq!(result.relations_committed, 2);
        engine.with_state(|state| {
            assert_eq!(state.assembler.entity_count(), 3);
            assert!(state.assembler.relations().all(|r| r.type_name == "has_member"));
        });
    }

    #[tokio::test]
    async fn journal_keeps_commit_order() {
        let engine = engine();
        let source = sink(&engine, "S", true);
        let declaration = TypeDeclaration::node("Protein");
        let record = RawRecord::entity("Protein", ["uniprot:P1"]);
        source.declare(declaration.clone()).await.unwrap();
        source.emit(record.clone()).await.unwrap();

        assert_eq!(
            source.take_journal(),
            vec![JournalEntry::Declare(declaration), JournalEntry::Record(record)]
        );
        assert!(source.take_journal().is_empty());
    }

    #[tokio::test]
    async fn conflicting_declaration_fails_the_call() {
        let engine = engine();
        let source = sink(&engine, "S", true);
        source
            .declare(TypeDeclaration::node("Protein").with_property("mass", PropertyType::Float))
            .await
            .unwrap();
        let err = source
            .declare(TypeDeclaration::node("Protein").with_property("mass", PropertyType::Int))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Ontology(_)));
        assert_eq!(source.take_journal().len(), 1);
    }
}
