//! Entity resolver: maps mentions onto canonical ids
//!
//! Resolution is split in two steps. `resolve` computes a [`Resolution`]
//! without touching the alias index, and `commit` binds the new aliases
//! once the caller has accepted the result. The engine runs both under one
//! lock so a mention is resolved and committed atomically.

use super::identifier::{ExternalId, Mention};
use crate::graph::CanonicalId;
use crate::ontology::OntologyRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How composite mentions (complexes) are decomposed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverPolicy {
    /// Mentions of this type (or its descendants) are composites
    pub composite_type: String,
    /// Edge type linking a composite to each member
    pub member_relation: String,
    /// Type used to find or mint members
    pub member_type: String,
    /// Identifier namespaces that denote members rather than the composite itself
    pub member_namespaces: BTreeSet<String>,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            composite_type: "Complex".to_string(),
            member_relation: "has_member".to_string(),
            member_type: "Gene".to_string(),
            member_namespaces: ["gene", "uniprot", "ensembl", "hgnc", "entrez"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// An existing entity that lost an ambiguous resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardedCandidate {
    pub canonical_id: CanonicalId,
    pub overlap: usize,
}

/// A mention's identifiers matched more than one existing entity.
///
/// Non-fatal: the candidate with the largest alias overlap wins (ties go to
/// the smallest canonical id) and this record is kept for the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionAmbiguity {
    /// Source whose record triggered the ambiguity (filled in by the engine)
    #[serde(default)]
    pub source: String,
    pub type_name: String,
    pub identifiers: Vec<String>,
    pub chosen: CanonicalId,
    pub chosen_overlap: usize,
    pub discarded: Vec<DiscardedCandidate>,
}

/// The resolved identity of one entity within a mention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub canonical_id: CanonicalId,
    pub type_name: String,
    /// Aliases to attach to the canonical entity
    pub aliases: BTreeSet<String>,
    /// Aliases not yet in the index, bound on commit
    pub unbound: BTreeSet<String>,
    /// True when no existing alias matched and the id was freshly minted
    pub minted: bool,
}

/// Result of resolving a mention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub entity: ResolvedEntity,
    /// Constituents of a composite mention, in identifier order
    pub members: Vec<ResolvedEntity>,
    pub ambiguity: Option<ResolutionAmbiguity>,
}

/// Alias index from (type, alias) to canonical id
#[derive(Debug, Clone, Default)]
pub struct EntityResolver {
    policy: ResolverPolicy,
    index: HashMap<String, HashMap<String, CanonicalId>>,
}

impl EntityResolver {
    pub fn new(policy: ResolverPolicy) -> Self {
        Self {
            policy,
            index: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &ResolverPolicy {
        &self.policy
    }

    /// Number of bound aliases across all types
    pub fn alias_count(&self) -> usize {
        self.index.values().map(HashMap::len).sum()
    }

    /// Exact lookup within one type.
    pub fn lookup(&self, type_name: &str, alias: &str) -> Option<&CanonicalId> {
        self.index.get(type_name)?.get(alias)
    }

    /// Lookup in `type_name`, then in each of its descendants.
    ///
    /// Returns the type the alias was found under.
    pub fn lookup_in_hierarchy(
        &self,
        registry: &OntologyRegistry,
        type_name: &str,
        alias: &str,
    ) -> Option<(String, CanonicalId)> {
        if let Some(id) = self.lookup(type_name, alias) {
            return Some((type_name.to_string(), id.clone()));
        }
        registry
            .list_descendants(type_name)
            .find_map(|ty| self.lookup(&ty.name, alias).map(|id| (ty.name.clone(), id.clone())))
    }

    /// Resolve a mention against the current index. Never mutates.
    pub fn resolve(&self, registry: &OntologyRegistry, mention: &Mention) -> Resolution {
        if registry.is_a(&mention.type_name, &self.policy.composite_type) {
            let (members, own): (Vec<&ExternalId>, Vec<&ExternalId>) = mention
                .ids
                .iter()
                .partition(|id| self.policy.member_namespaces.contains(&id.namespace));
            if !members.is_empty() {
                return self.resolve_composite(registry, mention, &members, &own);
            }
        }

        let (entity, ambiguity) =
            self.resolve_simple(&mention.type_name, mention.aliases(), &mention.id_strings());
        Resolution {
            entity,
            members: Vec::new(),
            ambiguity,
        }
    }

    /// Bind every unbound alias of a resolution. Aliases already bound stay
    /// with their current entity.
    pub fn commit(&mut self, resolution: &Resolution) {
        for resolved in std::iter::once(&resolution.entity).chain(&resolution.members) {
            for alias in &resolved.unbound {
                self.bind(&resolved.type_name, alias, &resolved.canonical_id);
            }
        }
    }

    /// Bind one alias if it is free. Returns whether the index changed.
    pub fn bind(&mut self, type_name: &str, alias: &str, id: &CanonicalId) -> bool {
        let aliases = self.index.entry(type_name.to_string()).or_default();
        if aliases.contains_key(alias) {
            return false;
        }
        aliases.insert(alias.to_string(), id.clone());
        true
    }

    fn resolve_simple(
        &self,
        type_name: &str,
        aliases: BTreeSet<String>,
        id_strings: &[String],
    ) -> (ResolvedEntity, Option<ResolutionAmbiguity>) {
        let mut overlap: BTreeMap<&CanonicalId, usize> = BTreeMap::new();
        for alias in &aliases {
            if let Some(id) = self.lookup(type_name, alias) {
                *overlap.entry(id).or_default() += 1;
            }
        }

        // Ascending id order, so the first maximum is the smallest id
        let mut chosen: Option<(&CanonicalId, usize)> = None;
        for (&id, &count) in &overlap {
            if chosen.map_or(true, |(_, best)| count > best) {
                chosen = Some((id, count));
            }
        }

        let (canonical_id, minted, ambiguity) = match chosen {
            None => (
                CanonicalId::mint(type_name, id_strings.iter().map(String::as_str)),
                true,
                None,
            ),
            Some((id, count)) => {
                let ambiguity = (overlap.len() > 1).then(|| ResolutionAmbiguity {
                    source: String::new(),
                    type_name: type_name.to_string(),
                    identifiers: id_strings.to_vec(),
                    chosen: id.clone(),
                    chosen_overlap: count,
                    discarded: overlap
                        .iter()
                        .filter(|(other, _)| **other != id)
                        .map(|(other, &count)| DiscardedCandidate {
                            canonical_id: (*other).clone(),
                            overlap: count,
                        })
                        .collect(),
                });
                (id.clone(), false, ambiguity)
            }
        };

        let mut attached = BTreeSet::new();
        let mut unbound = BTreeSet::new();
        for alias in aliases {
            match self.lookup(type_name, &alias) {
                None => {
                    unbound.insert(alias.clone());
                    attached.insert(alias);
                }
                Some(existing) if *existing == canonical_id => {
                    attached.insert(alias);
                }
                // Bound to a discarded candidate; it stays there
                Some(_) => {}
            }
        }

        let entity = ResolvedEntity {
            canonical_id,
            type_name: type_name.to_string(),
            aliases: attached,
            unbound,
            minted,
        };
        (entity, ambiguity)
    }

    fn resolve_composite(
        &self,
        registry: &OntologyRegistry,
        mention: &Mention,
        members: &[&ExternalId],
        own: &[&ExternalId],
    ) -> Resolution {
        let member_type = &self.policy.member_type;
        let mut resolved_members: Vec<ResolvedEntity> = Vec::new();
        let mut seen = BTreeSet::new();
        for id in members {
            if !seen.insert(id.value.as_str()) {
                continue;
            }
            let member = match self.lookup_in_hierarchy(registry, member_type, &id.value) {
                Some((type_name, canonical_id)) => ResolvedEntity {
                    canonical_id,
                    type_name,
                    aliases: BTreeSet::from([id.value.clone()]),
                    unbound: BTreeSet::new(),
                    minted: false,
                },
                None => ResolvedEntity {
                    canonical_id: CanonicalId::mint(member_type, [id.to_string().as_str()]),
                    type_name: member_type.clone(),
                    aliases: BTreeSet::from([id.value.clone()]),
                    unbound: BTreeSet::from([id.value.clone()]),
                    minted: true,
                },
            };
            resolved_members.push(member);
        }

        // The member signature identifies the composite across sources even
        // when it carries no identifier of its own. It lives in the index
        // only, never among the entity's aliases.
        let signature = member_signature(members);
        let mut aliases: BTreeSet<String> = own.iter().map(|id| id.value.clone()).collect();
        aliases.insert(signature.clone());

        let (mut entity, ambiguity) =
            self.resolve_simple(&mention.type_name, aliases, &mention.id_strings());
        entity.aliases.remove(&signature);
        Resolution {
            entity,
            members: resolved_members,
            ambiguity,
        }
    }
}

/// Sorted member identifiers joined with `+`, e.g. `gene:GENE1+gene:GENE2`
pub fn member_signature(members: &[&ExternalId]) -> String {
    let sorted: BTreeSet<String> = members.iter().map(|id| id.to_string()).collect();
    sorted.into_iter().collect::<Vec<_>>().join("+")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::TypeDeclaration;

    fn registry() -> OntologyRegistry {
        let mut registry = OntologyRegistry::new();
        registry
            .register_type(TypeDeclaration::node("Gene"), "core")
            .unwrap();
        registry
            .register_type(TypeDeclaration::node("Protein").with_parent("Gene"), "UniProt")
            .unwrap();
        registry
            .register_type(TypeDeclaration::node("Complex"), "core")
            .unwrap();
        registry
    }

    fn mention(type_name: &str, ids: &[&str]) -> Mention {
        Mention::parse(type_name, ids.iter().copied()).unwrap()
    }

    fn resolve_and_commit(
        resolver: &mut EntityResolver,
        registry: &OntologyRegistry,
        mention: &Mention,
    ) -> Resolution {
        let resolution = resolver.resolve(registry, mention);
        resolver.commit(&resolution);
        resolution
    }

    #[test]
    fn shared_identifier_reuses_canonical_id() {
        let registry = registry();
        let mut resolver = EntityResolver::default();

        let first = resolve_and_commit(
            &mut resolver,
            &registry,
            &mention("Protein", &["uniprot:P12345"]),
        );
        let second = resolve_and_commit(
            &mut resolver,
            &registry,
            &mention("Protein", &["uniprot:P12345", "gene:ABC1"]),
        );

        assert!(first.entity.minted);
        assert!(!second.entity.minted);
        assert_eq!(first.entity.canonical_id, second.entity.canonical_id);
        assert_eq!(
            second.entity.aliases,
            BTreeSet::from(["ABC1".to_string(), "P12345".to_string()])
        );
        assert_eq!(second.entity.unbound, BTreeSet::from(["ABC1".to_string()]));
        assert_eq!(
            resolver.lookup("Protein", "ABC1"),
            Some(&first.entity.canonical_id)
        );
    }

    #[test]
    fn resolve_does_not_mutate_index() {
        let registry = registry();
        let resolver = EntityResolver::default();
        let resolution = resolver.resolve(&registry, &mention("Protein", &["uniprot:P1"]));
        assert!(resolution.entity.minted);
        assert_eq!(resolver.alias_count(), 0);
    }

    #[test]
    fn same_alias_different_type_does_not_merge() {
        let registry = registry();
        let mut resolver = EntityResolver::default();
        let gene = resolve_and_commit(&mut resolver, &registry, &mention("Gene", &["gene:X1"]));
        let protein =
            resolve_and_commit(&mut resolver, &registry, &mention("Protein", &["gene:X1"]));
        assert_ne!(gene.entity.canonical_id, protein.entity.canonical_id);
    }

    #[test]
    fn resolution_is_idempotent_across_fresh_resolvers() {
        let registry = registry();
        let mentions = [
            mention("Protein", &["uniprot:P1", "gene:A"]),
            mention("Protein", &["uniprot:P2"]),
            mention("Protein", &["gene:A", "uniprot:P3"]),
        ];

        let run = || {
            let mut resolver = EntityResolver::default();
            mentions
                .iter()
                .map(|m| resolve_and_commit(&mut resolver, &registry, m).entity.canonical_id)
                .collect::<Vec<_>>()
        };

        let first = run();
        assert_eq!(first, run());
        assert_eq!(first[0], first[2]);
    }

    #[test]
    fn ambiguity_prefers_larger_overlap_and_keeps_discarded_aliases() {
        let registry = registry();
        let mut resolver = EntityResolver::default();
        let a = resolve_and_commit(
            &mut resolver,
            &registry,
            &mention("Protein", &["uniprot:P1", "gene:A"]),
        );
        let b = resolve_and_commit(&mut resolver, &registry, &mention("Protein", &["uniprot:P2"]));

        let resolution = resolver.resolve(
            &registry,
            &mention("Protein", &["uniprot:P1", "gene:A", "uniprot:P2"]),
        );

        assert_eq!(resolution.entity.canonical_id, a.entity.canonical_id);
        let ambiguity = resolution.ambiguity.as_ref().expect("ambiguity recorded");
        assert_eq!(ambiguity.chosen, a.entity.canonical_id);
        assert_eq!(ambiguity.chosen_overlap, 2);
        assert_eq!(
            ambiguity.discarded,
            vec![DiscardedCandidate {
                canonical_id: b.entity.canonical_id.clone(),
                overlap: 1,
            }]
        );
        // P2 stays with b
        assert!(!resolution.entity.aliases.contains("P2"));
        resolver.commit(&resolution);
        assert_eq!(resolver.lookup("Protein", "P2"), Some(&b.entity.canonical_id));
    }

    #[test]
    fn ambiguity_tie_goes_to_smallest_id() {
        let registry = registry();
        let mut resolver = EntityResolver::default();
        let a = resolve_and_commit(&mut resolver, &registry, &mention("Protein", &["uniprot:P1"]));
        let b = resolve_and_commit(&mut resolver, &registry, &mention("Protein", &["uniprot:P2"]));

        let resolution =
            resolver.resolve(&registry, &mention("Protein", &["uniprot:P1", "uniprot:P2"]));
        let smallest = std::cmp::min(a.entity.canonical_id, b.entity.canonical_id);
        assert_eq!(resolution.entity.canonical_id, smallest);
        assert_eq!(resolution.ambiguity.unwrap().discarded.len(), 1);
    }

    #[test]
    fn complex_links_existing_and_new_members() {
        let registry = registry();
        let mut resolver = EntityResolver::default();
        let gene1 = resolve_and_commit(
            &mut resolver,
            &registry,
            &mention("Protein", &["gene:GENE1"]),
        );

        let complex = resolve_and_commit(
            &mut resolver,
            &registry,
            &mention("Complex", &["gene:GENE1", "gene:GENE2"]),
        );

        assert_eq!(complex.entity.type_name, "Complex");
        assert!(complex.entity.minted);
        assert_ne!(complex.entity.canonical_id, gene1.entity.canonical_id);
        assert_eq!(complex.members.len(), 2);

        let existing = &complex.members[0];
        assert_eq!(existing.canonical_id, gene1.entity.canonical_id);
        assert_eq!(existing.type_name, "Protein");
        assert!(!existing.minted);

        let fresh = &complex.members[1];
        assert!(fresh.minted);
        assert_eq!(fresh.type_name, "Gene");
        assert_ne!(fresh.canonical_id, gene1.entity.canonical_id);
        assert_eq!(resolver.lookup("Gene", "GENE2"), Some(&fresh.canonical_id));
        // The complex did not absorb its members' aliases, and the member
        // signature is indexed without becoming one
        assert!(complex.entity.aliases.is_empty());
        assert_eq!(
            resolver.lookup("Complex", "gene:GENE1+gene:GENE2"),
            Some(&complex.entity.canonical_id)
        );
    }

    #[test]
    fn repeated_complex_reuses_signature() {
        let registry = registry();
        let mut resolver = EntityResolver::default();
        let first = resolve_and_commit(
            &mut resolver,
            &registry,
            &mention("Complex", &["gene:G2", "gene:G1"]),
        );
        let second = resolve_and_commit(
            &mut resolver,
            &registry,
            &mention("Complex", &["gene:G1", "gene:G2", "complexportal:CPX-1"]),
        );
        assert_eq!(first.entity.canonical_id, second.entity.canonical_id);
        assert_eq!(second.entity.aliases, BTreeSet::from(["CPX-1".to_string()]));
        let ids = |r: &Resolution| {
            r.members.iter().map(|m| m.canonical_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert!(second.members.iter().all(|m| !m.minted));
    }

    #[test]
    fn complex_without_member_ids_resolves_as_plain_entity() {
        let registry = registry();
        let resolver = EntityResolver::default();
        let resolution =
            resolver.resolve(&registry, &mention("Complex", &["complexportal:CPX-9"]));
        assert!(resolution.members.is_empty());
        assert_eq!(
            resolution.entity.aliases,
            BTreeSet::from(["CPX-9".to_string()])
        );
    }
}
