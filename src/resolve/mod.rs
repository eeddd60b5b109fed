//! Cross-source entity resolution and deduplication

mod identifier;
mod resolver;

pub use identifier::{ExternalId, Mention};
pub use resolver::{
    member_signature, DiscardedCandidate, EntityResolver, Resolution, ResolutionAmbiguity,
    ResolvedEntity, ResolverPolicy,
};
