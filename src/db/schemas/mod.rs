//! Document schemas for the watchtower cache
//!
//! One struct per cached entity. Field names are camelCase on disk; the
//! cache adds `_id` and `_cachedAt` to every stored document.

mod chat;
mod credential;
mod object;
mod preference;
mod space;
mod trust_graph;

use super::{Collection, DocumentCache};
use crate::types::Result;

pub use chat::{
    ChannelDoc, MessageDoc, ReactionDoc, CHANNEL_COLLECTION, MESSAGE_COLLECTION,
    REACTION_COLLECTION,
};
pub use credential::{CredentialDoc, CREDENTIAL_COLLECTION};
pub use object::{ObjectDoc, OBJECT_COLLECTION};
pub use preference::{PreferenceDoc, PREFERENCE_COLLECTION};
pub use space::{SpaceDoc, SPACE_COLLECTION};
pub use trust_graph::{TrustEdge, TrustGraphNodeDoc, TRUST_GRAPH_COLLECTION};

/// Every collection the watchtower writes, in declaration order
pub const ALL_COLLECTIONS: &[&str] = &[
    CREDENTIAL_COLLECTION,
    TRUST_GRAPH_COLLECTION,
    CHANNEL_COLLECTION,
    MESSAGE_COLLECTION,
    REACTION_COLLECTION,
    SPACE_COLLECTION,
    PREFERENCE_COLLECTION,
    OBJECT_COLLECTION,
];

/// Open every schema's collection so its indexes are declared
///
/// Returns the number of indexes created (zero on a warm start).
pub fn declare_indexes(cache: &DocumentCache) -> Result<usize> {
    let before: usize = ALL_COLLECTIONS.iter().map(|c| cache.indexes(c).len()).sum();

    Collection::<CredentialDoc>::open(cache)?;
    Collection::<TrustGraphNodeDoc>::open(cache)?;
    Collection::<ChannelDoc>::open(cache)?;
    Collection::<MessageDoc>::open(cache)?;
    Collection::<ReactionDoc>::open(cache)?;
    Collection::<SpaceDoc>::open(cache)?;
    Collection::<PreferenceDoc>::open(cache)?;
    Collection::<ObjectDoc>::open(cache)?;

    let after: usize = ALL_COLLECTIONS.iter().map(|c| cache.indexes(c).len()).sum();
    Ok(after - before)
}
