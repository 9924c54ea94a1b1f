//! Static permission table for replicated object types

use super::{Scope, SpaceKind};

/// Read and write scope of an object type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectPolicy {
    pub object_type: &'static str,
    pub read: Scope,
    pub write: Scope,
}

impl ObjectPolicy {
    const fn new(object_type: &'static str, read: Scope, write: Scope) -> Self {
        Self {
            object_type,
            read,
            write,
        }
    }

    /// Space classification derived from the scopes
    pub fn kind(&self) -> SpaceKind {
        match (self.read, self.write) {
            (Scope::Owner, _) => SpaceKind::Private,
            (Scope::Admin, _) => SpaceKind::Admin,
            (Scope::Community, Scope::Admin) => SpaceKind::CommunityReadonly,
            (Scope::Community, _) => SpaceKind::Community,
        }
    }
}

/// Known object types
///
/// Scopes are declarative; enforcement belongs to whatever serves writes.
pub const POLICIES: &[ObjectPolicy] = &[
    ObjectPolicy::new("ChatChannel", Scope::Community, Scope::Admin),
    ObjectPolicy::new("CommunityAnnouncement", Scope::Community, Scope::Admin),
    ObjectPolicy::new("ChatMessage", Scope::Community, Scope::Community),
    ObjectPolicy::new("ChatReaction", Scope::Community, Scope::Community),
    ObjectPolicy::new("Credential", Scope::Community, Scope::Community),
    ObjectPolicy::new("TrustGraphNode", Scope::Community, Scope::Community),
    ObjectPolicy::new("MemberProfile", Scope::Community, Scope::Owner),
    ObjectPolicy::new("Bookmark", Scope::Owner, Scope::Owner),
    ObjectPolicy::new("UserPreference", Scope::Owner, Scope::Owner),
    ObjectPolicy::new("ModerationAction", Scope::Admin, Scope::Admin),
];

/// Look up the policy of an object type
pub fn policy(object_type: &str) -> Option<&'static ObjectPolicy> {
    POLICIES.iter().find(|p| p.object_type == object_type)
}

/// Space classification of an object type
///
/// Unknown types are private so they never end up in a shared poll.
pub fn classify(object_type: &str) -> SpaceKind {
    policy(object_type)
        .map(ObjectPolicy::kind)
        .unwrap_or(SpaceKind::Private)
}
