//! Space routing
//!
//! Spaces are the replicated partitions objects live in. The policy table
//! says which classification of space each object type belongs to; the
//! router resolves a classification to a concrete space id using the
//! caller's identity context.

pub mod policy;
pub mod router;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use policy::{classify, ObjectPolicy, POLICIES};
pub use router::{SpaceRouter, Target};

/// Classification of a space by who may read and write it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpaceKind {
    Private,
    Community,
    CommunityReadonly,
    Admin,
}

impl SpaceKind {
    pub const ALL: [SpaceKind; 4] = [
        SpaceKind::Private,
        SpaceKind::Community,
        SpaceKind::CommunityReadonly,
        SpaceKind::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceKind::Private => "private",
            SpaceKind::Community => "community",
            SpaceKind::CommunityReadonly => "community-readonly",
            SpaceKind::Admin => "admin",
        }
    }
}

impl fmt::Display for SpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(SpaceKind::Private),
            "community" => Ok(SpaceKind::Community),
            "community-readonly" => Ok(SpaceKind::CommunityReadonly),
            "admin" => Ok(SpaceKind::Admin),
            other => Err(format!("unknown space kind '{}'", other)),
        }
    }
}

/// Who may read or write an object type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Owner,
    Admin,
    Community,
}

/// Read-only view of the caller's identity and spaces
pub trait IdentityContext: Send + Sync {
    /// The caller's own AID, if an identity is loaded
    fn own_aid(&self) -> Option<&str>;

    fn own_private_space(&self) -> Option<&str>;

    fn community_space(&self) -> Option<&str>;

    fn community_readonly_space(&self) -> Option<&str>;

    fn admin_space(&self) -> Option<&str>;

    /// Organizations the caller belongs to
    fn org_ids(&self) -> &[String];

    /// Whether an identifier belongs to the caller (own AID or an org)
    fn is_own(&self, id: &str) -> bool {
        self.own_aid() == Some(id) || self.org_ids().iter().any(|o| o == id)
    }

    /// Space id configured for a classification
    fn space_for(&self, kind: SpaceKind) -> Option<&str> {
        match kind {
            SpaceKind::Private => self.own_private_space(),
            SpaceKind::Community => self.community_space(),
            SpaceKind::CommunityReadonly => self.community_readonly_space(),
            SpaceKind::Admin => self.admin_space(),
        }
    }
}

/// Identity context built from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    pub own_aid: Option<String>,
    pub private_space: Option<String>,
    pub community_space: Option<String>,
    pub community_readonly_space: Option<String>,
    pub admin_space: Option<String>,
    pub org_ids: Vec<String>,
}

impl IdentityContext for StaticIdentity {
    fn own_aid(&self) -> Option<&str> {
        self.own_aid.as_deref()
    }

    fn own_private_space(&self) -> Option<&str> {
        self.private_space.as_deref()
    }

    fn community_space(&self) -> Option<&str> {
        self.community_space.as_deref()
    }

    fn community_readonly_space(&self) -> Option<&str> {
        self.community_readonly_space.as_deref()
    }

    fn admin_space(&self) -> Option<&str> {
        self.admin_space.as_deref()
    }

    fn org_ids(&self) -> &[String] {
        &self.org_ids
    }
}
