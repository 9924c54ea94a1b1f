//! Space record schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::collection::CachedDocument;
use crate::space::SpaceKind;

/// Collection name for space records
pub const SPACE_COLLECTION: &str = "spaces";

/// Maps an owner and a classification to a concrete space
///
/// Keyed by `<owner>:<kind>`, so an owner has at most one record per kind
/// and in particular at most one private space.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpaceDoc {
    pub owner_key: String,

    pub kind: SpaceKind,

    pub space_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,

    #[serde(rename = "_cachedAt", default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl SpaceDoc {
    pub fn new(owner_key: impl Into<String>, kind: SpaceKind, space_id: impl Into<String>) -> Self {
        Self {
            owner_key: owner_key.into(),
            kind,
            space_id: space_id.into(),
            last_sync_at: None,
            cached_at: None,
        }
    }

    /// Record id for an owner and kind
    pub fn record_id(owner_key: &str, kind: SpaceKind) -> String {
        format!("{}:{}", owner_key, kind)
    }
}

impl CachedDocument for SpaceDoc {
    const COLLECTION: &'static str = SPACE_COLLECTION;

    fn doc_id(&self) -> String {
        Self::record_id(&self.owner_key, self.kind)
    }

    fn indices() -> Vec<Vec<&'static str>> {
        vec![vec!["spaceId"]]
    }
}
