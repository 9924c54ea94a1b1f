//! Generic replicated object schema
//!
//! Objects of types without a dedicated schema are cached here as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::db::collection::CachedDocument;

/// Collection name for untyped objects
pub const OBJECT_COLLECTION: &str = "objects_cache";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDoc {
    pub id: String,

    pub object_type: String,

    #[serde(default)]
    pub data: JsonValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,

    #[serde(rename = "_cachedAt", default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl CachedDocument for ObjectDoc {
    const COLLECTION: &'static str = OBJECT_COLLECTION;

    /// Ids are only unique per type, so the type is part of the key
    fn doc_id(&self) -> String {
        format!("{}:{}", self.object_type, self.id)
    }

    fn indices() -> Vec<Vec<&'static str>> {
        vec![vec!["objectType"]]
    }
}
