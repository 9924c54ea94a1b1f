//! User preference schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::db::collection::CachedDocument;

/// Collection name for preferences
pub const PREFERENCE_COLLECTION: &str = "user_preferences";

/// Key/value preference of the local user
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceDoc {
    pub key: String,

    pub value: JsonValue,

    pub updated_at: DateTime<Utc>,

    #[serde(rename = "_cachedAt", default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl PreferenceDoc {
    pub fn new(key: impl Into<String>, value: JsonValue) -> Self {
        Self {
            key: key.into(),
            value,
            updated_at: Utc::now(),
            cached_at: None,
        }
    }
}

impl CachedDocument for PreferenceDoc {
    const COLLECTION: &'static str = PREFERENCE_COLLECTION;

    fn doc_id(&self) -> String {
        self.key.clone()
    }
}
