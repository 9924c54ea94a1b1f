//! Cached credential schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::db::collection::CachedDocument;

/// Collection name for credentials
pub const CREDENTIAL_COLLECTION: &str = "credentials_cache";

/// Credential as replicated into a space
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDoc {
    /// Self-addressing identifier of the credential
    pub said: String,

    pub issuer: String,

    pub recipient: String,

    /// Schema SAID
    pub schema: String,

    /// Credential attributes as issued
    #[serde(default)]
    pub data: JsonValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,

    #[serde(rename = "_cachedAt", default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl CachedDocument for CredentialDoc {
    const COLLECTION: &'static str = CREDENTIAL_COLLECTION;

    fn doc_id(&self) -> String {
        self.said.clone()
    }

    fn indices() -> Vec<Vec<&'static str>> {
        vec![
            // "my credentials"
            vec!["recipient"],
            // "credentials I issued"
            vec!["issuer"],
        ]
    }
}
