//! Trust graph node schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::collection::CachedDocument;

/// Collection name for trust graph nodes
pub const TRUST_GRAPH_COLLECTION: &str = "trust_graph_cache";

/// Outgoing edge of a trust graph node
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrustEdge {
    /// AID at the other end
    pub target: String,

    /// Credential backing the edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_said: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Identity in the community trust graph
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrustGraphNodeDoc {
    /// Falls back to the replicated object id when the data omits it
    #[serde(default)]
    pub aid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default)]
    pub edges: Vec<TrustEdge>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(rename = "_cachedAt", default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl CachedDocument for TrustGraphNodeDoc {
    const COLLECTION: &'static str = TRUST_GRAPH_COLLECTION;

    fn doc_id(&self) -> String {
        self.aid.clone()
    }
}
