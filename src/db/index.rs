//! Secondary indexes for the document cache
//!
//! An index on `(f1, f2, ...)` of a collection is a sled tree whose keys are
//!
//! ```text
//! json(f1) 0x1F json(f2) 0x1F ... 0x00 <document id>
//! ```
//!
//! with empty values. Canonical JSON never contains a raw `0x1F` or `0x00`,
//! so a prefix of encoded leading fields selects exactly the documents with
//! those values. Entries may over-approximate (a stale key left behind by a
//! crash) but never under-approximate; queries re-check the filter on every
//! document they load.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::query::{lookup_field, Filter};

/// Tree holding persisted index declarations
pub const INDEX_REGISTRY_TREE: &str = "__indexes";

/// Prefix of collection trees
pub const COLLECTION_TREE_PREFIX: &str = "c:";

/// Prefix of index trees
pub const INDEX_TREE_PREFIX: &str = "i:";

const FIELD_SEP: u8 = 0x1f;
const ID_SEP: u8 = 0x00;

/// Upper bound on prefix probes generated from `$in` filters
const MAX_PROBES: usize = 256;

/// Declared index over one or more fields of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub collection: String,
    pub fields: Vec<String>,
}

impl IndexSpec {
    pub fn new<I, S>(collection: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collection: collection.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Registry key, e.g. `chat_messages:channelId,sentAt`
    pub fn name(&self) -> String {
        format!("{}:{}", self.collection, self.fields.join(","))
    }

    /// Name of the sled tree holding the entries
    pub fn tree_name(&self) -> String {
        format!("{}{}", INDEX_TREE_PREFIX, self.name())
    }

    /// Index entry key for a document
    pub fn entry_key(&self, doc: &JsonValue, id: &str) -> Vec<u8> {
        let mut key = Vec::new();
        for field in &self.fields {
            encode_value(&mut key, lookup_field(doc, field));
            key.push(FIELD_SEP);
        }
        key.push(ID_SEP);
        key.extend_from_slice(id.as_bytes());
        key
    }

    /// Number of leading index fields constrained by the filter
    pub fn covered_fields(&self, filter: &Filter) -> usize {
        self.fields
            .iter()
            .take_while(|f| filter.condition(f).is_some())
            .count()
    }

    /// Key prefixes to scan for a filter
    ///
    /// Returns `None` when the filter does not constrain the first field.
    /// `$in` conditions expand into one prefix per value; if that would
    /// exceed [`MAX_PROBES`] the trailing fields are dropped from the prefix.
    pub fn probe_prefixes(&self, filter: &Filter) -> Option<Vec<Vec<u8>>> {
        let covered = self.covered_fields(filter);
        if covered == 0 {
            return None;
        }

        let mut prefixes: Vec<Vec<u8>> = vec![Vec::new()];
        for field in self.fields.iter().take(covered) {
            let candidates = filter.condition(field)?.candidates();
            if prefixes.len() * candidates.len().max(1) > MAX_PROBES {
                break;
            }

            let mut next = Vec::with_capacity(prefixes.len() * candidates.len());
            for prefix in &prefixes {
                for value in &candidates {
                    let mut key = prefix.clone();
                    encode_value(&mut key, Some(value));
                    key.push(FIELD_SEP);
                    next.push(key);
                }
            }
            prefixes = next;
        }

        // An empty `$in` matches nothing: no prefixes at all
        Some(prefixes)
    }
}

/// Extract the document id from an index entry key
pub fn id_from_entry_key(key: &[u8]) -> Option<&str> {
    let pos = key.iter().position(|b| *b == ID_SEP)?;
    std::str::from_utf8(&key[pos + 1..]).ok()
}

/// Pick the index covering the most leading filter fields
pub fn plan<'a>(indexes: &'a [IndexSpec], filter: &Filter) -> Option<&'a IndexSpec> {
    if filter.is_empty() {
        return None;
    }
    indexes
        .iter()
        .map(|spec| (spec.covered_fields(filter), spec))
        .filter(|(covered, _)| *covered > 0)
        .max_by_key(|(covered, _)| *covered)
        .map(|(_, spec)| spec)
}

fn encode_value(out: &mut Vec<u8>, value: Option<&JsonValue>) {
    // serde_json escapes control characters, so no separator can appear here
    let value = value.unwrap_or(&JsonValue::Null);
    out.extend_from_slice(value.to_string().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_key_roundtrips_id() {
        let spec = IndexSpec::new("chat_messages", ["channelId", "sentAt"]);
        let doc = json!({ "channelId": "general", "sentAt": "2024-05-01T10:00:00Z" });

        let key = spec.entry_key(&doc, "m1");
        assert_eq!(id_from_entry_key(&key), Some("m1"));
    }

    #[test]
    fn test_prefix_matches_entry() {
        let spec = IndexSpec::new("chat_messages", ["channelId", "sentAt"]);
        let doc = json!({ "channelId": "general", "sentAt": 5 });
        let key = spec.entry_key(&doc, "m1");

        let prefixes = spec
            .probe_prefixes(&Filter::new().eq("channelId", "general"))
            .unwrap();
        assert_eq!(prefixes.len(), 1);
        assert!(key.starts_with(&prefixes[0]));

        // "gen" must not match "general"
        let prefixes = spec.probe_prefixes(&Filter::new().eq("channelId", "gen")).unwrap();
        assert!(!key.starts_with(&prefixes[0]));
    }

    #[test]
    fn test_in_expands_prefixes() {
        let spec = IndexSpec::new("chat_reactions", ["messageId"]);
        let prefixes = spec
            .probe_prefixes(&Filter::new().any_of("messageId", ["m1", "m2", "m3"]))
            .unwrap();
        assert_eq!(prefixes.len(), 3);
    }

    #[test]
    fn test_uncovered_filter_has_no_plan() {
        let spec = IndexSpec::new("chat_messages", ["channelId", "sentAt"]);
        assert!(spec.probe_prefixes(&Filter::new().eq("sentAt", 1)).is_none());

        let indexes = vec![spec];
        assert!(plan(&indexes, &Filter::new().eq("senderAid", "a")).is_none());
        assert!(plan(&indexes, &Filter::new()).is_none());
    }

    #[test]
    fn test_plan_prefers_widest_cover() {
        let indexes = vec![
            IndexSpec::new("chat_messages", ["channelId"]),
            IndexSpec::new("chat_messages", ["channelId", "senderAid"]),
        ];
        let filter = Filter::new().eq("channelId", "general").eq("senderAid", "alice");
        let chosen = plan(&indexes, &filter).unwrap();
        assert_eq!(chosen.fields.len(), 2);
    }
}
