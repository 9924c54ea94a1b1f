//! Projection of replicated objects into cached documents
//!
//! Each object type with a schema is parsed into it; the parsed document is
//! what gets cached, and a few of its fields become the event payload.
//! Types without a schema are cached verbatim as [`ObjectDoc`].

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

use super::known::Marker;
use super::reader::{RemoteCredential, RemoteObject};
use crate::db::schemas::{
    ChannelDoc, CredentialDoc, MessageDoc, ObjectDoc, PreferenceDoc, ReactionDoc,
    TrustGraphNodeDoc,
};
use crate::db::CachedDocument;
use crate::space::IdentityContext;
use crate::types::{Result, WatchError};

/// Object type whose snapshots come from `read_credentials`
pub const CREDENTIAL_TYPE: &str = "Credential";

/// A replicated object ready to cache and announce
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub collection: &'static str,
    pub doc_id: String,
    pub doc: JsonValue,
    pub payload: JsonValue,
    pub marker: Option<Marker>,
    /// Event name when it differs from the one derived from the type
    pub event: Option<String>,
}

impl Projection {
    fn from_doc<T: CachedDocument + Serialize>(doc: &T, payload: JsonValue) -> Result<Self> {
        Ok(Self {
            collection: T::COLLECTION,
            doc_id: doc.doc_id(),
            doc: serde_json::to_value(doc)?,
            payload,
            marker: None,
            event: None,
        })
    }
}

/// Project a replicated object of any type
///
/// Fails with [`WatchError::Serialization`] when the object's data does not
/// fit its type's schema.
pub fn project_object(object: &RemoteObject, space_id: &str) -> Result<Projection> {
    match object.object_type.as_str() {
        "ChatMessage" => {
            let msg: MessageDoc = parse(object, space_id)?;
            let content = if msg.is_deleted() {
                String::new()
            } else {
                msg.content.clone()
            };
            let payload = json!({
                "messageId": msg.id,
                "channelId": msg.channel_id,
                "senderAid": msg.sender_aid,
                "senderName": msg.sender_name,
                "content": content,
                "sentAt": msg.sent_at,
                "editedAt": msg.edited_at,
                "deletedAt": msg.deleted_at,
            });
            let mutated_at = msg.edited_at.max(msg.deleted_at);
            let mut projection = Projection::from_doc(&msg, payload)?;
            projection.marker = Some(Marker::new(msg.version, mutated_at));
            Ok(projection)
        }
        "ChatChannel" => {
            let channel: ChannelDoc = parse(object, space_id)?;
            let payload = json!({
                "channelId": channel.id,
                "name": channel.name,
                "description": channel.description,
            });
            Projection::from_doc(&channel, payload)
        }
        "ChatReaction" => {
            let reaction: ReactionDoc = parse(object, space_id)?;
            let payload = json!({
                "reactionId": reaction.id,
                "messageId": reaction.message_id,
                "emoji": reaction.emoji,
                "reactorAid": reaction.reactor_aid,
            });
            Projection::from_doc(&reaction, payload)
        }
        "TrustGraphNode" => {
            let mut node: TrustGraphNodeDoc = parse(object, space_id)?;
            if node.aid.is_empty() {
                node.aid = object.id.clone();
            }
            let payload = json!({
                "aid": node.aid,
                "alias": node.alias,
                "edges": node.edges.len(),
            });
            Projection::from_doc(&node, payload)
        }
        "UserPreference" => {
            let value = object
                .data
                .get("value")
                .cloned()
                .unwrap_or_else(|| object.data.clone());
            let mut pref = PreferenceDoc::new(object.id.clone(), value);
            if let Some(updated_at) = object
                .data
                .get("updatedAt")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
            {
                pref.updated_at = updated_at;
            }
            let payload = json!({ "key": pref.key });
            Projection::from_doc(&pref, payload)
        }
        _ => {
            let doc = ObjectDoc {
                id: object.id.clone(),
                object_type: object.object_type.clone(),
                data: object.data.clone(),
                version: object.version,
                space_id: Some(space_id.to_string()),
                cached_at: None,
            };
            let mut payload = json!({ "id": object.id, "type": object.object_type });
            // Carry a display label when the object has an obvious one
            for field in ["name", "title", "displayName"] {
                if let Some(label) = object.data.get(field).filter(|v| v.is_string()) {
                    payload[field] = label.clone();
                }
            }
            Projection::from_doc(&doc, payload)
        }
    }
}

/// Project a credential
///
/// Credentials addressed to the caller (own AID or one of its orgs) are
/// announced as `credential:new`, everything else as `credential:community`.
pub fn project_credential(
    credential: &RemoteCredential,
    space_id: &str,
    identity: &dyn IdentityContext,
) -> Result<Projection> {
    let doc = CredentialDoc {
        said: credential.said.clone(),
        issuer: credential.issuer.clone(),
        recipient: credential.recipient.clone(),
        schema: credential.schema.clone(),
        data: credential.data.clone(),
        space_id: Some(space_id.to_string()),
        cached_at: None,
    };
    let payload = json!({
        "said": doc.said,
        "issuer": doc.issuer,
        "recipient": doc.recipient,
        "schema": doc.schema,
    });
    let event = if identity.is_own(&credential.recipient) {
        "credential:new"
    } else {
        "credential:community"
    };

    let mut projection = Projection::from_doc(&doc, payload)?;
    projection.event = Some(event.to_string());
    Ok(projection)
}

/// Collapse repeated ids in a snapshot
///
/// Of two copies the one with the strictly greater version wins; without
/// versions the later copy wins. First-seen order is kept.
pub fn dedup_latest(objects: Vec<RemoteObject>) -> Vec<RemoteObject> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(objects.len());
    let mut out: Vec<RemoteObject> = Vec::with_capacity(objects.len());

    for object in objects {
        match index.get(&object.id) {
            Some(&i) => {
                let keep_existing = matches!(
                    (out[i].version, object.version),
                    (Some(existing), Some(incoming)) if existing > incoming
                );
                if !keep_existing {
                    out[i] = object;
                }
            }
            None => {
                index.insert(object.id.clone(), out.len());
                out.push(object);
            }
        }
    }
    out
}

/// Credentials keyed by SAID, later copies win
pub fn dedup_credentials(credentials: Vec<RemoteCredential>) -> Vec<RemoteCredential> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(credentials.len());
    let mut out: Vec<RemoteCredential> = Vec::with_capacity(credentials.len());
    for credential in credentials {
        match index.get(&credential.said) {
            Some(&i) => out[i] = credential,
            None => {
                index.insert(credential.said.clone(), out.len());
                out.push(credential);
            }
        }
    }
    out
}

/// Parse object data into a schema, filling id, version and space
fn parse<T: serde::de::DeserializeOwned>(object: &RemoteObject, space_id: &str) -> Result<T> {
    let mut map = match &object.data {
        JsonValue::Object(map) => map.clone(),
        JsonValue::Null => Map::new(),
        _ => {
            return Err(WatchError::Serialization(format!(
                "{} '{}' data is not an object",
                object.object_type, object.id
            )))
        }
    };
    map.insert("id".into(), JsonValue::String(object.id.clone()));
    if let Some(version) = object.version {
        map.insert("version".into(), json!(version));
    }
    map.entry("spaceId")
        .or_insert_with(|| JsonValue::String(space_id.to_string()));

    serde_json::from_value(JsonValue::Object(map)).map_err(|e| {
        WatchError::Serialization(format!(
            "{} '{}' does not match its schema: {}",
            object.object_type, object.id, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::StaticIdentity;

    fn object(id: &str, object_type: &str, data: JsonValue, version: Option<u64>) -> RemoteObject {
        RemoteObject {
            id: id.into(),
            object_type: object_type.into(),
            data,
            version,
        }
    }

    #[test]
    fn test_project_message() {
        let obj = object(
            "m1",
            "ChatMessage",
            json!({
                "channelId": "general",
                "senderAid": "alice",
                "senderName": "Alice",
                "content": "hello",
                "sentAt": "2024-05-01T10:00:00Z"
            }),
            Some(1),
        );
        let projection = project_object(&obj, "sp-1").unwrap();

        assert_eq!(projection.collection, "chat_messages");
        assert_eq!(projection.doc_id, "m1");
        assert_eq!(projection.doc["spaceId"], "sp-1");
        assert_eq!(projection.doc["version"], 1);
        assert_eq!(projection.payload["messageId"], "m1");
        assert_eq!(projection.payload["senderName"], "Alice");
        assert_eq!(projection.marker, Some(Marker::new(Some(1), None)));
    }

    #[test]
    fn test_deleted_message_hides_content() {
        let obj = object(
            "m1",
            "ChatMessage",
            json!({
                "channelId": "general",
                "senderAid": "alice",
                "content": "oops",
                "sentAt": "2024-05-01T10:00:00Z",
                "deletedAt": "2024-05-01T10:05:00Z"
            }),
            None,
        );
        let projection = project_object(&obj, "sp-1").unwrap();
        assert_eq!(projection.payload["content"], "");
        assert!(projection.marker.unwrap().mutated_at.is_some());
    }

    #[test]
    fn test_malformed_message_rejected() {
        let obj = object("m1", "ChatMessage", json!({ "content": "no channel" }), None);
        let err = project_object(&obj, "sp-1").unwrap_err();
        assert!(matches!(err, WatchError::Serialization(_)));

        let obj = object("m2", "ChatMessage", json!("just a string"), None);
        assert!(project_object(&obj, "sp-1").is_err());
    }

    #[test]
    fn test_project_trust_graph_node() {
        let obj = object(
            "node-1",
            "TrustGraphNode",
            json!({
                "aid": "carol",
                "alias": "Carol",
                "edges": [
                    { "target": "alice", "credentialSaid": "E1" },
                    { "target": "bob", "weight": 0.5 }
                ],
                "updatedAt": "2024-05-01T10:00:00Z"
            }),
            None,
        );
        let projection = project_object(&obj, "sp-community").unwrap();
        assert_eq!(projection.collection, "trust_graph_cache");
        assert_eq!(projection.doc_id, "carol");
        assert_eq!(projection.doc["edges"][0]["credentialSaid"], "E1");
        assert_eq!(projection.payload["alias"], "Carol");
        assert_eq!(projection.payload["edges"], 2);

        // No aid in the data: keyed by the object id
        let bare = object("dave", "TrustGraphNode", json!({}), None);
        let projection = project_object(&bare, "sp-community").unwrap();
        assert_eq!(projection.doc_id, "dave");
        assert!(projection.doc["updatedAt"].is_string());

        let broken = object("x", "TrustGraphNode", json!({ "edges": "none" }), None);
        assert!(project_object(&broken, "sp-community").is_err());
    }

    #[test]
    fn test_unknown_type_is_generic() {
        let obj = object("b1", "Bookmark", json!({ "title": "Docs", "url": "x" }), None);
        let projection = project_object(&obj, "sp-me").unwrap();
        assert_eq!(projection.collection, "objects_cache");
        assert_eq!(projection.doc_id, "Bookmark:b1");
        assert_eq!(projection.payload["title"], "Docs");
        assert!(projection.marker.is_none());
    }

    #[test]
    fn test_credential_event_by_recipient() {
        let identity = StaticIdentity {
            own_aid: Some("alice".into()),
            ..Default::default()
        };
        let mut credential = RemoteCredential {
            said: "E1".into(),
            issuer: "issuer".into(),
            recipient: "alice".into(),
            schema: "S1".into(),
            data: JsonValue::Null,
        };

        let own = project_credential(&credential, "sp-1", &identity).unwrap();
        assert_eq!(own.event.as_deref(), Some("credential:new"));
        assert_eq!(own.collection, "credentials_cache");

        credential.recipient = "bob".into();
        let other = project_credential(&credential, "sp-1", &identity).unwrap();
        assert_eq!(other.event.as_deref(), Some("credential:community"));
    }

    #[test]
    fn test_dedup_latest() {
        let objects = vec![
            object("a", "ChatMessage", json!({ "n": 1 }), Some(2)),
            object("b", "ChatMessage", json!({ "n": 1 }), None),
            object("a", "ChatMessage", json!({ "n": 2 }), Some(1)),
            object("b", "ChatMessage", json!({ "n": 2 }), None),
        ];
        let deduped = dedup_latest(objects);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "a");
        // Higher version wins even though it came first
        assert_eq!(deduped[0].data["n"], 1);
        // No versions: later copy wins
        assert_eq!(deduped[1].data["n"], 2);
    }
}
