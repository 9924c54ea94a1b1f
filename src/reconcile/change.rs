//! Change records
//!
//! A change record is produced once per object that goes from unknown to
//! known (kind `new`), or once per forward move of a known object's mutable
//! marker (kind `updated`). Records are immutable and shared between
//! subscribers behind an `Arc`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Origin tag for records derived from replicated data
pub const ORIGIN_REPLICATED: &str = "replicated";

/// What happened to the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Updated,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::New => f.write_str("new"),
            ChangeKind::Updated => f.write_str("updated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Event name on the stream, e.g. `chat:message:new`
    pub event: String,
    pub kind: ChangeKind,
    pub object_type: String,
    pub object_id: String,
    /// Denormalized display fields
    pub payload: JsonValue,
    pub origin: String,
    pub space_id: String,
    pub at: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn new(
        kind: ChangeKind,
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        payload: JsonValue,
        space_id: impl Into<String>,
    ) -> Self {
        let object_type = object_type.into();
        Self {
            event: event_name(&object_type, kind),
            kind,
            object_type,
            object_id: object_id.into(),
            payload,
            origin: ORIGIN_REPLICATED.to_string(),
            space_id: space_id.into(),
            at: Utc::now(),
        }
    }

    /// Override the derived event name
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    /// JSON body sent to stream clients
    pub fn wire_body(&self) -> JsonValue {
        serde_json::json!({
            "type": self.object_type,
            "id": self.object_id,
            "payload": self.payload,
            "origin": self.origin,
            "at": self.at.to_rfc3339(),
        })
    }
}

/// Event name for an object type and change kind
///
/// Chat types map onto the `chat:` namespace. Anything else is the type name
/// in kebab case, e.g. `MemberProfile` becomes `member-profile:new`.
pub fn event_name(object_type: &str, kind: ChangeKind) -> String {
    match object_type {
        "ChatChannel" => format!("chat:channel:{}", kind),
        "ChatMessage" => format!("chat:message:{}", kind),
        "ChatReaction" => format!("chat:reaction:{}", kind),
        "Credential" => format!("credential:{}", kind),
        other => format!("{}:{}", kebab_case(other), kind),
    }
}

fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else if c == '_' || c == ' ' {
            out.push('-');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names() {
        assert_eq!(event_name("ChatMessage", ChangeKind::New), "chat:message:new");
        assert_eq!(
            event_name("ChatMessage", ChangeKind::Updated),
            "chat:message:updated"
        );
        assert_eq!(event_name("ChatChannel", ChangeKind::New), "chat:channel:new");
        assert_eq!(event_name("MemberProfile", ChangeKind::New), "member-profile:new");
        assert_eq!(event_name("Bookmark", ChangeKind::New), "bookmark:new");
    }

    #[test]
    fn test_wire_body() {
        let record = ChangeRecord::new(
            ChangeKind::New,
            "ChatMessage",
            "m3",
            json!({ "messageId": "m3" }),
            "sp-community",
        );
        let body = record.wire_body();
        assert_eq!(body["type"], "ChatMessage");
        assert_eq!(body["id"], "m3");
        assert_eq!(body["origin"], "replicated");
        assert_eq!(body["payload"]["messageId"], "m3");
    }
}
