//! Chat channel, message and reaction schemas

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::collection::CachedDocument;

/// Collection name for chat channels
pub const CHANNEL_COLLECTION: &str = "chat_channels";

/// Collection name for chat messages
pub const MESSAGE_COLLECTION: &str = "chat_messages";

/// Collection name for reactions
pub const REACTION_COLLECTION: &str = "chat_reactions";

/// Chat channel
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDoc {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// AID of the channel creator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_archived: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,

    #[serde(rename = "_cachedAt", default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl CachedDocument for ChannelDoc {
    const COLLECTION: &'static str = CHANNEL_COLLECTION;

    fn doc_id(&self) -> String {
        self.id.clone()
    }
}

/// Chat message
///
/// `edited_at`, `deleted_at` and `version` are the mutable markers: a known
/// message whose markers move forward is re-cached and announced as updated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDoc {
    pub id: String,

    pub channel_id: String,

    pub sender_aid: String,

    /// Display name at send time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    #[serde(default)]
    pub content: String,

    /// Parent message id for threaded replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    pub sent_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,

    #[serde(rename = "_cachedAt", default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl MessageDoc {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl CachedDocument for MessageDoc {
    const COLLECTION: &'static str = MESSAGE_COLLECTION;

    fn doc_id(&self) -> String {
        self.id.clone()
    }

    fn indices() -> Vec<Vec<&'static str>> {
        // Channel history, newest first
        vec![vec!["channelId", "sentAt"]]
    }
}

/// Emoji reaction on a message
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionDoc {
    pub id: String,

    pub message_id: String,

    pub emoji: String,

    pub reactor_aid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,

    #[serde(rename = "_cachedAt", default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl CachedDocument for ReactionDoc {
    const COLLECTION: &'static str = REACTION_COLLECTION;

    fn doc_id(&self) -> String {
        self.id.clone()
    }

    fn indices() -> Vec<Vec<&'static str>> {
        vec![vec!["messageId"]]
    }
}
