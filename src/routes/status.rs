//! Status endpoint
//!
//! Runtime view: event fan-out counters, one entry per watched space, the
//! caller's space records, and document counts per cached collection.

use bytes::Bytes;
use chrono::Utc;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use super::json_response;
use crate::db::schemas::SpaceDoc;
use crate::events::BroadcasterStats;
use crate::reconcile::TargetStatus;
use crate::server::AppState;
use crate::space::IdentityContext;

/// Status response payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub events: BroadcasterStats,
    pub targets: Vec<TargetStatus>,
    pub spaces: Vec<SpaceDoc>,
    pub collections: Vec<CollectionStatus>,
}

#[derive(Debug, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub documents: usize,
}

/// Handle GET /status
pub fn status_check(state: &AppState) -> Response<Full<Bytes>> {
    let mut collections = Vec::new();
    for name in state.cache.collection_names() {
        match state.cache.collection(&name) {
            Ok(collection) => collections.push(CollectionStatus {
                documents: collection.len(),
                name,
            }),
            Err(e) => warn!(collection = %name, error = %e, "Failed to open collection"),
        }
    }
    collections.sort_by(|a, b| a.name.cmp(&b.name));

    let spaces = match state.router.identity().own_aid() {
        Some(owner) => state.router.records_for(owner).unwrap_or_else(|e| {
            warn!(owner = owner, error = %e, "Failed to read space records");
            Vec::new()
        }),
        None => Vec::new(),
    };

    let status = StatusResponse {
        service: "watchtower",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        events: state.broadcaster.stats(),
        targets: state.reconcilers.statuses(),
        spaces,
        collections,
    };

    json_response(StatusCode::OK, &status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::SpaceKind;

    #[test]
    fn test_status_serialization() {
        let status = StatusResponse {
            service: "watchtower",
            version: "0.1.0",
            uptime_secs: 3,
            events: BroadcasterStats {
                subscribers: 2,
                published: 10,
                delivered: 19,
                dropped: 1,
            },
            targets: vec![],
            spaces: vec![SpaceDoc::new("alice", SpaceKind::Private, "sp-alice")],
            collections: vec![CollectionStatus {
                name: "chat_messages".into(),
                documents: 3,
            }],
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["service"], "watchtower");
        assert_eq!(json["events"]["dropped"], 1);
        assert_eq!(json["collections"][0]["documents"], 3);
        assert_eq!(json["spaces"][0]["spaceId"], "sp-alice");
    }
}
