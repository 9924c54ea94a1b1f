//! Manual reconciliation trigger
//!
//! POST /api/sync/{spaceId} asks the space's reconciler for a pass now,
//! the same way a push notification from the sidecar does.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;
use tracing::debug;

use super::{error_response, json_response};
use crate::server::http::bad_request_response;
use crate::server::AppState;
use crate::types::WatchError;

/// Handle POST /api/sync/{spaceId}
pub fn handle_sync_request(state: &AppState, path: &str) -> Response<Full<Bytes>> {
    let space_id = path.strip_prefix("/api/sync/").unwrap_or("").trim_matches('/');
    if space_id.is_empty() || space_id.contains('/') {
        return bad_request_response("Expected /api/sync/{spaceId}");
    }

    if state.reconcilers.get(space_id).is_none() {
        return error_response(WatchError::NotFound(format!(
            "space '{}' is not watched",
            space_id
        )));
    }

    if state.reconcilers.trigger(space_id) {
        debug!(space_id = %space_id, "Manual trigger");
        json_response(
            StatusCode::ACCEPTED,
            &json!({ "spaceId": space_id, "triggered": true }),
        )
    } else {
        error_response(WatchError::Internal(format!(
            "reconciler for '{}' has stopped",
            space_id
        )))
    }
}
