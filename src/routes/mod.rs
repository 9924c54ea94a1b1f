//! HTTP routes for Watchtower

pub mod cache;
pub mod events;
pub mod health;
pub mod status;
pub mod sync;

pub use cache::handle_cache_request;
pub use events::handle_events;
pub use health::health_check;
pub use status::status_check;
pub use sync::handle_sync_request;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::WatchError;

/// JSON response with permissive CORS
pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Cache-Control", "no-cache")
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(bytes)))
            .unwrap(),
        Err(e) => error_response(WatchError::from(e)),
    }
}

/// JSON error response carrying the error's status code
pub(crate) fn error_response(err: WatchError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    let body = serde_json::json!({ "error": message });

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-cache")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from(r#"{"error":"Internal error"}"#)))
                .unwrap()
        })
}
