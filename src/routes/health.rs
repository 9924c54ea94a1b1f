//! Liveness probe
//!
//! /health and /healthz return 200 whenever the process is serving; the
//! body says whether anything is actually being watched.

use bytes::Bytes;
use chrono::Utc;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::server::AppState;

/// Health response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_secs: i64,
    /// Number of spaces with a running reconciler
    pub watching: usize,
    pub subscribers: usize,
}

/// Handle GET /health
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let now = Utc::now();
    let health = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        watching: state.reconcilers.len(),
        subscribers: state.broadcaster.subscriber_count(),
    };
    json_response(StatusCode::OK, &health)
}
