//! Live event stream
//!
//! GET /events subscribes to the broadcaster and streams change records as
//! server-sent events until the client goes away.

use std::sync::Arc;

use futures_util::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::{Response, StatusCode};
use tracing::info;

use crate::events::sse::event_stream;
use crate::server::{AppState, BoxBody};

/// Handle GET /events
pub async fn handle_events(state: Arc<AppState>) -> Response<BoxBody> {
    let subscription = state.broadcaster.subscribe().await;
    info!(
        subscription = %subscription.id(),
        subscribers = state.broadcaster.subscriber_count(),
        "Event stream opened"
    );

    let frames = event_stream(subscription, state.args.sse_keepalive())
        .map(|frame| Ok::<_, hyper::Error>(Frame::data(frame)));

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .header("Access-Control-Allow-Origin", "*")
        .body(StreamBody::new(frames).boxed_unsync())
        .unwrap()
}
