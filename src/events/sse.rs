//! Server-sent event framing
//!
//! Each change record becomes
//!
//! ```text
//! event: chat:message:new
//! data: {"type":"ChatMessage","id":"m3",...}
//!
//! ```
//!
//! and an idle stream gets a `: keepalive` comment every interval so
//! proxies do not close it.

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::Subscription;
use crate::reconcile::ChangeRecord;

/// Default keepalive interval
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

const KEEPALIVE_FRAME: &[u8] = b": keepalive\n\n";

/// Render one record as an SSE frame
pub fn format_event(record: &ChangeRecord) -> Bytes {
    let data = record.wire_body().to_string();
    // Event names never contain newlines, JSON from serde_json never does either
    Bytes::from(format!("event: {}\ndata: {}\n\n", record.event, data))
}

/// Comment frame opening a stream
pub fn format_hello(subscription: &Subscription) -> Bytes {
    Bytes::from(format!(": connected {}\n\n", subscription.id()))
}

/// Turn a subscription into a stream of SSE frames
///
/// The stream ends when the subscription is closed. Dropping the stream
/// drops the subscription, which the broadcaster then prunes.
pub fn event_stream(subscription: Subscription, keepalive: Duration) -> impl Stream<Item = Bytes> + Send {
    let mut ticker = interval_at(Instant::now() + keepalive, keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let hello = format_hello(&subscription);
    let frames = stream::unfold(
        (subscription, ticker),
        |(mut subscription, mut ticker): (Subscription, Interval)| async move {
            let frame = tokio::select! {
                record = subscription.recv() => match record {
                    Some(record) => {
                        ticker.reset();
                        format_event(&record)
                    }
                    None => return None,
                },
                _ = ticker.tick() => Bytes::from_static(KEEPALIVE_FRAME),
            };
            Some((frame, (subscription, ticker)))
        },
    );

    stream::once(async move { hello }).chain(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Broadcaster;
    use crate::reconcile::ChangeKind;
    use serde_json::json;

    #[test]
    fn test_format_event() {
        let record = ChangeRecord::new(
            ChangeKind::New,
            "ChatMessage",
            "m3",
            json!({ "messageId": "m3", "content": "hi\nthere" }),
            "sp-1",
        );
        let frame = format_event(&record);
        let text = std::str::from_utf8(&frame).unwrap();

        assert!(text.starts_with("event: chat:message:new\ndata: {"));
        assert!(text.ends_with("\n\n"));
        // Only the terminating blank line, embedded newlines are escaped
        assert_eq!(text.matches('\n').count(), 3);
    }

    #[tokio::test]
    async fn test_stream_yields_records() {
        let hub = Broadcaster::default();
        let sub = hub.subscribe().await;
        let id = sub.id();
        let mut frames = Box::pin(event_stream(sub, KEEPALIVE_INTERVAL));

        let hello = frames.next().await.unwrap();
        assert!(hello.starts_with(b": connected"));

        hub.broadcast(ChangeRecord::new(
            ChangeKind::New,
            "ChatChannel",
            "general",
            json!({ "channelId": "general" }),
            "sp-1",
        ))
        .await;
        let frame = frames.next().await.unwrap();
        assert!(frame.starts_with(b"event: chat:channel:new\n"));

        hub.unsubscribe(id).await;
        assert!(frames.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_when_idle() {
        let hub = Broadcaster::default();
        let sub = hub.subscribe().await;
        let mut frames = Box::pin(event_stream(sub, Duration::from_secs(15)));

        frames.next().await.unwrap();
        let frame = frames.next().await.unwrap();
        assert_eq!(&frame[..], KEEPALIVE_FRAME);
    }

    #[tokio::test]
    async fn test_idle_stream_is_pending() {
        let hub = Broadcaster::default();
        let sub = hub.subscribe().await;
        let mut frames = Box::pin(event_stream(sub, KEEPALIVE_INTERVAL));
        frames.next().await.unwrap();

        let mut next = tokio_test::task::spawn(frames.next());
        tokio_test::assert_pending!(next.poll());
    }
}
