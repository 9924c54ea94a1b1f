//! Live event fan-out
//!
//! The [`Broadcaster`] delivers change records to every connected
//! subscriber without ever waiting on a slow one. [`sse`] renders a
//! subscription as a server-sent event stream.

pub mod broadcaster;
pub mod sse;

use std::sync::Arc;

use async_trait::async_trait;

use crate::reconcile::ChangeRecord;

pub use broadcaster::{
    BroadcastReport, Broadcaster, BroadcasterConfig, BroadcasterStats, Subscription,
    SubscriptionId,
};

/// Sink for change records, consumed by the reconciliation loop
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hand a record to every current subscriber
    async fn publish(&self, record: ChangeRecord);

    /// Whether anyone is listening
    async fn has_subscribers(&self) -> bool;
}

#[async_trait]
impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    async fn publish(&self, record: ChangeRecord) {
        (**self).publish(record).await
    }

    async fn has_subscribers(&self) -> bool {
        (**self).has_subscribers().await
    }
}
