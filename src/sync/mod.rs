//! Push notifications from the replication sidecar

pub mod subscriber;

pub use subscriber::{PushConfig, PushSubscriber, SpaceSynced};
