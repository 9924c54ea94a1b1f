//! Watchtower - replica watcher for community spaces
//!
//! Watchtower polls the spaces a replication sidecar keeps in sync, caches
//! every replicated object in a local document store, and streams what is
//! new to connected clients as change records.
//!
//! - [`db`]: persistent document cache (sled) with secondary indexes
//! - [`space`]: object type to space routing and space records
//! - [`reconcile`]: per-space read, diff and emit loop
//! - [`events`]: fan-out of change records and SSE framing
//! - [`sync`]: push triggers from the sidecar
//! - [`server`], [`routes`]: HTTP surface

pub mod config;
pub mod db;
pub mod events;
pub mod reconcile;
pub mod routes;
pub mod server;
pub mod space;
pub mod sync;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, WatchError};
