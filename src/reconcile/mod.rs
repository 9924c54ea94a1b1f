//! Reconciliation loop
//!
//! ```text
//! ticker / push ──► ReconcilerHandle ──► Reconciler::reconcile_pass
//!                                          │ read snapshots (ObjectReader)
//!                                          │ diff against KnownObjects
//!                                          │ upsert (DocumentStore)
//!                                          └ publish (EventSink)
//! ```

pub mod change;
pub mod known;
pub mod project;
pub mod reader;
pub mod target;
pub mod task;

pub use change::{event_name, ChangeKind, ChangeRecord};
pub use known::{KnownObjects, Marker, Phase};
pub use reader::{HttpObjectReader, HttpReaderConfig, ObjectReader, RemoteCredential, RemoteObject};
pub use target::{PassReport, ReconcileConfig, Reconciler, SkipReason, TargetStatus};
pub use task::{spawn_reconciler, ReconcilerHandle, ReconcilerSet};
