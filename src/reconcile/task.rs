//! Background task driving a reconciler
//!
//! The task waits on {shutdown, ticker, push trigger} and runs the same
//! pass for both triggers. A pass in flight always finishes before the
//! task observes shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::target::{Reconciler, TargetStatus};

/// Handle to a running reconciler task
pub struct ReconcilerHandle {
    reconciler: Arc<Reconciler>,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
    join: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Start the background task of a reconciler
pub fn spawn_reconciler(reconciler: Arc<Reconciler>) -> ReconcilerHandle {
    // One pending trigger is enough; more would run the same pass again
    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let join = tokio::spawn(run(Arc::clone(&reconciler), trigger_rx, shutdown_rx));

    ReconcilerHandle {
        reconciler,
        trigger_tx,
        shutdown_tx,
        join: std::sync::Mutex::new(Some(join)),
    }
}

async fn run(
    reconciler: Arc<Reconciler>,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let space_id = reconciler.space_id().to_string();
    let mut ticker = tokio::time::interval(reconciler.config().interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        space_id = %space_id,
        types = ?reconciler.target().object_types,
        interval_ms = reconciler.config().interval.as_millis() as u64,
        "Reconciler started"
    );

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
            Some(()) = trigger_rx.recv() => {
                debug!(space_id = %space_id, "Push trigger");
            }
        }

        reconciler.run_pass().await;
    }

    info!(space_id = %space_id, "Reconciler stopped");
}

impl ReconcilerHandle {
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn space_id(&self) -> &str {
        self.reconciler.space_id()
    }

    /// Request a pass now
    ///
    /// Returns false once the task has stopped. A trigger arriving while
    /// one is already pending is folded into it.
    pub fn trigger(&self) -> bool {
        match self.trigger_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Signal shutdown and wait for the task to exit
    ///
    /// Waits at most the configured shutdown timeout. Returns true if the
    /// task exited in time.
    pub async fn stop(&self) -> bool {
        let _ = self.shutdown_tx.send(true);

        let join = self
            .join
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(join) = join else {
            return true;
        };

        let timeout = self.reconciler.config().shutdown_timeout;
        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(space_id = %self.space_id(), error = %e, "Reconciler task failed");
                true
            }
            Err(_) => {
                warn!(
                    space_id = %self.space_id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Reconciler did not stop in time"
                );
                false
            }
        }
    }
}

/// All running reconcilers, keyed by space id
#[derive(Default)]
pub struct ReconcilerSet {
    handles: HashMap<String, ReconcilerHandle>,
}

impl ReconcilerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ReconcilerHandle) {
        self.handles.insert(handle.space_id().to_string(), handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, space_id: &str) -> Option<&ReconcilerHandle> {
        self.handles.get(space_id)
    }

    /// Trigger the reconciler of a space; false if the space is not monitored
    pub fn trigger(&self, space_id: &str) -> bool {
        match self.handles.get(space_id) {
            Some(handle) => handle.trigger(),
            None => {
                debug!(space_id = %space_id, "Trigger for unmonitored space");
                false
            }
        }
    }

    pub fn statuses(&self) -> Vec<TargetStatus> {
        let mut statuses: Vec<_> = self
            .handles
            .values()
            .map(|h| h.reconciler().status())
            .collect();
        statuses.sort_by(|a, b| a.space_id.cmp(&b.space_id));
        statuses
    }

    /// Stop every reconciler concurrently; returns how many exited in time
    pub async fn stop_all(&self) -> usize {
        let results =
            futures_util::future::join_all(self.handles.values().map(|h| h.stop())).await;
        results.into_iter().filter(|stopped| *stopped).count()
    }
}
