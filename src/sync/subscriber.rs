//! Push subscriber - listens to the replication sidecar's event socket
//!
//! The sidecar announces `{"type":"space_synced","spaceId":"..."}` whenever
//! it has pulled new data for a space, as JSON text or MessagePack binary
//! frames. Each announcement triggers that space's reconciler, so clients
//! see changes without waiting for the next tick.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info};

use crate::reconcile::ReconcilerSet;

/// Notification type that triggers a pass
pub const SPACE_SYNCED: &str = "space_synced";

/// Sidecar notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSynced {
    #[serde(rename = "type")]
    pub kind: String,
    pub space_id: String,
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Sidecar event WebSocket URL
    pub url: String,
    /// Reconnection delay on disconnect
    pub reconnect_delay: Duration,
    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,
    /// Ping interval for keepalive
    pub ping_interval: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8090/events".to_string(),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 0, // Infinite
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Push subscriber feeding triggers into the reconcilers
pub struct PushSubscriber {
    config: PushConfig,
    reconcilers: Arc<ReconcilerSet>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PushSubscriber {
    pub fn new(config: PushConfig, reconcilers: Arc<ReconcilerSet>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            reconcilers,
            shutdown_tx,
        }
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run until shutdown, reconnecting on failure
    pub async fn run(&self) {
        let mut reconnect_attempts = 0u32;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            info!(url = %self.config.url, "Connecting to replication events");

            match self.connect_and_listen(&mut shutdown_rx).await {
                Ok(true) => break,
                Ok(false) => reconnect_attempts = 0,
                Err(e) => {
                    error!(error = %e, "Replication event connection error");
                    reconnect_attempts += 1;

                    if self.config.max_reconnect_attempts > 0
                        && reconnect_attempts >= self.config.max_reconnect_attempts
                    {
                        error!(
                            attempts = reconnect_attempts,
                            "Max reconnection attempts reached, push triggers disabled"
                        );
                        break;
                    }
                }
            }

            debug!(
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                attempt = reconnect_attempts,
                "Reconnecting to replication events"
            );

            tokio::select! {
                _ = sleep(self.config.reconnect_delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("Push subscriber stopped");
    }

    /// Listen on one connection; `Ok(true)` means shutdown was requested
    async fn connect_and_listen(
        &self,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<bool, String> {
        let ws_stream = tokio::select! {
            connected = connect_async(&self.config.url) => {
                connected.map_err(|e| format!("WebSocket connect failed: {}", e))?.0
            }
            _ = shutdown_rx.recv() => return Ok(true),
        };

        info!("Connected to replication events");

        let (mut write, mut read) = ws_stream.split();
        let mut ping_interval = tokio::time::interval(self.config.ping_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    let _ = write.close().await;
                    return Ok(true);
                }

                _ = ping_interval.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        return Err(format!("Ping failed: {}", e));
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(space_id) = decode_text(&text) {
                                self.dispatch(&space_id);
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if let Some(space_id) = decode_binary(&data) {
                                self.dispatch(&space_id);
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Replication sidecar closed connection");
                            return Ok(false);
                        }
                        Some(Err(e)) => return Err(format!("WebSocket error: {}", e)),
                        None => return Err("WebSocket stream ended".to_string()),
                        _ => {}
                    }
                }
            }
        }
    }

    fn dispatch(&self, space_id: &str) {
        if self.reconcilers.trigger(space_id) {
            debug!(space_id = %space_id, "Reconciliation triggered by push");
        }
    }
}

/// Space id of a JSON text frame, if it is a `space_synced` notification
pub fn decode_text(text: &str) -> Option<String> {
    match serde_json::from_str::<JsonValue>(text) {
        Ok(value) => synced_space(&value),
        Err(e) => {
            debug!(error = %e, "Ignoring non-JSON event frame");
            None
        }
    }
}

/// Space id of a MessagePack frame (JSON bytes are accepted too)
pub fn decode_binary(data: &[u8]) -> Option<String> {
    match rmp_serde::from_slice::<JsonValue>(data) {
        Ok(value) => synced_space(&value),
        Err(_) => std::str::from_utf8(data).ok().and_then(decode_text),
    }
}

/// Extract the space id from a notification, bare or wrapped in `data`
fn synced_space(value: &JsonValue) -> Option<String> {
    if let Ok(note) = serde_json::from_value::<SpaceSynced>(value.clone()) {
        return (note.kind == SPACE_SYNCED).then_some(note.space_id);
    }
    if let Some(inner) = value.get("data") {
        return synced_space(inner);
    }
    debug!(frame = ?value, "Unrecognized event frame");
    None
}
