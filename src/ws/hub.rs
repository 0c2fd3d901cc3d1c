// =============================================================================
// Broadcast Hub — fan-out of typed messages to every connected client
// =============================================================================
//
// One dispatcher task drains an unbounded queue of pending broadcasts and
// writes to each client's outbound channel in turn, so messages enqueued by
// any single producer reach every surviving client in enqueue order. A client
// whose channel is gone is dropped from the registry on the spot. The
// registry mutex is held only long enough to iterate and send.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::message::{normalize, WsMessage};

/// Handle to one connected client.
struct Client {
    sender: mpsc::UnboundedSender<String>,
}

/// The process-wide broadcast hub. Constructed once at startup and shared via
/// `Arc`.
pub struct Hub {
    clients: Mutex<HashMap<Uuid, Client>>,
    queue: mpsc::UnboundedSender<WsMessage>,
    /// Identifies this server run in `connection` frames.
    session_id: String,
}

impl Hub {
    /// Create the hub and spawn its dispatcher task.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            clients: Mutex::new(HashMap::new()),
            queue: tx,
            session_id: Uuid::new_v4().to_string(),
        });

        let dispatcher = hub.clone();
        tokio::spawn(async move {
            dispatcher.dispatch_loop(rx).await;
        });

        hub
    }

    /// Server session identifier, stable for the process lifetime.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Enqueue a message for delivery to every connected client.
    pub fn broadcast(&self, message: WsMessage) {
        // The receiver lives in the dispatcher task, which runs for the
        // process lifetime; a send failure means shutdown is in progress.
        if self.queue.send(message).is_err() {
            warn!("broadcast queue closed — dropping message");
        }
    }

    /// Normalize an arbitrary producer frame and enqueue it. Frames that
    /// cannot be made canonical are dropped with a warning.
    pub fn broadcast_raw(&self, raw: serde_json::Value) {
        match normalize(raw) {
            Some(msg) => self.broadcast(msg),
            None => warn!("dropping non-canonical broadcast frame"),
        }
    }

    /// Register a new client. Returns its id and the outbound channel the
    /// connection task must drain into the socket.
    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.clients.lock().insert(id, Client { sender: tx });
        debug!(client_id = %id, "ws client registered");
        (id, rx)
    }

    /// Remove a client from the registry.
    pub fn unregister(&self, id: Uuid) {
        if self.clients.lock().remove(&id).is_some() {
            debug!(client_id = %id, "ws client unregistered");
        }
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    async fn dispatch_loop(&self, mut rx: mpsc::UnboundedReceiver<WsMessage>) {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to serialise broadcast — dropping");
                    continue;
                }
            };

            let mut dead = Vec::new();
            {
                let clients = self.clients.lock();
                for (id, client) in clients.iter() {
                    if client.sender.send(json.clone()).is_err() {
                        dead.push(*id);
                    }
                }
            }

            if !dead.is_empty() {
                let mut clients = self.clients.lock();
                for id in dead {
                    clients.remove(&id);
                    debug!(client_id = %id, "dropped dead ws client");
                }
            }

            trace!(len = json.len(), "broadcast dispatched");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::message::WsPayload;

    async fn recv_json(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        let raw = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for broadcast")
            .expect("channel closed");
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client_in_order() {
        let hub = Hub::new();
        let (_id1, mut rx1) = hub.register();
        let (_id2, mut rx2) = hub.register();

        for i in 0..3 {
            hub.broadcast(WsMessage::now(WsPayload::Info {
                message: format!("msg-{i}"),
            }));
        }

        for rx in [&mut rx1, &mut rx2] {
            for i in 0..3 {
                let value = recv_json(rx).await;
                assert_eq!(value["type"], "info");
                assert_eq!(value["message"], format!("msg-{i}"));
            }
        }
    }

    #[tokio::test]
    async fn dead_client_is_dropped_and_others_keep_receiving() {
        let hub = Hub::new();
        let (_id1, rx1) = hub.register();
        let (_id2, mut rx2) = hub.register();
        assert_eq!(hub.client_count(), 2);

        drop(rx1);
        hub.broadcast(WsMessage::now(WsPayload::Info { message: "one".into() }));
        hub.broadcast(WsMessage::now(WsPayload::Info { message: "two".into() }));

        assert_eq!(recv_json(&mut rx2).await["message"], "one");
        assert_eq!(recv_json(&mut rx2).await["message"], "two");

        // The dispatcher observed the closed channel on the first send.
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn raw_frames_are_normalized_before_fanout() {
        let hub = Hub::new();
        let (_id, mut rx) = hub.register();

        hub.broadcast_raw(serde_json::json!({
            "type": "stage_progress",
            "data": {
                "pipeline_id": "p1",
                "stage": "scraping",
                "progress": 55.0,
                "message": "halfway",
            },
        }));

        let value = recv_json(&mut rx).await;
        assert_eq!(value["type"], "pipeline_progress");
        assert_eq!(value["stage"], "scraping");
        assert_eq!(value["progress"], 55.0);
        assert!(value.get("data").is_none());
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let hub = Hub::new();
        let (id, mut rx) = hub.register();
        hub.unregister(id);
        assert_eq!(hub.client_count(), 0);

        hub.broadcast(WsMessage::now(WsPayload::Info { message: "late".into() }));
        // Give the dispatcher a beat; nothing should arrive.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
