// =============================================================================
// WebSocket Connection Handler — upgrade, heartbeat tracking, fan-in/fan-out
// =============================================================================
//
// Each connection runs one task that interleaves three concerns:
//   1. Drain the hub's per-client outbound channel into the socket.
//   2. Read inbound frames (heartbeats and legacy producer frames).
//   3. Watch for silence: no reads for twice the heartbeat interval means the
//      peer is gone and the connection is closed.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::ws::message::{ConnectionStatus, WsMessage, WsPayload};

/// Axum handler for the WebSocket upgrade request. The license gate runs as
/// route middleware before this is reached.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let hub = state.hub.clone();
    let (client_id, mut outbound) = hub.register();
    let (mut sender, mut receiver) = socket.split();

    // Greet the new client directly; the frame is not a broadcast.
    let hello = WsMessage::now(WsPayload::Connection {
        status: ConnectionStatus::Connected,
        client_id: client_id.to_string(),
        session_id: hub.session_id().to_string(),
    });
    if let Ok(json) = serde_json::to_string(&hello) {
        if sender.send(Message::Text(json)).await.is_err() {
            hub.unregister(client_id);
            return;
        }
    }

    info!(client_id = %client_id, clients = hub.client_count(), "ws client connected");

    let heartbeat = Duration::from_secs(state.config.heartbeat_secs);
    let dead_after = heartbeat * 2;
    let mut last_read = Instant::now();
    let mut liveness = interval(heartbeat);

    loop {
        tokio::select! {
            // ── Outbound: hub broadcasts for this client ────────────────
            queued = outbound.recv() => {
                match queued {
                    Some(json) => {
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(client_id = %client_id, error = %e, "ws send failed — disconnecting");
                            break;
                        }
                    }
                    None => break, // hub dropped us
                }
            }

            // ── Inbound: heartbeats and client frames ───────────────────
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_read = Instant::now();
                        handle_inbound(&hub, &text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_read = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_read = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(client_id = %client_id, "ws close frame received");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_read = Instant::now();
                        debug!(client_id = %client_id, "ws binary frame ignored");
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, error = %e, "ws receive error");
                        break;
                    }
                    None => break,
                }
            }

            // ── Liveness: drop peers silent for ~2× the heartbeat ───────
            _ = liveness.tick() => {
                if last_read.elapsed() > dead_after {
                    warn!(client_id = %client_id, "ws client silent too long — dropping");
                    break;
                }
            }
        }
    }

    hub.unregister(client_id);
    info!(client_id = %client_id, clients = hub.client_count(), "ws client disconnected");
}

/// Frame types local producers may push over the socket; they are normalized
/// and re-broadcast so every client sees the canonical shape.
const PRODUCER_TYPES: &[&str] = &["stage_progress", "refresh", "output", "log"];

/// Process one inbound text frame. Heartbeats are acknowledged silently;
/// legacy producer frames go through the normalizer and back out to every
/// client; anything else is logged and dropped.
fn handle_inbound(hub: &crate::ws::Hub, text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => {
            let msg_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("?");
            if msg_type == "heartbeat" {
                return;
            }
            if PRODUCER_TYPES.contains(&msg_type) {
                hub.broadcast_raw(value);
            } else {
                debug!(msg_type, "inbound ws frame ignored");
            }
        }
        Err(e) => debug!(error = %e, "unparseable inbound ws frame"),
    }
}
