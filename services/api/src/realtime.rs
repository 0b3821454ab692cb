//! Realtime subscription endpoint.
//!
//! After the WebSocket handshake a connection receives every transition on
//! the broadcast topic; clients may additionally join per-photo topics with
//! `{"action": "subscribe", "photoId": "..."}`. One task owns the socket
//! writer; topic forwarders feed it through a bounded channel, and a slow
//! connection loses the oldest broker entries rather than stalling anyone.

use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use photoflow_core::{photo_topic, StatusBroker, StatusUpdate, BROADCAST_TOPIC};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound buffer per connection; forwarders block on it, which pushes lag
/// back onto the broker's drop-oldest buffers.
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientCommand {
    action: String,
    photo_id: Option<Uuid>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state.broker.clone()))
}

async fn handle_socket(socket: WebSocket, broker: Arc<StatusBroker>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<StatusUpdate>(OUTBOUND_BUFFER);

    // Every connection starts on the broadcast topic.
    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();
    forwarders.insert(
        BROADCAST_TOPIC.to_string(),
        spawn_forwarder(broker.subscribe(BROADCAST_TOPIC), tx.clone()),
    );

    let writer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            let payload = match serde_json::to_string(&update) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to encode status update");
                    continue;
                }
            };
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    info!("Realtime subscriber connected");

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => {
                    handle_command(&broker, &tx, &mut forwarders, command);
                }
                Err(e) => {
                    debug!(error = %e, "Ignoring unparseable client message");
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {} // ping/pong handled by axum
        }
    }

    for (_, handle) in forwarders.drain() {
        handle.abort();
    }
    writer.abort();
    broker.prune();

    info!("Realtime subscriber disconnected");
}

fn handle_command(
    broker: &StatusBroker,
    tx: &mpsc::Sender<StatusUpdate>,
    forwarders: &mut HashMap<String, JoinHandle<()>>,
    command: ClientCommand,
) {
    let Some(photo_id) = command.photo_id else {
        debug!(action = %command.action, "Client command without photoId");
        return;
    };
    let topic = photo_topic(photo_id);

    match command.action.as_str() {
        "subscribe" => {
            if !forwarders.contains_key(&topic) {
                debug!(topic = %topic, "Client joined photo topic");
                forwarders.insert(topic.clone(), spawn_forwarder(broker.subscribe(&topic), tx.clone()));
            }
        }
        "unsubscribe" => {
            if let Some(handle) = forwarders.remove(&topic) {
                debug!(topic = %topic, "Client left photo topic");
                handle.abort();
            }
        }
        other => {
            debug!(action = %other, "Unknown client action");
        }
    }
}

/// Pump one topic subscription into the connection's outbound channel.
fn spawn_forwarder(
    mut rx: broadcast::Receiver<StatusUpdate>,
    tx: mpsc::Sender<StatusUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    if tx.send(update).await.is_err() {
                        break; // connection closed
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Oldest entries were dropped; freshness wins, the
                    // polling endpoint recovers the rest.
                    warn!(skipped, "Subscriber lagged, dropped oldest updates");
                    metrics::counter!("notify.dropped").increment(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
