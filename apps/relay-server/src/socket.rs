//! Per-connection WebSocket handling

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use shared_protocol::RelayMessage;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{AppState, ConnectOutcome};

pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<RelayMessage>();

    // Forward queued messages to the socket
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let json = match msg.to_json() {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };

            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // The registry queues Welcome and the pairing status itself
    let (peer_id, outcome) = state.registry.connect(msg_tx.clone());
    if let ConnectOutcome::Paired { partner, .. } = &outcome {
        debug!(%peer_id, partner = %partner.id, "joined an existing waiter");
    }

    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => match RelayMessage::from_json(text.as_str()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(%peer_id, "Invalid message format: {}", e);
                    let _ = msg_tx.send(RelayMessage::Error {
                        message: format!("Invalid message: {e}"),
                    });
                    continue;
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(%peer_id, "Ignoring binary frame");
                continue;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(%peer_id, "WebSocket error: {}", e);
                break;
            }
        };

        match msg {
            RelayMessage::SendMessage { target, msg } => {
                match state.registry.route(peer_id, target, &msg) {
                    Ok(routed) => {
                        if !routed.deliver() {
                            debug!(%peer_id, %target, "target went away before delivery");
                        }
                    }
                    Err(e) => {
                        warn!(%peer_id, %target, error = %e, "routing failed");
                        let _ = msg_tx.send(RelayMessage::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }

            RelayMessage::Ping => {
                let _ = msg_tx.send(RelayMessage::Pong);
            }

            _ => {
                debug!(%peer_id, "Unhandled message type");
            }
        }
    }

    if let Some(survivor) = state.registry.disconnect(peer_id) {
        info!(peer_id = %survivor.id, "partner left, back to waiting");
    }

    forward_task.abort();
}
