//! Relay client
//!
//! Talks to the relay server over WebSocket. The relay pairs this client with
//! another one and hands both the pairing key used to open forwarded messages.

use std::time::Duration;

use crypto_session::{CryptoSession, SessionKey};
use futures::{SinkExt, StreamExt};
use shared_protocol::{PairingStatus, PeerId, RelayMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Relay client error
#[derive(Debug, thiserror::Error)]
pub enum RelayClientError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Channel error")]
    Channel,
}

pub type RelayClientResult<T> = Result<T, RelayClientError>;

/// WebSocket connection to the relay
pub struct RelayClient {
    server_url: String,
}

impl RelayClient {
    pub fn new(server_url: String) -> Self {
        Self { server_url }
    }

    /// Connect to the relay server
    ///
    /// Returns a sender for messages to the relay and a receiver for messages
    /// from it. Dropping the sender ends the connection.
    pub async fn connect(
        &self,
    ) -> RelayClientResult<(mpsc::Sender<RelayMessage>, mpsc::Receiver<RelayMessage>)> {
        info!("Connecting to relay server: {}", self.server_url);

        let (ws_stream, _) = connect_async(&self.server_url)
            .await
            .map_err(|e| RelayClientError::Connection(e.to_string()))?;

        info!("WebSocket connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // Application -> relay
        let (send_tx, mut send_rx) = mpsc::channel::<RelayMessage>(100);

        // Relay -> application
        let (recv_tx, recv_rx) = mpsc::channel::<RelayMessage>(100);

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    outgoing = send_rx.recv() => {
                        let Some(msg) = outgoing else {
                            let _ = ws_tx.close().await;
                            break;
                        };
                        let json = match msg.to_json() {
                            Ok(j) => j,
                            Err(e) => {
                                error!("Failed to serialize outgoing message: {}", e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                            error!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }

                    _ = heartbeat.tick() => {
                        if let Ok(json) = RelayMessage::Ping.to_json() {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }

                    incoming = ws_rx.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match RelayMessage::from_json(text.as_str()) {
                                Ok(parsed) => {
                                    if let Err(e) = recv_tx.send(parsed).await {
                                        warn!("Failed to forward incoming message: {}", e);
                                        break;
                                    }
                                }
                                Err(e) => warn!("Failed to parse incoming message: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Relay closed connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("WebSocket receive error: {}", e);
                            break;
                        }
                    },
                }
            }
            info!("Relay loop ended");
        });

        Ok((send_tx, recv_rx))
    }
}

/// Pairing currently known to this client
struct ActivePairing {
    partner: PeerId,
    session: CryptoSession,
}

/// Interactive relay chat until `exit`, end of input or disconnect
pub async fn run(server_url: String) -> anyhow::Result<()> {
    let client = RelayClient::new(server_url);
    let (tx, mut rx) = client.connect().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pairing: Option<ActivePairing> = None;

    loop {
        tokio::select! {
            incoming = rx.recv() => {
                let Some(message) = incoming else {
                    println!("Relay connection closed");
                    break;
                };
                handle_message(message, &mut pairing);
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line.eq_ignore_ascii_case("exit") {
                    break;
                }

                let Some(active) = &pairing else {
                    println!("Not paired yet; waiting for a partner");
                    continue;
                };
                tx.send(RelayMessage::SendMessage {
                    target: active.partner,
                    msg: line.to_string(),
                })
                .await
                .map_err(|_| RelayClientError::Channel)?;
            }
        }
    }

    Ok(())
}

fn handle_message(message: RelayMessage, pairing: &mut Option<ActivePairing>) {
    match message {
        RelayMessage::Welcome { peer_id } => {
            println!("Connected to relay as {peer_id}");
        }

        RelayMessage::StatusUpdate {
            status: PairingStatus::Waiting,
        } => {
            *pairing = None;
            println!("Waiting for a partner...");
        }

        RelayMessage::StatusUpdate {
            status:
                PairingStatus::Paired {
                    peer_id,
                    session_key,
                },
        } => match SessionKey::from_base64(&session_key) {
            Ok(key) => {
                let session = CryptoSession::new(key);
                println!("Paired with {peer_id} (key {})", session.fingerprint());
                *pairing = Some(ActivePairing {
                    partner: peer_id,
                    session,
                });
            }
            Err(e) => {
                *pairing = None;
                warn!(error = %e, "relay sent an unusable session key");
            }
        },

        RelayMessage::ReceiveMessage { from, envelope } => {
            let Some(active) = pairing.as_ref().filter(|p| p.partner == from) else {
                warn!(%from, "message from a peer we are not paired with");
                return;
            };
            match active.session.decode_envelope(&envelope) {
                Ok(plaintext) => println!("{from}: {}", String::from_utf8_lossy(&plaintext)),
                Err(e) => warn!(error_class = e.kind(), error = %e, "dropping relayed message"),
            }
        }

        RelayMessage::Error { message } => println!("Relay error: {message}"),

        RelayMessage::Pong => debug!("heartbeat acknowledged"),

        other => debug!(?other, "Unhandled message type"),
    }
}
