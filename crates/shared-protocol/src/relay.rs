//! Relay server messages
//!
//! In the relay topology the server itself generates each pairing's session
//! key and hands it to both peers. The relay is a trusted key distributor and
//! can read every routed message.

use serde::{Deserialize, Serialize};

use crate::{Envelope, PeerId, ProtocolResult};

/// Pairing status reported to a relay client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingStatus {
    /// No partner yet
    Waiting,
    /// Paired with `peer_id`; `session_key` is the base64 pairing key
    Paired { peer_id: PeerId, session_key: String },
}

/// Messages exchanged with the relay server over WebSocket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// Identity assigned by the relay on connect
    Welcome { peer_id: PeerId },
    /// Pairing status change
    StatusUpdate { status: PairingStatus },
    /// Ask the relay to seal and forward a message to the paired peer
    SendMessage { target: PeerId, msg: String },
    /// Sealed message forwarded by the relay
    ReceiveMessage { from: PeerId, envelope: Envelope },
    /// Error from the relay server
    Error { message: String },
    /// Heartbeat
    Ping,
    Pong,
}

impl RelayMessage {
    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from a JSON text frame
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
