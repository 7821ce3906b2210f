//! Peer identities and handshake states

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ProtocolError, ProtocolResult};

/// Unique peer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Format as user-friendly display string (UUID)
    pub fn to_display_string(&self) -> String {
        self.0.to_string().to_uppercase()
    }

    /// Parse from display string
    pub fn from_display_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl std::str::FromStr for PeerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_display_string(s).ok_or(ProtocolError::InvalidPeerId)
    }
}

/// Side of the key-encapsulation handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeRole {
    /// Publishes its public key and decapsulates
    Server,
    /// Generates the session key and encapsulates it
    Client,
}

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeState {
    /// Nothing exchanged yet
    Idle,
    /// Client is waiting for the server's public key
    AwaitingPublicKey,
    /// Server has sent its public key
    KeyPublished,
    /// The encapsulated session key has been sent (client) or received (server)
    KeyEncapsulated,
    /// Both sides hold the session key
    Established,
    /// Terminal failure, the connection must be closed
    Failed,
}

impl HandshakeState {
    /// Whether `self -> next` is a legal step for the given role
    pub fn can_transition(self, role: HandshakeRole, next: HandshakeState) -> bool {
        use HandshakeState::*;

        if next == Failed {
            return !matches!(self, Established | Failed);
        }

        matches!(
            (role, self, next),
            (HandshakeRole::Server, Idle, KeyPublished)
                | (HandshakeRole::Server, KeyPublished, KeyEncapsulated)
                | (HandshakeRole::Client, Idle, AwaitingPublicKey)
                | (HandshakeRole::Client, AwaitingPublicKey, KeyEncapsulated)
                | (_, KeyEncapsulated, Established)
        )
    }

    /// Check and return the next state
    pub fn transition(self, role: HandshakeRole, next: HandshakeState) -> ProtocolResult<Self> {
        if self.can_transition(role, next) {
            Ok(next)
        } else {
            Err(ProtocolError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_path() {
        let state = HandshakeState::Idle
            .transition(HandshakeRole::Server, HandshakeState::KeyPublished)
            .and_then(|s| s.transition(HandshakeRole::Server, HandshakeState::KeyEncapsulated))
            .and_then(|s| s.transition(HandshakeRole::Server, HandshakeState::Established))
            .unwrap();
        assert_eq!(state, HandshakeState::Established);
    }

    #[test]
    fn test_client_cannot_publish_key() {
        let err = HandshakeState::Idle
            .transition(HandshakeRole::Client, HandshakeState::KeyPublished)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_established_is_final() {
        for next in [
            HandshakeState::Idle,
            HandshakeState::KeyPublished,
            HandshakeState::Established,
            HandshakeState::Failed,
        ] {
            assert!(!HandshakeState::Established.can_transition(HandshakeRole::Server, next));
        }
    }

    #[test]
    fn test_failure_reachable_before_established() {
        assert!(HandshakeState::KeyPublished.can_transition(HandshakeRole::Server, HandshakeState::Failed));
        assert!(HandshakeState::Idle.can_transition(HandshakeRole::Client, HandshakeState::Failed));
    }

    #[test]
    fn test_peer_id_display_roundtrip() {
        let id = PeerId::new();
        let parsed: PeerId = id.to_display_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-peer".parse::<PeerId>().is_err());
    }
}
