//! Connected peers and their pairings
//!
//! Status notices (`Welcome`, `Waiting`, `Paired`) are queued while the
//! registry lock is held, so every socket sees them in the same order as the
//! state changes that caused them.

use std::collections::HashMap;
use std::sync::Arc;

use crypto_session::{CodecError, CryptoSession, SessionKey};
use parking_lot::Mutex;
use serde::Serialize;
use shared_protocol::{PairingStatus, PeerId, RelayMessage};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Outbound queue of one connected socket
pub type Outbound = mpsc::UnboundedSender<RelayMessage>;

/// Why a message could not be routed
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Unknown target peer: {0}")]
    UnknownTarget(PeerId),

    #[error("Not paired with peer {0}")]
    NotPaired(PeerId),

    #[error("Failed to seal message: {0}")]
    Seal(#[from] CodecError),
}

/// A peer address the caller can notify
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub id: PeerId,
    pub tx: Outbound,
}

/// Result of registering a new connection
#[derive(Debug)]
pub enum ConnectOutcome {
    /// No partner available yet
    Waiting,
    /// Paired with the earliest waiting peer
    Paired {
        partner: PeerHandle,
        /// Base64 pairing key for both status updates
        session_key: String,
    },
}

/// Sealed message ready for delivery to the target only
#[derive(Debug)]
pub struct Routed {
    pub target: PeerHandle,
    pub message: RelayMessage,
}

impl Routed {
    /// Hand the message to the target's socket; false if it already went away
    pub fn deliver(self) -> bool {
        self.target.tx.send(self.message).is_ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub connected: usize,
    pub paired: usize,
    pub waiting: usize,
}

struct Pairing {
    partner: PeerId,
    session: Arc<CryptoSession>,
}

struct PeerEntry {
    tx: Outbound,
    arrival: u64,
    pairing: Option<Pairing>,
}

#[derive(Default)]
struct RegistryState {
    peers: HashMap<PeerId, PeerEntry>,
    next_arrival: u64,
}

/// Relay registry; every state change happens under one lock
#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and pair it if someone is waiting
    ///
    /// Queues `Welcome` and a status update for the new peer, and `Paired`
    /// for the partner it was matched with.
    pub fn connect(&self, tx: Outbound) -> (PeerId, ConnectOutcome) {
        let peer_id = PeerId::new();
        let mut state = self.state.lock();
        notify(&tx, RelayMessage::Welcome { peer_id });

        let arrival = state.next_arrival;
        state.next_arrival += 1;

        let partner = state
            .peers
            .iter()
            .filter(|(_, entry)| entry.pairing.is_none())
            .min_by_key(|(_, entry)| entry.arrival)
            .map(|(id, entry)| PeerHandle {
                id: *id,
                tx: entry.tx.clone(),
            });

        let Some(partner) = partner else {
            notify(&tx, status(PairingStatus::Waiting));
            state.peers.insert(peer_id, PeerEntry {
                tx,
                arrival,
                pairing: None,
            });
            info!(%peer_id, "peer waiting for a partner");
            return (peer_id, ConnectOutcome::Waiting);
        };

        let key = SessionKey::generate();
        let session_key = key.to_base64();
        let session = Arc::new(CryptoSession::new(key));
        info!(%peer_id, partner = %partner.id, key = %session.fingerprint(), "peers paired");

        notify(&tx, status(PairingStatus::Paired {
            peer_id: partner.id,
            session_key: session_key.clone(),
        }));
        notify(&partner.tx, status(PairingStatus::Paired {
            peer_id,
            session_key: session_key.clone(),
        }));

        if let Some(entry) = state.peers.get_mut(&partner.id) {
            entry.pairing = Some(Pairing {
                partner: peer_id,
                session: session.clone(),
            });
        }
        state.peers.insert(peer_id, PeerEntry {
            tx,
            arrival,
            pairing: Some(Pairing {
                partner: partner.id,
                session,
            }),
        });

        (peer_id, ConnectOutcome::Paired {
            partner,
            session_key,
        })
    }

    /// Remove a connection; returns the partner that lost its session
    ///
    /// The survivor is told it is waiting again, but is only paired again
    /// when a new connection arrives.
    pub fn disconnect(&self, peer_id: PeerId) -> Option<PeerHandle> {
        let mut state = self.state.lock();
        let entry = state.peers.remove(&peer_id)?;
        info!(%peer_id, "peer disconnected");

        let partner_id = entry.pairing?.partner;
        let survivor = state.peers.get_mut(&partner_id)?;
        survivor.pairing = None;
        notify(&survivor.tx, status(PairingStatus::Waiting));
        debug!(peer_id = %partner_id, "pairing dissolved");

        Some(PeerHandle {
            id: partner_id,
            tx: survivor.tx.clone(),
        })
    }

    /// Seal `plaintext` from `from` for its paired `target`
    pub fn route(&self, from: PeerId, target: PeerId, plaintext: &str) -> Result<Routed, RoutingError> {
        let (session, tx) = {
            let state = self.state.lock();
            let target_entry = state
                .peers
                .get(&target)
                .ok_or(RoutingError::UnknownTarget(target))?;

            let session = state
                .peers
                .get(&from)
                .and_then(|entry| entry.pairing.as_ref())
                .filter(|pairing| pairing.partner == target)
                .map(|pairing| pairing.session.clone())
                .ok_or(RoutingError::NotPaired(target))?;

            (session, target_entry.tx.clone())
        };

        let envelope = session.encode_envelope(plaintext.as_bytes())?;
        debug!(%from, %target, "routing sealed message");

        Ok(Routed {
            target: PeerHandle { id: target, tx },
            message: RelayMessage::ReceiveMessage { from, envelope },
        })
    }

    /// Current partner of `peer_id`, if it is paired
    pub fn partner(&self, peer_id: PeerId) -> Option<PeerId> {
        let state = self.state.lock();
        state.peers.get(&peer_id)?.pairing.as_ref().map(|p| p.partner)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        let paired = state
            .peers
            .values()
            .filter(|entry| entry.pairing.is_some())
            .count();

        RegistryStats {
            connected: state.peers.len(),
            paired,
            waiting: state.peers.len() - paired,
        }
    }
}

fn status(status: PairingStatus) -> RelayMessage {
    RelayMessage::StatusUpdate { status }
}

fn notify(tx: &Outbound, message: RelayMessage) {
    if tx.send(message).is_err() {
        debug!("dropping notice for a closed socket");
    }
}

#[cfg(test)]
mod tests {
    use shared_protocol::Envelope;

    use super::*;

    fn outbound() -> (Outbound, mpsc::UnboundedReceiver<RelayMessage>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RelayMessage>) -> Vec<RelayMessage> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    /// Partner named by the last status update in `messages`, if any
    fn last_status(messages: &[RelayMessage]) -> Option<Option<PeerId>> {
        messages.iter().rev().find_map(|message| match message {
            RelayMessage::StatusUpdate {
                status: PairingStatus::Waiting,
            } => Some(None),
            RelayMessage::StatusUpdate {
                status: PairingStatus::Paired { peer_id, .. },
            } => Some(Some(*peer_id)),
            _ => None,
        })
    }

    fn paired_key(outcome: &ConnectOutcome) -> (PeerId, String) {
        match outcome {
            ConnectOutcome::Paired {
                partner,
                session_key,
            } => (partner.id, session_key.clone()),
            ConnectOutcome::Waiting => panic!("expected a pairing"),
        }
    }

    fn open(key: &str, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        CryptoSession::new(SessionKey::from_base64(key).unwrap()).decode_envelope(envelope)
    }

    fn envelope_of(routed: Routed) -> Envelope {
        match routed.message {
            RelayMessage::ReceiveMessage { envelope, .. } => envelope,
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_first_peer_waits_second_pairs() {
        let registry = SessionRegistry::new();
        let (a, outcome) = registry.connect(outbound().0);
        assert!(matches!(outcome, ConnectOutcome::Waiting));

        let (_, outcome) = registry.connect(outbound().0);
        let (partner, _) = paired_key(&outcome);
        assert_eq!(partner, a);

        assert_eq!(registry.stats(), RegistryStats {
            connected: 2,
            paired: 2,
            waiting: 0
        });
    }

    #[test]
    fn test_pairs_with_earliest_waiting_peer() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.connect(outbound().0);
        let (_b, _) = registry.connect(outbound().0);
        let (c, _) = registry.connect(outbound().0);
        let (d, _) = registry.connect(outbound().0);
        assert_eq!(registry.stats().waiting, 0);

        // A and B paired; C and D paired. A leaves, B waits.
        let survivor = registry.disconnect(a).unwrap();
        let (e, outcome) = registry.connect(outbound().0);
        assert_eq!(paired_key(&outcome).0, survivor.id);

        assert!(registry.route(e, survivor.id, "hi").is_ok());
        assert!(matches!(
            registry.route(e, c, "hi"),
            Err(RoutingError::NotPaired(_))
        ));
        assert!(registry.route(c, d, "hi").is_ok());
    }

    #[test]
    fn test_message_reaches_target_only() {
        let registry = SessionRegistry::new();
        let (a_tx, mut a_rx) = outbound();
        let (b_tx, mut b_rx) = outbound();
        let (a, _) = registry.connect(a_tx);
        let (b, outcome) = registry.connect(b_tx);
        let (_, key) = paired_key(&outcome);
        drain(&mut a_rx);
        drain(&mut b_rx);

        let routed = registry.route(a, b, "hello").unwrap();
        assert!(routed.deliver());

        match b_rx.try_recv().unwrap() {
            RelayMessage::ReceiveMessage { from, envelope } => {
                assert_eq!(from, a);
                assert_eq!(open(&key, &envelope).unwrap(), b"hello");
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn test_notices_follow_state_changes() {
        let registry = SessionRegistry::new();
        let (a_tx, mut a_rx) = outbound();
        let (b_tx, mut b_rx) = outbound();
        let (a, _) = registry.connect(a_tx);
        let (b, _) = registry.connect(b_tx);

        let a_notices = drain(&mut a_rx);
        assert!(matches!(a_notices[0], RelayMessage::Welcome { peer_id } if peer_id == a));
        assert_eq!(last_status(&a_notices), Some(Some(b)));

        registry.disconnect(a);
        let (c, _) = registry.connect(outbound().0);

        let b_notices = drain(&mut b_rx);
        let statuses: Vec<_> = b_notices
            .iter()
            .filter_map(|notice| last_status(std::slice::from_ref(notice)))
            .collect();
        assert!(matches!(b_notices[0], RelayMessage::Welcome { peer_id } if peer_id == b));
        assert_eq!(statuses, vec![Some(a), None, Some(c)]);
        assert_eq!(registry.partner(b), Some(c));
    }

    #[test]
    fn test_survivor_status_matches_registry_under_churn() {
        let registry = Arc::new(SessionRegistry::new());
        let (b_tx, mut b_rx) = outbound();
        let (a, _) = registry.connect(outbound().0);
        let (b, _) = registry.connect(b_tx);
        let mut current = a;

        for _ in 0..200 {
            let leaving = current;
            let departure = {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.disconnect(leaving);
                })
            };
            let arrival = {
                let registry = registry.clone();
                std::thread::spawn(move || registry.connect(outbound().0).0)
            };
            departure.join().unwrap();
            let newcomer = arrival.join().unwrap();

            // Either order leaves B paired with the newcomer or waiting
            let told = last_status(&drain(&mut b_rx)).unwrap();
            assert_eq!(told, registry.partner(b));

            if registry.partner(b).is_none() {
                registry.disconnect(newcomer);
                let (replacement, _) = registry.connect(outbound().0);
                assert_eq!(last_status(&drain(&mut b_rx)), Some(Some(replacement)));
                current = replacement;
            } else {
                current = newcomer;
            }
        }
    }

    #[test]
    fn test_unknown_target() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.connect(outbound().0);
        let stranger = PeerId::new();

        assert!(matches!(
            registry.route(a, stranger, "hi"),
            Err(RoutingError::UnknownTarget(id)) if id == stranger
        ));
    }

    #[test]
    fn test_waiting_peer_cannot_send() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.connect(outbound().0);
        let (_b, _) = registry.connect(outbound().0);
        let (c, outcome) = registry.connect(outbound().0);
        assert!(matches!(outcome, ConnectOutcome::Waiting));

        assert!(matches!(
            registry.route(c, a, "hi"),
            Err(RoutingError::NotPaired(_))
        ));
    }

    #[test]
    fn test_departed_peer_is_unknown() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.connect(outbound().0);
        let (b, _) = registry.connect(outbound().0);
        registry.disconnect(b);

        let (c, _) = registry.connect(outbound().0);
        assert!(matches!(
            registry.route(a, b, "hi"),
            Err(RoutingError::UnknownTarget(_))
        ));
        assert!(registry.route(a, c, "hi").is_ok());
    }

    #[test]
    fn test_survivors_do_not_pair_with_each_other() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.connect(outbound().0);
        let (b, _) = registry.connect(outbound().0);
        let (c, outcome) = registry.connect(outbound().0);
        assert!(matches!(outcome, ConnectOutcome::Waiting));

        registry.disconnect(a);
        assert_eq!(registry.stats(), RegistryStats {
            connected: 2,
            paired: 0,
            waiting: 2
        });
        assert_eq!(registry.partner(b), None);
        assert_eq!(registry.partner(c), None);
        assert!(matches!(
            registry.route(b, a, "hi"),
            Err(RoutingError::UnknownTarget(id)) if id == a
        ));
        assert!(matches!(
            registry.route(b, c, "hi"),
            Err(RoutingError::NotPaired(id)) if id == c
        ));

        // The newcomer takes the earliest waiting peer
        let (d, outcome) = registry.connect(outbound().0);
        assert_eq!(paired_key(&outcome).0, b);
        assert_eq!(registry.partner(b), Some(d));
        assert_eq!(registry.partner(c), None);
    }

    #[test]
    fn test_survivor_waits_until_new_arrival() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.connect(outbound().0);
        let (b, _) = registry.connect(outbound().0);

        let survivor = registry.disconnect(b).unwrap();
        assert_eq!(survivor.id, a);
        assert_eq!(registry.stats(), RegistryStats {
            connected: 1,
            paired: 0,
            waiting: 1
        });
        assert!(registry.disconnect(PeerId::new()).is_none());
    }

    #[test]
    fn test_new_pairing_invalidates_old_key() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.connect(outbound().0);
        let (b, outcome) = registry.connect(outbound().0);
        let (_, old_key) = paired_key(&outcome);
        let old_envelope = envelope_of(registry.route(b, a, "old").unwrap());

        registry.disconnect(b);
        let (c, outcome) = registry.connect(outbound().0);
        let (partner, new_key) = paired_key(&outcome);
        assert_eq!(partner, a);
        assert_ne!(old_key, new_key);

        assert!(matches!(
            open(&new_key, &old_envelope),
            Err(CodecError::Authentication)
        ));
        let fresh = envelope_of(registry.route(c, a, "new").unwrap());
        assert_eq!(open(&new_key, &fresh).unwrap(), b"new");
        assert!(open(&old_key, &fresh).is_err());
    }

    #[test]
    fn test_concurrent_connects_pair_everyone() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let (tx, _rx) = outbound();
                    registry.connect(tx).0
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.stats(), RegistryStats {
            connected: 8,
            paired: 8,
            waiting: 0
        });
    }
}
