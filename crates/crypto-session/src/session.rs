//! Established cryptographic session

use std::sync::atomic::{AtomicU64, Ordering};

use shared_protocol::SealedMessage;
use tracing::trace;

use crate::{CryptoResult, KeyFingerprint, SessionKey, generate_nonce, open, seal};

/// Session keyed by the result of one handshake or one relay pairing
///
/// Shared by the reader and writer halves of a connection, so all methods
/// take `&self`. Every seal draws a fresh random nonce.
pub struct CryptoSession {
    key: SessionKey,
    sealed: AtomicU64,
    opened: AtomicU64,
    rejected: AtomicU64,
}

impl CryptoSession {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            sealed: AtomicU64::new(0),
            opened: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Fingerprint of the session key for diagnostics
    pub fn fingerprint(&self) -> KeyFingerprint {
        self.key.fingerprint()
    }

    /// Encrypt one message under a fresh nonce
    pub fn seal_message(&self, plaintext: &[u8]) -> CryptoResult<SealedMessage> {
        let nonce = generate_nonce();
        let (ciphertext, tag) = seal(&self.key, &nonce, plaintext)?;
        self.sealed.fetch_add(1, Ordering::Relaxed);
        trace!(len = plaintext.len(), "sealed message");

        Ok(SealedMessage {
            nonce,
            tag,
            ciphertext,
        })
    }

    /// Verify and decrypt one message
    pub fn open_message(&self, sealed: &SealedMessage) -> CryptoResult<Vec<u8>> {
        match open(&self.key, &sealed.nonce, &sealed.ciphertext, &sealed.tag) {
            Ok(plaintext) => {
                self.opened.fetch_add(1, Ordering::Relaxed);
                Ok(plaintext)
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            sealed: self.sealed.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CryptoSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoSession")
            .field("key", &self.fingerprint())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Message counters of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sealed: u64,
    pub opened: u64,
    pub rejected: u64,
}
