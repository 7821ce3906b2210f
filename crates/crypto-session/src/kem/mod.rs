//! Key-encapsulation mechanisms used by the session handshake
//!
//! The handshake only depends on the [`Kem`] capability, so the underlying
//! algorithm can be swapped without touching the handshake state machine.

mod rsa_oaep;
mod x25519;

pub use rsa_oaep::{
    MAX_RSA_MODULUS_BITS, MIN_RSA_MODULUS_BITS, RSA_MODULUS_BITS, RsaOaepKem, decapsulate,
    encapsulate,
};
pub use x25519::X25519Kem;

use crate::{CryptoResult, KeyFingerprint, SessionKey};

/// Abstract key-encapsulation capability
pub trait Kem: Send + Sync + 'static {
    type PublicKey: Clone + Send + Sync + 'static;
    type PrivateKey: Send + Sync + 'static;

    /// Human-readable algorithm label
    const NAME: &'static str;

    fn generate_keypair() -> CryptoResult<(Self::PublicKey, Self::PrivateKey)>;

    /// Serialize a public key for the wire
    fn encode_public_key(public: &Self::PublicKey) -> CryptoResult<Vec<u8>>;

    /// Parse and validate a public key received from the wire
    fn decode_public_key(bytes: &[u8]) -> CryptoResult<Self::PublicKey>;

    /// Produce a fresh session key and its encapsulation under `public`
    fn encapsulate(public: &Self::PublicKey) -> CryptoResult<(Vec<u8>, SessionKey)>;

    /// Recover the session key from an encapsulation
    fn decapsulate(private: &Self::PrivateKey, ciphertext: &[u8]) -> CryptoResult<SessionKey>;
}

/// Long-lived keypair owned by one server context
pub struct KemKeyPair<K: Kem> {
    public: K::PublicKey,
    private: K::PrivateKey,
    encoded_public: Vec<u8>,
}

impl<K: Kem> KemKeyPair<K> {
    pub fn generate() -> CryptoResult<Self> {
        let (public, private) = K::generate_keypair()?;
        let encoded_public = K::encode_public_key(&public)?;
        Ok(Self {
            public,
            private,
            encoded_public,
        })
    }

    pub fn public_key(&self) -> &K::PublicKey {
        &self.public
    }

    /// Wire form of the public key, as published during the handshake
    pub fn encoded_public_key(&self) -> &[u8] {
        &self.encoded_public
    }

    pub fn public_fingerprint(&self) -> KeyFingerprint {
        KeyFingerprint::of(&self.encoded_public)
    }

    pub fn decapsulate(&self, ciphertext: &[u8]) -> CryptoResult<SessionKey> {
        K::decapsulate(&self.private, ciphertext)
    }
}

impl<K: Kem> std::fmt::Debug for KemKeyPair<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemKeyPair")
            .field("algorithm", &K::NAME)
            .field("public", &self.public_fingerprint())
            .finish_non_exhaustive()
    }
}
