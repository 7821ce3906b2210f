//! X25519 Diffie-Hellman KEM

use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::Kem;
use crate::{CryptoError, CryptoResult, SESSION_KEY_SIZE, SessionKey};

const KDF_LABEL: &[u8] = b"quantum-chat x25519 kem v1";

/// Ephemeral-static X25519; the encapsulation is the ephemeral public key
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Kem;

fn derive_key(shared: &[u8; 32], ephemeral: &PublicKey, recipient: &PublicKey) -> SessionKey {
    let digest = Sha256::new()
        .chain_update(KDF_LABEL)
        .chain_update(shared)
        .chain_update(ephemeral.as_bytes())
        .chain_update(recipient.as_bytes())
        .finalize();

    let mut key = [0u8; SESSION_KEY_SIZE];
    key.copy_from_slice(&digest);
    SessionKey::from_bytes(key)
}

fn parse_point(bytes: &[u8]) -> Option<PublicKey> {
    let point: [u8; 32] = bytes.try_into().ok()?;
    Some(PublicKey::from(point))
}

impl Kem for X25519Kem {
    type PublicKey = PublicKey;
    type PrivateKey = StaticSecret;

    const NAME: &'static str = "X25519 DHKEM";

    fn generate_keypair() -> CryptoResult<(PublicKey, StaticSecret)> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Ok((public, secret))
    }

    fn encode_public_key(public: &PublicKey) -> CryptoResult<Vec<u8>> {
        Ok(public.as_bytes().to_vec())
    }

    fn decode_public_key(bytes: &[u8]) -> CryptoResult<PublicKey> {
        parse_point(bytes).ok_or_else(|| {
            CryptoError::InvalidPublicKey(format!("expected 32 bytes, got {}", bytes.len()))
        })
    }

    fn encapsulate(public: &PublicKey) -> CryptoResult<(Vec<u8>, SessionKey)> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(public);

        if !shared.was_contributory() {
            return Err(CryptoError::KeyExchange(
                "peer public key is a low-order point".into(),
            ));
        }

        let key = derive_key(shared.as_bytes(), &ephemeral_public, public);
        Ok((ephemeral_public.as_bytes().to_vec(), key))
    }

    fn decapsulate(private: &StaticSecret, ciphertext: &[u8]) -> CryptoResult<SessionKey> {
        let ephemeral_public = parse_point(ciphertext).ok_or(CryptoError::Decapsulation)?;
        let shared = private.diffie_hellman(&ephemeral_public);

        if !shared.was_contributory() {
            return Err(CryptoError::Decapsulation);
        }

        let recipient = PublicKey::from(private);
        Ok(derive_key(shared.as_bytes(), &ephemeral_public, &recipient))
    }
}
