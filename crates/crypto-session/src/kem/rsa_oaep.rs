//! RSA-OAEP key transport
//!
//! Stands in for a lattice KEM: the client draws the session key itself and
//! encrypts it under the server's RSA public key with OAEP(SHA-256).

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::Kem;
use crate::{CryptoError, CryptoResult, SESSION_KEY_SIZE, SessionKey};

/// Modulus size of generated keys
pub const RSA_MODULUS_BITS: usize = 2048;

/// Smallest modulus accepted from a peer
pub const MIN_RSA_MODULUS_BITS: usize = 2048;

/// Largest modulus accepted from a peer; its PEM form fits the 4096-byte
/// public key frame
pub const MAX_RSA_MODULUS_BITS: usize = 4096;

/// OAEP overhead with SHA-256: two digests plus two bytes
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

/// Encrypt 32 bytes of key material under the recipient's public key
pub fn encapsulate(plain_key: &SessionKey, recipient: &RsaPublicKey) -> CryptoResult<Vec<u8>> {
    let max_payload = recipient.size().saturating_sub(OAEP_OVERHEAD);
    if SESSION_KEY_SIZE > max_payload {
        return Err(CryptoError::Encryption(format!(
            "key material of {SESSION_KEY_SIZE} bytes exceeds OAEP limit of {max_payload} bytes"
        )));
    }

    recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plain_key.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Recover the key material with the matching private key
///
/// Every failure maps to the same opaque error.
pub fn decapsulate(ciphertext: &[u8], private_key: &RsaPrivateKey) -> CryptoResult<SessionKey> {
    if ciphertext.len() != private_key.size() {
        return Err(CryptoError::Decapsulation);
    }

    let recovered = Zeroizing::new(
        private_key
            .decrypt_blinded(&mut OsRng, Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| CryptoError::Decapsulation)?,
    );

    SessionKey::from_slice(&recovered).map_err(|_| CryptoError::Decapsulation)
}

/// RSA-OAEP used through the [`Kem`] capability
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaOaepKem;

impl Kem for RsaOaepKem {
    type PublicKey = RsaPublicKey;
    type PrivateKey = RsaPrivateKey;

    const NAME: &'static str = "Kyber512 (Simulated PQC)";

    fn generate_keypair() -> CryptoResult<(RsaPublicKey, RsaPrivateKey)> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_MODULUS_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok((public, private))
    }

    fn encode_public_key(public: &RsaPublicKey) -> CryptoResult<Vec<u8>> {
        public
            .to_public_key_pem(LineEnding::LF)
            .map(String::into_bytes)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))
    }

    fn decode_public_key(bytes: &[u8]) -> CryptoResult<RsaPublicKey> {
        let pem = std::str::from_utf8(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey("public key is not UTF-8 PEM".into()))?;
        let public = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

        let bits = public.size() * 8;
        if !(MIN_RSA_MODULUS_BITS..=MAX_RSA_MODULUS_BITS).contains(&bits) {
            return Err(CryptoError::InvalidPublicKey(format!(
                "unsupported modulus size: {bits} bits"
            )));
        }

        Ok(public)
    }

    fn encapsulate(public: &RsaPublicKey) -> CryptoResult<(Vec<u8>, SessionKey)> {
        let key = SessionKey::generate();
        let ciphertext = encapsulate(&key, public)?;
        Ok((ciphertext, key))
    }

    fn decapsulate(private: &RsaPrivateKey, ciphertext: &[u8]) -> CryptoResult<SessionKey> {
        decapsulate(ciphertext, private)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;

    fn keypair() -> &'static (RsaPublicKey, RsaPrivateKey) {
        static KEYPAIR: OnceLock<(RsaPublicKey, RsaPrivateKey)> = OnceLock::new();
        KEYPAIR.get_or_init(|| RsaOaepKem::generate_keypair().unwrap())
    }

    #[test]
    fn test_encapsulation_roundtrip() {
        let (public, private) = keypair();
        let key = SessionKey::generate();

        let ciphertext = encapsulate(&key, public).unwrap();
        assert_eq!(ciphertext.len(), RSA_MODULUS_BITS / 8);

        let recovered = decapsulate(&ciphertext, private).unwrap();
        assert_eq!(recovered.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_encapsulation_is_randomized() {
        let (public, _) = keypair();
        let key = SessionKey::generate();
        assert_ne!(encapsulate(&key, public).unwrap(), encapsulate(&key, public).unwrap());
    }

    #[test]
    fn test_wrong_length_ciphertext_is_opaque_failure() {
        let (_, private) = keypair();
        assert!(matches!(decapsulate(&[0u8; 100], private), Err(CryptoError::Decapsulation)));
    }

    #[test]
    fn test_corrupted_ciphertext_is_opaque_failure() {
        let (public, private) = keypair();
        let mut ciphertext = encapsulate(&SessionKey::generate(), public).unwrap();
        ciphertext[10] ^= 0x40;
        assert!(matches!(decapsulate(&ciphertext, private), Err(CryptoError::Decapsulation)));
    }

    #[test]
    fn test_non_key_payload_is_rejected() {
        let (public, private) = keypair();
        let ciphertext = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &[1u8; 16])
            .unwrap();
        assert!(matches!(decapsulate(&ciphertext, private), Err(CryptoError::Decapsulation)));
    }

    #[test]
    fn test_public_key_pem_roundtrip() {
        let (public, _) = keypair();
        let encoded = RsaOaepKem::encode_public_key(public).unwrap();
        assert!(encoded.starts_with(b"-----BEGIN PUBLIC KEY-----"));
        assert!(encoded.len() <= shared_protocol::MAX_PUBLIC_KEY_SIZE);

        let decoded = RsaOaepKem::decode_public_key(&encoded).unwrap();
        assert_eq!(&decoded, public);
    }

    #[test]
    fn test_garbage_public_key_is_rejected() {
        let err = RsaOaepKem::decode_public_key(b"-----BEGIN PUBLIC KEY-----\nnope\n").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPublicKey(_)));

        let err = RsaOaepKem::decode_public_key(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPublicKey(_)));
    }

    #[test]
    fn test_small_modulus_is_rejected() {
        let small = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pem = RsaPublicKey::from(&small)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let err = RsaOaepKem::decode_public_key(pem.as_bytes()).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPublicKey(_)));
    }

    #[test]
    fn test_kem_capability_roundtrip() {
        let (public, private) = keypair();
        let (ciphertext, sent) = RsaOaepKem::encapsulate(public).unwrap();
        let received = RsaOaepKem::decapsulate(private, &ciphertext).unwrap();
        assert_eq!(sent.as_bytes(), received.as_bytes());
    }
}
