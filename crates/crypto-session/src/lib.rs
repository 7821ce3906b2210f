//! Crypto Session - key encapsulation and authenticated messaging
//!
//! Provides the handshake KEMs (RSA-OAEP standing in for a post-quantum KEM,
//! plus an X25519 DHKEM), ChaCha20Poly1305 sealing of chat messages and the
//! envelope codec built on top of them.

mod cipher;
mod codec;
mod error;
mod key;
pub mod kem;
mod session;

pub use cipher::*;
pub use error::*;
pub use kem::{Kem, KemKeyPair, RsaOaepKem, X25519Kem};
pub use key::*;
pub use session::*;

pub use shared_protocol::{NONCE_SIZE, SESSION_KEY_SIZE, TAG_SIZE};
