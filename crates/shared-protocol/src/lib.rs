//! Shared Protocol Definitions for Quantum Chat
//!
//! Wire types shared by the chat server, the chat client and the relay:
//! the encrypted message envelope, handshake states, peer identities and
//! relay control messages.

mod envelope;
mod error;
mod relay;
mod session;

pub use envelope::*;
pub use error::*;
pub use relay::*;
pub use session::*;

/// Nonce size for the session cipher (96 bits / 12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits / 16 bytes)
pub const TAG_SIZE: usize = 16;

/// Session key size (256 bits / 32 bytes)
pub const SESSION_KEY_SIZE: usize = 32;

/// Largest serialized public key a client accepts during the handshake
pub const MAX_PUBLIC_KEY_SIZE: usize = 4096;

/// Largest encapsulated key a server accepts during the handshake
pub const MAX_ENCAPSULATED_KEY_SIZE: usize = 1024;

/// Default upper bound for one framed application message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default TCP port of the two-party chat server
pub const DEFAULT_CHAT_PORT: u16 = 65432;

/// Default HTTP port of the relay server
pub const DEFAULT_RELAY_PORT: u16 = 5000;
