//! Network Transport - framed TCP secure channels for Quantum Chat
//!
//! Every blob on the wire is preceded by a 4-byte big-endian length. A
//! connection runs the key-encapsulation handshake exactly once and then
//! carries sealed JSON envelopes, one per frame.

mod channel;
mod config;
mod error;
mod framing;
mod handshake;
mod server;

pub use channel::*;
pub use config::*;
pub use error::*;
pub use framing::*;
pub use handshake::*;
pub use server::*;
