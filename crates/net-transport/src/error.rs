//! Transport error types

use std::time::Duration;

use crypto_session::{CodecError, CryptoError};
use shared_protocol::ProtocolError;
use thiserror::Error;

/// Connection-fatal error
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame exceeds limit of {max} bytes")]
    FrameLimitExceeded { max: usize },

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Failed to encode outgoing message: {0}")]
    Encode(#[from] CodecError),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Handshake failure; always terminal for the connection
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid server public key: {0}")]
    InvalidPublicKey(CryptoError),

    #[error("Failed to encapsulate session key: {0}")]
    Encapsulation(CryptoError),

    #[error("Failed to decapsulate session key")]
    Decapsulation,

    #[error("Peer closed the connection during the handshake")]
    ConnectionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
