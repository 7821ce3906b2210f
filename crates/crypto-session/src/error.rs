//! Crypto session error types

use shared_protocol::ProtocolError;
use thiserror::Error;

/// Cryptographic operation error
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Key exchange failed: {0}")]
    KeyExchange(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Deliberately carries no detail about which check failed
    #[error("Decapsulation failed")]
    Decapsulation,

    #[error("Authentication failed: tag mismatch")]
    Authentication,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Message codec error
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(ProtocolError),

    #[error("Authentication failed: message rejected")]
    Authentication,

    #[error("Failed to seal message: {0}")]
    Seal(CryptoError),

    #[error("Failed to serialize envelope: {0}")]
    Serialization(ProtocolError),
}

impl CodecError {
    /// Failure class used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            CodecError::MalformedEnvelope(_) => "malformed_envelope",
            CodecError::Authentication => "authentication",
            CodecError::Seal(_) => "seal",
            CodecError::Serialization(_) => "serialization",
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
