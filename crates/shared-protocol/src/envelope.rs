//! Encrypted message envelope
//!
//! One application message travels as a JSON object with exactly three
//! base64 string fields: `nonce`, `tag` and `ciphertext`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{NONCE_SIZE, ProtocolError, ProtocolResult, TAG_SIZE};

/// Transport form of one encrypted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub nonce: String,
    pub tag: String,
    pub ciphertext: String,
}

/// Decoded binary form of an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Base64-encode each field of a sealed message
    pub fn from_sealed(sealed: &SealedMessage) -> Self {
        Self {
            nonce: STANDARD.encode(sealed.nonce),
            tag: STANDARD.encode(sealed.tag),
            ciphertext: STANDARD.encode(&sealed.ciphertext),
        }
    }

    /// Decode every field and check the fixed nonce and tag lengths
    pub fn to_sealed(&self) -> ProtocolResult<SealedMessage> {
        let nonce = decode_fixed::<NONCE_SIZE>("nonce", &self.nonce)?;
        let tag = decode_fixed::<TAG_SIZE>("tag", &self.tag)?;
        let ciphertext = decode_field("ciphertext", &self.ciphertext)?;

        Ok(SealedMessage {
            nonce,
            tag,
            ciphertext,
        })
    }

    /// Serialize to JSON bytes for transmission
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from received JSON bytes
    ///
    /// Missing, extra or non-string fields are reported as a malformed envelope.
    pub fn from_json(data: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
    }
}

fn decode_field(field: &'static str, value: &str) -> ProtocolResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| ProtocolError::MalformedEnvelope(format!("invalid base64 in `{field}`: {e}")))
}

fn decode_fixed<const N: usize>(field: &'static str, value: &str) -> ProtocolResult<[u8; N]> {
    let bytes = decode_field(field, value)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ProtocolError::InvalidFieldLength {
            field,
            expected: N,
            actual: bytes.len(),
        })
}
