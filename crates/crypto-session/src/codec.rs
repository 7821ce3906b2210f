//! Envelope codec: plaintext <-> sealed JSON envelope

use shared_protocol::Envelope;

use crate::{CodecError, CodecResult, CryptoError, CryptoSession};

impl CryptoSession {
    /// Seal `plaintext` and wrap it in an envelope
    pub fn encode_envelope(&self, plaintext: &[u8]) -> CodecResult<Envelope> {
        let sealed = self.seal_message(plaintext).map_err(CodecError::Seal)?;
        Ok(Envelope::from_sealed(&sealed))
    }

    /// Seal `plaintext` into JSON bytes ready for one transport frame
    pub fn encode(&self, plaintext: &[u8]) -> CodecResult<Vec<u8>> {
        self.encode_envelope(plaintext)?
            .to_json()
            .map_err(CodecError::Serialization)
    }

    /// Check an envelope's shape and open it
    pub fn decode_envelope(&self, envelope: &Envelope) -> CodecResult<Vec<u8>> {
        let sealed = envelope.to_sealed().map_err(|e| {
            self.record_rejected();
            CodecError::MalformedEnvelope(e)
        })?;

        self.open_message(&sealed).map_err(|e| match e {
            CryptoError::Authentication => CodecError::Authentication,
            other => CodecError::Seal(other),
        })
    }

    /// Parse JSON bytes from one transport frame and open the envelope
    pub fn decode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        let envelope = Envelope::from_json(data).map_err(|e| {
            self.record_rejected();
            CodecError::MalformedEnvelope(e)
        })?;
        self.decode_envelope(&envelope)
    }
}
