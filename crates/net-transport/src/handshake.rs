//! Key-encapsulation handshake
//!
//! ```text
//! server                                   client
//!   Idle                                     Idle
//!   ── [len][encoded public key] ──────────► AwaitingPublicKey
//!   KeyPublished                             decode + validate key
//!                                            generate + encapsulate session key
//!   ◄───────────── [len][encapsulated key] ── KeyEncapsulated
//!   KeyEncapsulated                          Established
//!   decapsulate
//!   Established
//! ```
//!
//! Any failure moves the handshake to `Failed`; there is no retry.

use std::time::Duration;

use bytes::Bytes;
use crypto_session::{Kem, KemKeyPair, SessionKey};
use shared_protocol::{
    HandshakeRole, HandshakeState, MAX_ENCAPSULATED_KEY_SIZE, MAX_PUBLIC_KEY_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    FramedStream, HandshakeError, TransportResult, read_frame, set_frame_limit, write_frame,
};

/// Handshake state machine for one connection
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    state: HandshakeState,
    timeout: Duration,
}

impl Handshake {
    pub fn new(role: HandshakeRole, timeout: Duration) -> Self {
        Self {
            role,
            state: HandshakeState::Idle,
            timeout,
        }
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn advance(&mut self, next: HandshakeState) -> Result<(), HandshakeError> {
        self.state = self.state.transition(self.role, next)?;
        debug!(role = ?self.role, state = ?self.state, "handshake advanced");
        Ok(())
    }

    /// Server side: publish our public key, then recover the client's session key
    pub async fn respond<S, K>(
        &mut self,
        framed: &mut FramedStream<S>,
        keypair: &KemKeyPair<K>,
    ) -> TransportResult<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        K: Kem,
    {
        let limit = self.timeout;
        let result = match timeout(limit, self.server_steps(framed, keypair)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Timeout(limit).into()),
        };
        self.finish(result)
    }

    /// Client side: receive the server's public key and send it a fresh session key
    pub async fn initiate<S, K>(&mut self, framed: &mut FramedStream<S>) -> TransportResult<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        K: Kem,
    {
        let limit = self.timeout;
        let result = match timeout(limit, self.client_steps::<S, K>(framed)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Timeout(limit).into()),
        };
        self.finish(result)
    }

    fn finish(&mut self, result: TransportResult<SessionKey>) -> TransportResult<SessionKey> {
        match result {
            Ok(key) => {
                info!(role = ?self.role, key = %key.fingerprint(), "secure channel established");
                Ok(key)
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                warn!(role = ?self.role, error = %e, "handshake failed");
                Err(e)
            }
        }
    }

    async fn server_steps<S, K>(
        &mut self,
        framed: &mut FramedStream<S>,
        keypair: &KemKeyPair<K>,
    ) -> TransportResult<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        K: Kem,
    {
        let public_key = Bytes::copy_from_slice(keypair.encoded_public_key());
        debug!(algorithm = K::NAME, len = public_key.len(), "publishing public key");

        set_frame_limit(framed, MAX_PUBLIC_KEY_SIZE);
        write_frame(framed, public_key, MAX_PUBLIC_KEY_SIZE).await?;
        self.advance(HandshakeState::KeyPublished)?;

        set_frame_limit(framed, MAX_ENCAPSULATED_KEY_SIZE);
        let ciphertext = read_frame(framed, MAX_ENCAPSULATED_KEY_SIZE)
            .await?
            .ok_or(HandshakeError::ConnectionClosed)?;
        debug!(len = ciphertext.len(), "received encapsulated key");
        self.advance(HandshakeState::KeyEncapsulated)?;

        let key = keypair
            .decapsulate(&ciphertext)
            .map_err(|_| HandshakeError::Decapsulation)?;
        self.advance(HandshakeState::Established)?;

        Ok(key)
    }

    async fn client_steps<S, K>(&mut self, framed: &mut FramedStream<S>) -> TransportResult<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        K: Kem,
    {
        self.advance(HandshakeState::AwaitingPublicKey)?;

        set_frame_limit(framed, MAX_PUBLIC_KEY_SIZE);
        let encoded = read_frame(framed, MAX_PUBLIC_KEY_SIZE)
            .await?
            .ok_or(HandshakeError::ConnectionClosed)?;
        let public_key = K::decode_public_key(&encoded).map_err(HandshakeError::InvalidPublicKey)?;
        info!(algorithm = K::NAME, len = encoded.len(), "received server public key");

        let (ciphertext, key) =
            K::encapsulate(&public_key).map_err(HandshakeError::Encapsulation)?;

        set_frame_limit(framed, MAX_ENCAPSULATED_KEY_SIZE);
        write_frame(framed, Bytes::from(ciphertext), MAX_ENCAPSULATED_KEY_SIZE).await?;
        self.advance(HandshakeState::KeyEncapsulated)?;
        self.advance(HandshakeState::Established)?;

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use crypto_session::{RsaOaepKem, X25519Kem};
    use tokio::io::duplex;

    use super::*;
    use crate::{TransportError, framed};

    fn rsa_keypair() -> &'static KemKeyPair<RsaOaepKem> {
        static KEYPAIR: OnceLock<KemKeyPair<RsaOaepKem>> = OnceLock::new();
        KEYPAIR.get_or_init(|| KemKeyPair::generate().unwrap())
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_both_sides_derive_same_key() {
        let (a, b) = duplex(1 << 16);
        let mut server_stream = framed(a, MAX_PUBLIC_KEY_SIZE);
        let mut client_stream = framed(b, MAX_PUBLIC_KEY_SIZE);
        let mut server = Handshake::new(HandshakeRole::Server, TIMEOUT);
        let mut client = Handshake::new(HandshakeRole::Client, TIMEOUT);

        let (server_key, client_key) = tokio::join!(
            server.respond(&mut server_stream, rsa_keypair()),
            client.initiate::<_, RsaOaepKem>(&mut client_stream),
        );

        assert_eq!(server_key.unwrap().as_bytes(), client_key.unwrap().as_bytes());
        assert_eq!(server.state(), HandshakeState::Established);
        assert_eq!(client.state(), HandshakeState::Established);
    }

    #[tokio::test]
    async fn test_x25519_kem_drives_same_state_machine() {
        let keypair = KemKeyPair::<X25519Kem>::generate().unwrap();
        let (a, b) = duplex(1 << 16);
        let mut server_stream = framed(a, MAX_PUBLIC_KEY_SIZE);
        let mut client_stream = framed(b, MAX_PUBLIC_KEY_SIZE);
        let mut server = Handshake::new(HandshakeRole::Server, TIMEOUT);
        let mut client = Handshake::new(HandshakeRole::Client, TIMEOUT);

        let (server_key, client_key) = tokio::join!(
            server.respond(&mut server_stream, &keypair),
            client.initiate::<_, X25519Kem>(&mut client_stream),
        );

        assert_eq!(server_key.unwrap().as_bytes(), client_key.unwrap().as_bytes());
    }

    #[tokio::test]
    async fn test_garbage_encapsulation_fails_handshake() {
        let (a, b) = duplex(1 << 16);
        let mut server_stream = framed(a, MAX_PUBLIC_KEY_SIZE);
        let mut peer = framed(b, MAX_PUBLIC_KEY_SIZE);
        let mut server = Handshake::new(HandshakeRole::Server, TIMEOUT);

        let malicious = async {
            read_frame(&mut peer, MAX_PUBLIC_KEY_SIZE).await.unwrap().unwrap();
            write_frame(&mut peer, Bytes::from(vec![0x42; 256]), MAX_ENCAPSULATED_KEY_SIZE)
                .await
                .unwrap();
        };
        let (result, ()) = tokio::join!(server.respond(&mut server_stream, rsa_keypair()), malicious);

        assert!(matches!(
            result,
            Err(TransportError::Handshake(HandshakeError::Decapsulation))
        ));
        assert_eq!(server.state(), HandshakeState::Failed);
    }

    #[tokio::test]
    async fn test_invalid_public_key_fails_handshake() {
        let (a, b) = duplex(1 << 16);
        let mut fake_server = framed(a, MAX_PUBLIC_KEY_SIZE);
        let mut client_stream = framed(b, MAX_PUBLIC_KEY_SIZE);
        let mut client = Handshake::new(HandshakeRole::Client, TIMEOUT);

        write_frame(&mut fake_server, Bytes::from_static(b"not a key"), MAX_PUBLIC_KEY_SIZE)
            .await
            .unwrap();
        let result = client.initiate::<_, RsaOaepKem>(&mut client_stream).await;

        assert!(matches!(
            result,
            Err(TransportError::Handshake(HandshakeError::InvalidPublicKey(_)))
        ));
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    #[tokio::test]
    async fn test_oversized_public_key_is_rejected() {
        let (a, b) = duplex(1 << 16);
        let mut fake_server = framed(a, 2 * MAX_PUBLIC_KEY_SIZE);
        let mut client_stream = framed(b, MAX_PUBLIC_KEY_SIZE);
        let mut client = Handshake::new(HandshakeRole::Client, TIMEOUT);

        let oversized = Bytes::from(vec![b'A'; MAX_PUBLIC_KEY_SIZE + 1]);
        write_frame(&mut fake_server, oversized, 2 * MAX_PUBLIC_KEY_SIZE)
            .await
            .unwrap();
        let result = client.initiate::<_, RsaOaepKem>(&mut client_stream).await;

        assert!(matches!(
            result,
            Err(TransportError::FrameLimitExceeded { max: MAX_PUBLIC_KEY_SIZE })
        ));
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let (a, _b) = duplex(1 << 16);
        let mut server_stream = framed(a, MAX_PUBLIC_KEY_SIZE);
        let mut server = Handshake::new(HandshakeRole::Server, Duration::from_millis(100));

        let result = server.respond(&mut server_stream, rsa_keypair()).await;

        assert!(matches!(
            result,
            Err(TransportError::Handshake(HandshakeError::Timeout(_)))
        ));
        assert_eq!(server.state(), HandshakeState::Failed);
    }

    #[tokio::test]
    async fn test_peer_hangup_during_handshake() {
        let (a, b) = duplex(1 << 16);
        let mut server_stream = framed(a, MAX_PUBLIC_KEY_SIZE);
        let mut peer = framed(b, MAX_PUBLIC_KEY_SIZE);
        let mut server = Handshake::new(HandshakeRole::Server, TIMEOUT);

        let hangup = async move {
            read_frame(&mut peer, MAX_PUBLIC_KEY_SIZE).await.unwrap().unwrap();
            drop(peer);
        };
        let (result, ()) = tokio::join!(server.respond(&mut server_stream, rsa_keypair()), hangup);

        assert!(matches!(
            result,
            Err(TransportError::Handshake(HandshakeError::ConnectionClosed))
        ));
    }
}
