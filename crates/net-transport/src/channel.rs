//! Established secure channel over a framed byte stream

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use crypto_session::{CryptoSession, Kem, KemKeyPair};
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use shared_protocol::{HandshakeRole, MAX_PUBLIC_KEY_SIZE};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::{
    ChannelConfig, FramedStream, Handshake, TransportResult, framed, read_frame, set_frame_limit,
    write_frame,
};

/// One decrypted application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub plaintext: Vec<u8>,
    /// Size of the encrypted frame as it arrived
    pub wire_len: usize,
}

/// Connection that has completed its single handshake
///
/// The only constructors consume the raw stream and run the handshake, so a
/// second handshake on the same connection cannot be expressed.
pub struct SecureChannel<S> {
    framed: FramedStream<S>,
    session: Arc<CryptoSession>,
    max_message_size: usize,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Server role: publish the keypair's public key and decapsulate
    pub async fn accept<K: Kem>(
        stream: S,
        keypair: &KemKeyPair<K>,
        config: &ChannelConfig,
    ) -> TransportResult<Self> {
        let mut framed = framed(stream, MAX_PUBLIC_KEY_SIZE);
        let mut handshake = Handshake::new(HandshakeRole::Server, config.handshake_timeout);
        let key = handshake.respond(&mut framed, keypair).await?;
        Ok(Self::established(framed, CryptoSession::new(key), config))
    }

    /// Client role: encapsulate a fresh session key to the server's public key
    pub async fn connect<K: Kem>(stream: S, config: &ChannelConfig) -> TransportResult<Self> {
        let mut framed = framed(stream, MAX_PUBLIC_KEY_SIZE);
        let mut handshake = Handshake::new(HandshakeRole::Client, config.handshake_timeout);
        let key = handshake.initiate::<S, K>(&mut framed).await?;
        Ok(Self::established(framed, CryptoSession::new(key), config))
    }

    fn established(
        mut framed: FramedStream<S>,
        session: CryptoSession,
        config: &ChannelConfig,
    ) -> Self {
        set_frame_limit(&mut framed, config.max_message_size);
        Self {
            framed,
            session: Arc::new(session),
            max_message_size: config.max_message_size,
        }
    }

    pub fn session(&self) -> &Arc<CryptoSession> {
        &self.session
    }

    /// Seal and send one message; returns the encrypted frame size
    pub async fn send(&mut self, plaintext: &[u8]) -> TransportResult<usize> {
        send_sealed(&mut self.framed, &self.session, plaintext, self.max_message_size).await
    }

    /// Next message that decodes and authenticates
    ///
    /// Malformed or forged messages are logged and skipped. `Ok(None)` means
    /// the peer closed the connection.
    pub async fn recv(&mut self) -> TransportResult<Option<Received>> {
        recv_opened(&mut self.framed, &self.session, self.max_message_size).await
    }

    /// Deliver every message to `on_message` until the peer closes
    pub async fn run<F>(mut self, on_message: F) -> TransportResult<()>
    where
        F: FnMut(Received),
    {
        receive_loop(&mut self.framed, &self.session, self.max_message_size, on_message).await
    }

    /// Split into halves that can be driven by separate tasks
    pub fn split(self) -> (ChannelReader<S>, ChannelWriter<S>) {
        let (sink, stream) = self.framed.split();
        (
            ChannelReader {
                stream,
                session: self.session.clone(),
                max_message_size: self.max_message_size,
            },
            ChannelWriter {
                sink,
                session: self.session,
                max_message_size: self.max_message_size,
            },
        )
    }

    /// Flush and shut down the write side
    pub async fn close(mut self) -> TransportResult<()> {
        SinkExt::<Bytes>::close(&mut self.framed).await?;
        Ok(())
    }
}

/// Receiving half of a [`SecureChannel`]
pub struct ChannelReader<S> {
    stream: SplitStream<FramedStream<S>>,
    session: Arc<CryptoSession>,
    max_message_size: usize,
}

impl<S> ChannelReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn recv(&mut self) -> TransportResult<Option<Received>> {
        recv_opened(&mut self.stream, &self.session, self.max_message_size).await
    }

    pub async fn run<F>(mut self, on_message: F) -> TransportResult<()>
    where
        F: FnMut(Received),
    {
        receive_loop(&mut self.stream, &self.session, self.max_message_size, on_message).await
    }
}

/// Sending half of a [`SecureChannel`]
pub struct ChannelWriter<S> {
    sink: SplitSink<FramedStream<S>, Bytes>,
    session: Arc<CryptoSession>,
    max_message_size: usize,
}

impl<S> ChannelWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn send(&mut self, plaintext: &[u8]) -> TransportResult<usize> {
        send_sealed(&mut self.sink, &self.session, plaintext, self.max_message_size).await
    }

    pub async fn close(mut self) -> TransportResult<()> {
        self.sink.close().await?;
        Ok(())
    }
}

async fn send_sealed<Si>(
    sink: &mut Si,
    session: &CryptoSession,
    plaintext: &[u8],
    max: usize,
) -> TransportResult<usize>
where
    Si: Sink<Bytes, Error = io::Error> + Unpin,
{
    let wire = session.encode(plaintext)?;
    let wire_len = wire.len();
    write_frame(sink, Bytes::from(wire), max).await?;
    debug!(wire_len, "sent encrypted message");
    Ok(wire_len)
}

async fn recv_opened<St>(
    stream: &mut St,
    session: &CryptoSession,
    max: usize,
) -> TransportResult<Option<Received>>
where
    St: Stream<Item = io::Result<BytesMut>> + Unpin,
{
    loop {
        let Some(frame) = read_frame(stream, max).await? else {
            return Ok(None);
        };

        match session.decode(&frame) {
            Ok(plaintext) => {
                return Ok(Some(Received {
                    plaintext,
                    wire_len: frame.len(),
                }));
            }
            Err(e) => {
                warn!(
                    error_class = e.kind(),
                    error = %e,
                    wire_len = frame.len(),
                    "dropping inbound message"
                );
            }
        }
    }
}

async fn receive_loop<St, F>(
    stream: &mut St,
    session: &CryptoSession,
    max: usize,
    mut on_message: F,
) -> TransportResult<()>
where
    St: Stream<Item = io::Result<BytesMut>> + Unpin,
    F: FnMut(Received),
{
    while let Some(message) = recv_opened(stream, session, max).await? {
        on_message(message);
    }

    let stats = session.stats();
    info!(
        opened = stats.opened,
        rejected = stats.rejected,
        "peer closed the connection"
    );
    Ok(())
}
