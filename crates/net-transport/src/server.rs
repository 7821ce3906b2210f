//! TCP chat server and client connector

use std::net::SocketAddr;
use std::sync::Arc;

use crypto_session::{CryptoResult, Kem, KemKeyPair};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{ChannelConfig, Received, SecureChannel, TransportError, TransportResult};

/// Callback for every authenticated message, tagged with the peer address
pub type MessageHandler = Arc<dyn Fn(SocketAddr, Received) + Send + Sync>;

/// State shared by every connection task of one server
pub struct ServerContext<K: Kem> {
    keypair: KemKeyPair<K>,
    config: ChannelConfig,
}

impl<K: Kem> ServerContext<K> {
    /// Generate a fresh long-term keypair for this server run
    pub fn new(config: ChannelConfig) -> CryptoResult<Self> {
        Ok(Self::with_keypair(KemKeyPair::generate()?, config))
    }

    pub fn with_keypair(keypair: KemKeyPair<K>, config: ChannelConfig) -> Self {
        Self { keypair, config }
    }

    pub fn keypair(&self) -> &KemKeyPair<K> {
        &self.keypair
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

/// Accept loop spawning one task per connection
pub struct ChatServer<K: Kem> {
    listener: TcpListener,
    context: Arc<ServerContext<K>>,
}

impl<K: Kem> ChatServer<K> {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        context: Arc<ServerContext<K>>,
    ) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind(e.to_string()))?;

        Ok(Self {
            listener,
            context,
        })
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &Arc<ServerContext<K>> {
        &self.context
    }

    /// Serve until `shutdown` turns true or its sender is dropped
    ///
    /// Connections already accepted keep running after the loop stops.
    pub async fn run(
        self,
        handler: MessageHandler,
        mut shutdown: watch::Receiver<bool>,
    ) -> TransportResult<()> {
        info!(
            addr = %self.local_addr()?,
            algorithm = K::NAME,
            key = %self.context.keypair.public_fingerprint(),
            "Chat server listening"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "accepted connection");
                        let context = self.context.clone();
                        let handler = handler.clone();
                        tokio::spawn(handle_connection(stream, addr, context, handler));
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Chat server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<K: Kem>(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<ServerContext<K>>,
    handler: MessageHandler,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%addr, error = %e, "failed to set TCP_NODELAY");
    }

    let channel = match SecureChannel::accept(stream, &context.keypair, &context.config).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!(%addr, error = %e, "handshake with client failed");
            return;
        }
    };
    info!(%addr, key = %channel.session().fingerprint(), "client connected");

    match channel.run(|message| handler(addr, message)).await {
        Ok(()) => info!(%addr, "client disconnected"),
        Err(e) => warn!(%addr, error = %e, "connection terminated"),
    }
}

/// Open a TCP connection and run the client side of the handshake
pub async fn connect<K: Kem>(
    addr: impl ToSocketAddrs,
    config: &ChannelConfig,
) -> TransportResult<SecureChannel<TcpStream>> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    stream.set_nodelay(true)?;
    SecureChannel::connect::<K>(stream, config).await
}
