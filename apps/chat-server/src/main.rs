//! Quantum Chat Server
//!
//! Publishes a KEM public key to every client, recovers each client's session
//! key and prints the messages it receives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use crypto_session::{Kem, RsaOaepKem, X25519Kem};
use net_transport::{ChannelConfig, ChatServer, MessageHandler, Received, ServerContext};
use shared_protocol::{DEFAULT_CHAT_PORT, DEFAULT_MAX_MESSAGE_SIZE};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "chat-server", version, about = "Quantum-safe chat server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "CHAT_BIND", default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_CHAT_PORT)))]
    bind: SocketAddr,

    /// Key-encapsulation mechanism offered to clients
    #[arg(long, value_enum, default_value_t = KemChoice::RsaOaep)]
    kem: KemChoice,

    /// Seconds allowed for each handshake
    #[arg(long, default_value_t = 30)]
    handshake_timeout: u64,

    /// Largest encrypted message in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KemChoice {
    RsaOaep,
    X25519,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_server=info".parse()?)
                .add_directive("net_transport=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Starting Quantum Chat Server");

    let config = ChannelConfig::new()
        .with_handshake_timeout(Duration::from_secs(args.handshake_timeout))
        .with_max_message_size(args.max_message_size);

    match args.kem {
        KemChoice::RsaOaep => serve::<RsaOaepKem>(args.bind, config).await,
        KemChoice::X25519 => serve::<X25519Kem>(args.bind, config).await,
    }
}

async fn serve<K: Kem>(bind: SocketAddr, config: ChannelConfig) -> anyhow::Result<()> {
    info!(algorithm = K::NAME, "Generating server keypair");
    let context = ServerContext::<K>::new(config)?;
    info!(
        public_key_bytes = context.keypair().encoded_public_key().len(),
        fingerprint = %context.keypair().public_fingerprint(),
        "Server keypair ready"
    );

    let server = ChatServer::bind(bind, Arc::new(context)).await?;
    info!("Listening on {}", server.local_addr()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Ctrl-C handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    });

    let handler: MessageHandler = Arc::new(log_message);
    server.run(handler, shutdown_rx).await?;

    Ok(())
}

fn log_message(addr: SocketAddr, message: Received) {
    info!(%addr, "[Encrypted Traffic Received: {} bytes]", message.wire_len);
    info!(%addr, "Client: {}", String::from_utf8_lossy(&message.plaintext));
}
