//! Quantum Chat Client
//!
//! `direct` talks to the chat server over a KEM-secured TCP channel; `relay`
//! joins the relay server and chats with whichever client it is paired with.

mod direct;
mod relay;

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use crypto_session::{RsaOaepKem, X25519Kem};
use net_transport::ChannelConfig;
use shared_protocol::{DEFAULT_CHAT_PORT, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_RELAY_PORT};

use direct::DirectOptions;

#[derive(Debug, Parser)]
#[command(name = "chat-client", version, about = "Quantum-safe chat client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chat with the chat server over a direct TCP connection
    Direct(DirectArgs),
    /// Chat with a paired peer through the relay server
    Relay(RelayArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KemChoice {
    RsaOaep,
    X25519,
}

#[derive(Debug, clap::Args)]
struct DirectArgs {
    /// Chat server address
    #[arg(long, env = "CHAT_SERVER", default_value_t = format!("127.0.0.1:{DEFAULT_CHAT_PORT}"))]
    server: String,

    /// Key-encapsulation mechanism; must match the server
    #[arg(long, value_enum, default_value_t = KemChoice::RsaOaep)]
    kem: KemChoice,

    /// Seconds allowed for the handshake
    #[arg(long, default_value_t = 30)]
    handshake_timeout: u64,

    /// Largest encrypted message in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// Reconnect attempts after a transport failure
    #[arg(long, default_value_t = 5)]
    retries: u32,

    /// Seconds to wait between reconnect attempts
    #[arg(long, default_value_t = 2)]
    retry_delay: u64,
}

#[derive(Debug, clap::Args)]
struct RelayArgs {
    /// Relay WebSocket URL
    #[arg(long, env = "RELAY_URL", default_value_t = format!("ws://127.0.0.1:{DEFAULT_RELAY_PORT}/ws"))]
    url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so chat output stays readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_client=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Direct(args) => {
            let options = DirectOptions {
                server: args.server,
                config: ChannelConfig::new()
                    .with_handshake_timeout(Duration::from_secs(args.handshake_timeout))
                    .with_max_message_size(args.max_message_size),
                retries: args.retries,
                retry_delay: Duration::from_secs(args.retry_delay),
            };
            match args.kem {
                KemChoice::RsaOaep => direct::run::<RsaOaepKem>(options).await,
                KemChoice::X25519 => direct::run::<X25519Kem>(options).await,
            }
        }
        Command::Relay(args) => relay::run(args.url).await,
    }
}
