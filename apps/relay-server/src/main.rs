//! Quantum Chat Relay Server

use std::net::SocketAddr;

use clap::Parser;
use relay_server::{AppState, router};
use shared_protocol::DEFAULT_RELAY_PORT;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "relay-server", version, about = "Pairs chat clients and relays sealed messages")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "RELAY_BIND", default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_RELAY_PORT)))]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_server=debug".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Starting Quantum Chat Relay Server");

    let app = router(AppState::new());

    info!("Listening on {}", args.bind);
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
