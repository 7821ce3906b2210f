//! Direct TCP chat with the chat server

use std::time::Duration;

use crypto_session::Kem;
use net_transport::{ChannelConfig, TransportError, TransportResult, connect};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::time::sleep;
use tracing::{info, warn};

/// Connection and retry settings for one run
#[derive(Debug, Clone)]
pub struct DirectOptions {
    pub server: String,
    pub config: ChannelConfig,
    /// Consecutive failed attempts allowed before giving up
    pub retries: u32,
    pub retry_delay: Duration,
}

type StdinLines = Lines<BufReader<Stdin>>;

/// Chat until `exit` or end of input, reconnecting after transport failures
pub async fn run<K: Kem>(options: DirectOptions) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut failures = 0;

    loop {
        match chat_once::<K>(&options, &mut lines, &mut failures).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                failures += 1;
                if failures > options.retries {
                    return Err(e.into());
                }
                warn!(
                    error = %e,
                    attempt = failures,
                    max = options.retries,
                    "connection lost, reconnecting"
                );
                println!(
                    "Connection lost ({e}); reconnecting in {:?}...",
                    options.retry_delay
                );
                sleep(options.retry_delay).await;
            }
        }
    }
}

async fn chat_once<K: Kem>(
    options: &DirectOptions,
    lines: &mut StdinLines,
    failures: &mut u32,
) -> TransportResult<()> {
    let channel = connect::<K>(options.server.as_str(), &options.config).await?;
    *failures = 0;

    let fingerprint = channel.session().fingerprint();
    info!(server = %options.server, key = %fingerprint, "connected");
    println!("--- Quantum Secure Chat ---");
    println!("Connected to {} using {}", options.server, K::NAME);
    println!("Session key fingerprint: {fingerprint}");
    println!("Type a message and press Enter; 'exit' quits.");

    let (reader, mut writer) = channel.split();
    let mut incoming = tokio::spawn(reader.run(|message| {
        println!("Server: {}", String::from_utf8_lossy(&message.plaintext));
    }));

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break writer.close().await,
                    Err(e) => break Err(e.into()),
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line.eq_ignore_ascii_case("exit") {
                    println!("Closing secure channel");
                    break writer.close().await;
                }
                if let Err(e) = writer.send(line.as_bytes()).await {
                    break Err(e);
                }
            }

            finished = &mut incoming => {
                break match finished {
                    Ok(Ok(())) => Err(TransportError::ConnectionClosed),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(TransportError::ConnectionFailed(e.to_string())),
                };
            }
        }
    };

    incoming.abort();
    outcome
}
