//! p1castd - DSMR P1 telegram broadcast daemon
//!
//! Reads telegrams from a P1 serial port and broadcasts each complete
//! telegram, byte for byte, to every connected TCP client.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: /dev/ttyUSB0, DSMR 5, listen on 0.0.0.0:9988
//! p1castd
//!
//! # Older meter on a different device and port
//! p1castd --device /dev/ttyAMA0 --dsmr-version 3 --port 7000
//!
//! # Keep running even if the serial device is missing
//! p1castd --allow-serial-failure
//!
//! # Settings from a file
//! P1CAST_CONFIG=/etc/p1cast.toml p1castd
//!
//! # Enable debug logging
//! RUST_LOG=p1castd=debug p1castd
//! ```
//!
//! # Signal Handling
//!
//! SIGTERM/SIGINT trigger a graceful shutdown: the listener stops
//! accepting, remaining client sockets are closed, and the process
//! exits.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use p1castd::config::{Args, Config};
use p1castd::distributor::Distributor;
use p1castd::serial;
use p1castd::server::Listener;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    let config = Config::load(&args).context("Failed to load configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %config.device,
        dsmr_version = %config.dsmr_version,
        listen = %config.listen_addr(),
        "p1castd starting"
    );

    // Cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Line source and framer. Under the tolerate policy an absent
    // device yields a channel that simply never produces telegrams.
    let lines = serial::spawn_line_reader(&config).context("Failed to start telegram source")?;
    let telegrams = serial::spawn_framer(lines);

    // Listener feeds accepted connections to the distributor.
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();
    let listener = Listener::bind(&config.listen_addr())
        .await
        .context("Failed to bind listen socket")?;
    tokio::spawn(listener.run(conn_tx, cancel_token.clone()));

    // The distributor owns the client set; run it in the foreground.
    let distributor = Distributor::new(conn_rx, telegrams, config.write_timeout, cancel_token);
    distributor.run().await;

    info!("p1castd stopped");
    Ok(())
}

/// Initializes tracing with an env filter; `-v` raises the default
/// level to debug (`RUST_LOG` still wins).
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("p1castd={level}").parse()?)
                .add_directive(format!("p1cast_core={level}").parse()?),
        )
        .init();

    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
