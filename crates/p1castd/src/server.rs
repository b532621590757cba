//! TCP listener - accepts client connections for the distributor.
//!
//! The listener binds once at startup (bind failure is fatal: the
//! service cannot run without a listening socket) and then accepts
//! until cancelled. A failure to accept one connection is logged and
//! the loop continues; it never brings the daemon down.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::distributor::NewClient;

/// The telegram listener socket.
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Binds to the given address.
    ///
    /// With port 0 the OS assigns a free port; `local_addr` reports
    /// the actual one.
    pub async fn bind(addr: &str) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(addr = %local_addr, "Listening for telegram clients");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until cancelled, handing each write half
    /// to the distributor's connection channel.
    pub async fn run(
        self,
        connections: mpsc::UnboundedSender<NewClient<OwnedWriteHalf>>,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Listener shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let (read_half, write_half) = stream.into_split();
                            spawn_client_drain(read_half, peer);

                            if connections
                                .send(NewClient { peer, writer: write_half })
                                .is_err()
                            {
                                debug!("Distributor gone, listener stopping");
                                break;
                            }
                        }
                        Err(e) => {
                            // Keep accepting other connections.
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
    }
}

/// Reads and discards anything the client sends.
///
/// The service is one-directional; client bytes carry no meaning,
/// but draining them keeps the peer's send path from backing up.
/// Disconnection is still detected only on write failure.
fn spawn_client_drain(mut read_half: OwnedReadHalf, peer: SocketAddr) {
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Client read half closed");
                    break;
                }
            }
        }
    });
}

/// Errors that can occur in listener operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}
