//! Broadcast distributor - owns the client set and delivers telegrams.
//!
//! The distributor is the single task allowed to touch the client
//! set. It merges two event streams - new connections from the
//! listener and completed telegrams from the framer - and processes
//! exactly one event at a time, so registration and delivery never
//! race and no locking is needed.
//!
//! Delivery guarantees per broadcast round:
//! - every client registered at the start of the round is either
//!   written to or removed, never silently skipped
//! - a failed write closes and removes that one client; the round
//!   continues for the others
//! - telegrams go out in completion order, at most once per client
//! - clients that connect after a telegram was dispatched never
//!   receive it (no replay)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use p1cast_core::Telegram;

/// A freshly accepted connection, handed over by the listener.
pub struct NewClient<W> {
    /// Peer address, for logging.
    pub peer: SocketAddr,

    /// Write half of the socket. The read half never reaches the
    /// distributor; this service is one-directional.
    pub writer: W,
}

/// One registered, live client.
struct ClientConnection<W> {
    peer: SocketAddr,
    writer: W,
}

/// The broadcast distributor.
///
/// Generic over the writer type so tests can register in-memory
/// duplex streams; the daemon uses `tokio::net::tcp::OwnedWriteHalf`.
pub struct Distributor<W> {
    /// The client set. Mutated only inside `run`.
    clients: HashMap<u64, ClientConnection<W>>,

    /// Next client id, monotonically increasing.
    next_client_id: u64,

    /// New connections from the listener.
    connections: mpsc::UnboundedReceiver<NewClient<W>>,

    /// Completed telegrams from the framer.
    telegrams: mpsc::UnboundedReceiver<Telegram>,

    /// Per-client write deadline; a stalled client counts as failed.
    write_timeout: Option<Duration>,

    /// Cancellation token for graceful shutdown.
    cancel_token: CancellationToken,
}

impl<W: AsyncWrite + Unpin> Distributor<W> {
    /// Creates a distributor with an empty client set.
    pub fn new(
        connections: mpsc::UnboundedReceiver<NewClient<W>>,
        telegrams: mpsc::UnboundedReceiver<Telegram>,
        write_timeout: Option<Duration>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 0,
            connections,
            telegrams,
            write_timeout,
            cancel_token,
        }
    }

    /// Runs the event loop until cancellation or until the
    /// connection stream closes.
    ///
    /// If the telegram stream ends (tolerated serial failure), the
    /// distributor keeps accepting connections and idles - clients
    /// simply receive nothing further.
    pub async fn run(mut self) {
        info!("Distributor started");

        let mut telegrams_done = false;

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Distributor shutdown requested");
                    break;
                }

                conn = self.connections.recv() => {
                    match conn {
                        Some(client) => self.register(client),
                        None => {
                            debug!("Connection stream closed, distributor stopping");
                            break;
                        }
                    }
                }

                telegram = self.telegrams.recv(), if !telegrams_done => {
                    match telegram {
                        Some(telegram) => self.broadcast(&telegram).await,
                        None => {
                            warn!("Telegram stream ended, continuing to serve connections");
                            telegrams_done = true;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Adds a newly accepted client to the set.
    fn register(&mut self, client: NewClient<W>) {
        let id = self.next_client_id;
        self.next_client_id += 1;

        info!(
            peer = %client.peer,
            clients = self.clients.len() + 1,
            "Client connected"
        );

        self.clients.insert(
            id,
            ClientConnection {
                peer: client.peer,
                writer: client.writer,
            },
        );
    }

    /// One broadcast round: writes the telegram to every registered
    /// client, then removes the ones whose write failed.
    ///
    /// Failures are collected during iteration and removed
    /// afterwards so no client is skipped within the round.
    async fn broadcast(&mut self, telegram: &Telegram) {
        let mut failed = Vec::new();

        for (id, client) in self.clients.iter_mut() {
            let result =
                write_with_deadline(&mut client.writer, telegram.as_bytes(), self.write_timeout)
                    .await;

            if let Err(e) = result {
                info!(peer = %client.peer, error = %e, "Client disconnected");
                failed.push(*id);
            }
        }

        for id in failed {
            if let Some(mut client) = self.clients.remove(&id) {
                let _ = client.writer.shutdown().await;
            }
        }

        debug!(
            clients = self.clients.len(),
            bytes = telegram.len(),
            "Broadcast round complete"
        );
    }

    /// Closes all remaining clients.
    async fn shutdown(mut self) {
        for (_, mut client) in self.clients.drain() {
            let _ = client.writer.shutdown().await;
        }
        info!("Distributor stopped");
    }
}

/// Writes the full payload, optionally bounded by a deadline.
async fn write_with_deadline<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
    deadline: Option<Duration>,
) -> Result<(), WriteError> {
    let write = async {
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    };

    match deadline {
        Some(limit) => match timeout(limit, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WriteError::Io(e)),
            Err(_) => Err(WriteError::DeadlineExceeded),
        },
        None => write.await.map_err(WriteError::Io),
    }
}

/// Why a client write was treated as failed.
#[derive(Debug, Error)]
enum WriteError {
    #[error("{0}")]
    Io(std::io::Error),

    #[error("write deadline exceeded")]
    DeadlineExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::time::sleep;

    /// Time for the distributor to drain one channel event.
    const SETTLE: Duration = Duration::from_millis(100);

    /// Guard for reads that must complete.
    const READ_TIMEOUT: Duration = Duration::from_secs(2);

    struct TestDistributor {
        conn_tx: mpsc::UnboundedSender<NewClient<DuplexStream>>,
        telegram_tx: mpsc::UnboundedSender<Telegram>,
        cancel_token: CancellationToken,
    }

    impl TestDistributor {
        fn spawn(write_timeout: Option<Duration>) -> Self {
            let (conn_tx, conn_rx) = mpsc::unbounded_channel();
            let (telegram_tx, telegram_rx) = mpsc::unbounded_channel();
            let cancel_token = CancellationToken::new();

            let distributor =
                Distributor::new(conn_rx, telegram_rx, write_timeout, cancel_token.clone());
            tokio::spawn(distributor.run());

            Self {
                conn_tx,
                telegram_tx,
                cancel_token,
            }
        }

        /// Registers an in-memory client and waits for the
        /// registration event to be processed.
        async fn connect(&self, buffer: usize) -> DuplexStream {
            let (local, remote) = tokio::io::duplex(buffer);
            let peer: SocketAddr = "127.0.0.1:0".parse().expect("addr");
            self.conn_tx
                .send(NewClient {
                    peer,
                    writer: remote,
                })
                .expect("send connection");
            sleep(SETTLE).await;
            local
        }

        fn send(&self, telegram: &[u8]) {
            self.telegram_tx
                .send(Telegram::new(telegram.to_vec()))
                .expect("send telegram");
        }
    }

    async fn read_exact_bytes(stream: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        timeout(READ_TIMEOUT, stream.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .expect("read failed");
        buf
    }

    const TELEGRAM: &[u8] = b"/meter\r\n1-0:1.8.0(12345)\r\n!ABCD\r\n";

    #[tokio::test]
    async fn test_fan_out_delivers_identical_copies() {
        let bridge = TestDistributor::spawn(None);
        let mut a = bridge.connect(1024).await;
        let mut b = bridge.connect(1024).await;

        bridge.send(TELEGRAM);

        assert_eq!(read_exact_bytes(&mut a, TELEGRAM.len()).await, TELEGRAM);
        assert_eq!(read_exact_bytes(&mut b, TELEGRAM.len()).await, TELEGRAM);

        bridge.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_failed_client_does_not_abort_the_round() {
        let bridge = TestDistributor::spawn(None);
        let mut a = bridge.connect(1024).await;
        let b = bridge.connect(1024).await;
        let mut c = bridge.connect(1024).await;

        // Dropping b's local end makes writes to it fail.
        drop(b);
        sleep(SETTLE).await;

        bridge.send(TELEGRAM);
        assert_eq!(read_exact_bytes(&mut a, TELEGRAM.len()).await, TELEGRAM);
        assert_eq!(read_exact_bytes(&mut c, TELEGRAM.len()).await, TELEGRAM);

        // The survivors keep receiving on later rounds too.
        bridge.send(TELEGRAM);
        assert_eq!(read_exact_bytes(&mut a, TELEGRAM.len()).await, TELEGRAM);
        assert_eq!(read_exact_bytes(&mut c, TELEGRAM.len()).await, TELEGRAM);

        bridge.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_late_joiner_gets_no_backfill() {
        let bridge = TestDistributor::spawn(None);
        let mut early = bridge.connect(1024).await;

        bridge.send(b"/one\r\n!1\r\n");
        assert_eq!(
            read_exact_bytes(&mut early, 10).await,
            b"/one\r\n!1\r\n"
        );

        let mut late = bridge.connect(1024).await;
        bridge.send(b"/two\r\n!2\r\n");

        // The late client's first bytes are the second telegram.
        assert_eq!(read_exact_bytes(&mut late, 10).await, b"/two\r\n!2\r\n");
        assert_eq!(
            read_exact_bytes(&mut early, 10).await,
            b"/two\r\n!2\r\n"
        );

        bridge.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_no_duplicate_delivery() {
        let bridge = TestDistributor::spawn(None);
        let mut client = bridge.connect(1024).await;

        bridge.send(TELEGRAM);
        assert_eq!(
            read_exact_bytes(&mut client, TELEGRAM.len()).await,
            TELEGRAM
        );

        // Nothing further shows up without another telegram.
        let mut buf = [0u8; 1];
        let extra = timeout(SETTLE, client.read(&mut buf)).await;
        assert!(extra.is_err(), "unexpected extra bytes after delivery");

        bridge.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_stalled_client_is_removed_on_deadline() {
        let bridge = TestDistributor::spawn(Some(Duration::from_millis(100)));

        // A buffer smaller than the telegram stalls the write until
        // the peer reads - which this client never does.
        let _stalled = bridge.connect(4).await;
        let mut healthy = bridge.connect(1024).await;

        bridge.send(TELEGRAM);
        assert_eq!(
            read_exact_bytes(&mut healthy, TELEGRAM.len()).await,
            TELEGRAM
        );

        // The stalled client is gone; later rounds are not delayed.
        bridge.send(TELEGRAM);
        assert_eq!(
            read_exact_bytes(&mut healthy, TELEGRAM.len()).await,
            TELEGRAM
        );

        bridge.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_telegram_ordering_preserved() {
        let bridge = TestDistributor::spawn(None);
        let mut client = bridge.connect(4096).await;

        for i in 0..5u8 {
            let body = format!("/t\r\n!{i}\r\n");
            bridge.send(body.as_bytes());
        }

        let expected: Vec<u8> = (0..5u8)
            .flat_map(|i| format!("/t\r\n!{i}\r\n").into_bytes())
            .collect();
        assert_eq!(
            read_exact_bytes(&mut client, expected.len()).await,
            expected
        );

        bridge.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_distributor_idles_when_telegram_stream_ends() {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (telegram_tx, telegram_rx) = mpsc::unbounded_channel::<Telegram>();
        let cancel_token = CancellationToken::new();

        let distributor =
            Distributor::<DuplexStream>::new(conn_rx, telegram_rx, None, cancel_token.clone());
        tokio::spawn(distributor.run());

        // Simulate a tolerated serial failure: no telegrams, ever.
        drop(telegram_tx);
        sleep(SETTLE).await;

        // Connections are still accepted after the stream ended.
        let (local, remote) = tokio::io::duplex(64);
        let peer: SocketAddr = "127.0.0.1:0".parse().expect("addr");
        conn_tx
            .send(NewClient {
                peer,
                writer: remote,
            })
            .expect("distributor should still accept connections");
        sleep(SETTLE).await;

        // The client stays open (its far end was not shut down).
        drop(local);
        cancel_token.cancel();
    }
}
