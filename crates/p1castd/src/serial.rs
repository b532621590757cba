//! Line Source: serial device reader and telegram framer task.
//!
//! The `serialport` crate is blocking, so the device is read on a
//! dedicated OS thread that pushes newline-terminated byte lines into
//! an unbounded channel. A separate async task drives the
//! [`TelegramFramer`] from that channel and emits completed telegrams.
//!
//! Failure handling follows the configured policy: an open failure is
//! fatal under [`SerialPolicy::Fatal`] and tolerated (no lines are
//! ever produced) under [`SerialPolicy::Tolerate`]. Mid-stream read
//! errors are logged and the reader keeps going.

use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use p1cast_core::{Parity, Telegram, TelegramFramer};

use crate::config::{Config, SerialPolicy};

/// Read timeout on the serial device. A timeout is not an error:
/// partial line bytes stay buffered and the read is retried.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a non-timeout read error before retrying, so a
/// misbehaving device cannot spin the reader thread.
const ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Opens the configured serial device and spawns the reader thread.
///
/// Returns the receiving end of the line channel. Under
/// `SerialPolicy::Tolerate` an open failure returns a channel that
/// never yields lines instead of an error.
pub fn spawn_line_reader(
    config: &Config,
) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, SerialError> {
    let (tx, rx) = mpsc::unbounded_channel();

    let profile = config.dsmr_version.link_profile();
    let port = serialport::new(&config.device, profile.baud_rate)
        .data_bits(map_data_bits(profile.data_bits))
        .parity(map_parity(profile.parity))
        .stop_bits(map_stop_bits(profile.stop_bits))
        .timeout(READ_TIMEOUT)
        .open();

    let port = match port {
        Ok(port) => port,
        Err(e) => match config.serial_policy {
            SerialPolicy::Fatal => {
                return Err(SerialError::Open {
                    device: config.device.clone(),
                    source: e,
                });
            }
            SerialPolicy::Tolerate => {
                warn!(
                    device = %config.device,
                    error = %e,
                    "Serial device unavailable, continuing without telegram source"
                );
                // Dropping the sender closes the channel: no lines, ever.
                return Ok(rx);
            }
        },
    };

    info!(
        device = %config.device,
        baud = profile.baud_rate,
        dsmr_version = %config.dsmr_version,
        "Serial device opened"
    );

    std::thread::Builder::new()
        .name("serial-reader".to_string())
        .spawn(move || read_lines(port, tx))
        .map_err(|e| SerialError::ReaderThread { source: e })?;

    Ok(rx)
}

/// Blocking read loop: splits the byte stream at `\n` and sends each
/// line (terminator included) into the channel.
///
/// Generic over the reader so tests can drive it from a buffer.
fn read_lines<R: Read>(reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                // EOF; flush any unterminated final line.
                if !line.is_empty() {
                    let _ = tx.send(std::mem::take(&mut line));
                }
                info!("Serial stream ended");
                break;
            }
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    if tx.send(std::mem::take(&mut line)).is_err() {
                        debug!("Line channel closed, reader stopping");
                        break;
                    }
                }
                // No trailing newline means EOF was hit mid-line;
                // the next read returns Ok(0) and flushes it.
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // Bytes read before the timeout stay in `line`.
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Serial read failed, retrying");
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

/// Spawns the framer task: consumes lines, emits completed telegrams.
///
/// The returned channel closes when the line channel does, which is
/// how a tolerated serial failure propagates to the distributor.
pub fn spawn_framer(
    mut lines: mpsc::UnboundedReceiver<Vec<u8>>,
) -> mpsc::UnboundedReceiver<Telegram> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut framer = TelegramFramer::new();

        while let Some(line) = lines.recv().await {
            if let Some(telegram) = framer.push_line(&line) {
                debug!(bytes = telegram.len(), "Telegram completed");
                if tx.send(telegram).is_err() {
                    debug!("Telegram channel closed, framer stopping");
                    break;
                }
            }
        }

        debug!("Framer task stopping: line stream ended");
    });

    rx
}

fn map_data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn map_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn map_stop_bits(bits: u8) -> serialport::StopBits {
    match bits {
        2 => serialport::StopBits::Two,
        _ => serialport::StopBits::One,
    }
}

/// Errors from the serial line source.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("Failed to open serial device {device}: {source}")]
    Open {
        device: String,
        source: serialport::Error,
    },

    #[error("Failed to spawn serial reader thread: {source}")]
    ReaderThread { source: std::io::Error },
}
