//! Daemon configuration.
//!
//! Settings come from three layers, highest precedence first:
//! CLI arguments, an optional TOML config file (`--config` or the
//! `P1CAST_CONFIG` environment variable), then built-in defaults
//! matching a common DSMR 5 setup.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use p1cast_core::DsmrVersion;

/// Default serial device for USB P1 cables.
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Default TCP port clients connect to.
pub const DEFAULT_PORT: u16 = 9988;

/// Default per-client write deadline in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// p1cast daemon - DSMR P1 telegram broadcaster
#[derive(Parser, Debug, Default)]
#[command(name = "p1castd", version, about)]
pub struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial device to read telegrams from
    #[arg(long)]
    pub device: Option<String>,

    /// DSMR protocol version (2, 3, 4 or 5); selects baud rate and parity
    #[arg(long, value_parser = parse_dsmr_version)]
    pub dsmr_version: Option<DsmrVersion>,

    /// Host or interface to listen on (empty = all interfaces)
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to listen on (0 = automatic assignment)
    #[arg(long)]
    pub port: Option<u16>,

    /// Keep running when the serial device cannot be opened
    #[arg(long)]
    pub allow_serial_failure: bool,

    /// Per-client write deadline in seconds (0 disables the deadline)
    #[arg(long)]
    pub write_timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_dsmr_version(s: &str) -> Result<DsmrVersion, String> {
    s.parse().map_err(|e: p1cast_core::LinkError| e.to_string())
}

/// What to do when the serial device cannot be opened at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialPolicy {
    /// Exit the process (default): a bridge with no source is useless.
    Fatal,

    /// Log and continue with no telegram production; clients can
    /// still connect and will simply receive nothing.
    Tolerate,
}

/// Config file schema. Every field is optional; CLI flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub device: Option<String>,
    pub dsmr_version: Option<DsmrVersion>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub serial_policy: Option<SerialPolicy>,
    pub write_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Reads and parses a TOML config file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Serial device path.
    pub device: String,

    /// DSMR protocol version; selects the serial link profile.
    pub dsmr_version: DsmrVersion,

    /// Listen host; empty means all interfaces.
    pub host: String,

    /// Listen port; 0 means automatic assignment.
    pub port: u16,

    /// Serial open-failure policy.
    pub serial_policy: SerialPolicy,

    /// Per-client write deadline; `None` disables it.
    pub write_timeout: Option<Duration>,
}

impl Config {
    /// Resolves the configuration from arguments, file and defaults.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let file_path = args
            .config
            .clone()
            .or_else(|| env::var_os("P1CAST_CONFIG").map(PathBuf::from));

        let file = match file_path {
            Some(path) => FileConfig::read(&path)?,
            None => FileConfig::default(),
        };

        let serial_policy = if args.allow_serial_failure {
            SerialPolicy::Tolerate
        } else {
            file.serial_policy.unwrap_or(SerialPolicy::Fatal)
        };

        let write_timeout_secs = args
            .write_timeout
            .or(file.write_timeout_secs)
            .unwrap_or(DEFAULT_WRITE_TIMEOUT_SECS);

        Ok(Self {
            device: args
                .device
                .clone()
                .or(file.device)
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            dsmr_version: args
                .dsmr_version
                .or(file.dsmr_version)
                .unwrap_or(DsmrVersion::V5),
            host: args.host.clone().or(file.host).unwrap_or_default(),
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            serial_policy,
            write_timeout: match write_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        })
    }

    /// The address the listener binds to. An empty host maps to all
    /// interfaces.
    pub fn listen_addr(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{host}:{}", self.port)
    }
}

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
