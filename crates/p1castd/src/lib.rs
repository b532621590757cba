//! p1castd - DSMR P1 serial to TCP broadcast daemon
//!
//! This crate provides the daemon infrastructure for p1cast:
//! - `config` - CLI arguments, optional TOML config file, serial policy
//! - `serial` - serial line reader and telegram framer task
//! - `server` - TCP listener feeding new connections to the distributor
//! - `distributor` - client set owner, broadcasts telegrams to clients
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ lines  ┌──────────────┐ telegrams ┌───────────────┐
//! │ serial reader│───────▶│ framer task  │──────────▶│  Distributor  │
//! │ (blocking)   │        │(TelegramFramer)          │ (client set)  │
//! └──────────────┘        └──────────────┘           └───────┬───────┘
//!                                                            │ writes
//! ┌──────────────┐ new connections                           ▼
//! │   Listener   │──────────────────────────────────▶ { TCP clients }
//! │ (TcpListener)│
//! └──────────────┘
//! ```
//!
//! The distributor is the single owner of the client set: connection
//! registration and telegram delivery are merged into one event loop,
//! so no locking is needed around add/remove/iterate.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate avoids `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()` and `todo!()`; fallible operations
//! return `Result` or are absorbed and logged where the failure is
//! local (client write errors, serial read errors, accept errors).

pub mod config;
pub mod distributor;
pub mod serial;
pub mod server;
