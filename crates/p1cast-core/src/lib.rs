//! p1cast core - DSMR P1 telegram framing and serial link profiles
//!
//! This crate provides the runtime-free domain logic shared by the
//! p1cast daemon: the telegram reassembly state machine and the
//! DSMR-version-keyed serial link parameters.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod framer;
pub mod link;
pub mod telegram;

// Re-exports for convenience
pub use framer::TelegramFramer;
pub use link::{DsmrVersion, LinkError, LinkProfile, Parity};
pub use telegram::{Telegram, END_MARKER, START_MARKER};
