//! Telegram reassembly from newline-terminated serial lines.
//!
//! A DSMR meter emits telegrams as a run of text lines: the first
//! line starts with `/`, the last with `!`. The serial stream is
//! usually joined mid-telegram, so everything before the first
//! observed start marker is discarded, and a start marker seen while
//! a frame is already open silently restarts the frame (the partial
//! content is dropped - resynchronization, not an error).

use crate::telegram::{Telegram, END_MARKER, START_MARKER};

/// State machine that folds a sequence of lines into telegrams.
///
/// Purely synchronous: `push_line` never blocks, so a caller driving
/// it from a channel can hand completed telegrams off immediately.
#[derive(Debug, Default)]
pub struct TelegramFramer {
    /// Lines accumulated since the last start marker.
    buf: Vec<u8>,

    /// Whether a start marker has been seen since the last reset.
    frame_open: bool,
}

impl TelegramFramer {
    /// Creates a framer with an empty accumulator and no open frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (terminator included) into the framer.
    ///
    /// Returns a completed telegram when `line` is an end-marker
    /// line and a frame was open. Lines arriving before the first
    /// start marker are discarded. Zero-length lines carry no marker
    /// and are treated as plain content.
    pub fn push_line(&mut self, line: &[u8]) -> Option<Telegram> {
        if line.first() == Some(&START_MARKER) {
            // Restarting mid-frame discards the partial telegram.
            self.buf.clear();
            self.frame_open = true;
        }

        if !self.frame_open {
            return None;
        }

        self.buf.extend_from_slice(line);

        if line.first() == Some(&END_MARKER) {
            // Hand the accumulator off; the frame stays open until
            // the next start marker resets it.
            return Some(Telegram::new(std::mem::take(&mut self.buf)));
        }

        None
    }

    /// Whether a start marker has been seen since the last reset.
    pub fn frame_open(&self) -> bool {
        self.frame_open
    }
}
