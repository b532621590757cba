//! The `Telegram` type - one complete, delimited meter message.

use std::fmt;

/// Leading byte of the first line of a telegram.
pub const START_MARKER: u8 = b'/';

/// Leading byte of the last line of a telegram.
pub const END_MARKER: u8 = b'!';

/// One complete telegram: the exact bytes of every line from the
/// start-marker line through the end-marker line, terminators included.
///
/// The content is opaque to p1cast - it is never parsed or mutated
/// after assembly, and is written to clients verbatim so the byte
/// stream they see is identical to the serial input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram(Vec<u8>);

impl Telegram {
    /// Wraps an assembled telegram body.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw telegram bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the telegram, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length of the telegram in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the telegram is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Telegram {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Telegram {
    /// Lossy text rendering, for logs only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}
