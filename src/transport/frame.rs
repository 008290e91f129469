//! Message Framing
//!
//! Wire format for peer messages: the UTF-8 bytes of the text followed by a
//! single reserved terminator byte (value 0).
//!
//! ```text
//! +--------------------------------+------+
//! | UTF-8 payload (variable)       | 0x00 |
//! +--------------------------------+------+
//! ```
//!
//! The transport is a raw byte stream with no message boundaries, so a
//! reserved sentinel byte is the cheapest framing scheme. The cost is that
//! payloads must not contain the terminator themselves; [`encode`] rejects
//! such messages rather than escaping them.
//!
//! # Security
//!
//! A peer that streams bytes without ever sending a terminator would grow the
//! decode buffer without bound; [`MAX_MESSAGE_SIZE`] caps both directions.

/// Reserved terminator byte appended to every encoded message.
pub const MESSAGE_TERMINATOR: u8 = 0;

/// Maximum payload size in bytes (64 KB).
///
/// Prevents memory exhaustion from a peer that never terminates a message.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Minimum buffer capacity for the decoder.
const MIN_BUFFER_CAPACITY: usize = 1024;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The message text contains the reserved terminator byte.
    #[error("message contains the reserved terminator byte")]
    EmbeddedTerminator,

    /// The message exceeds [`MAX_MESSAGE_SIZE`].
    #[error("message exceeds {MAX_MESSAGE_SIZE} bytes")]
    MessageTooLong,

    /// The received payload is not valid UTF-8.
    #[error("message is not valid UTF-8")]
    InvalidUtf8,
}

/// Encode a message as its UTF-8 bytes plus the terminator.
///
/// # Errors
///
/// Returns [`FrameError::EmbeddedTerminator`] if the message contains the
/// terminator byte and [`FrameError::MessageTooLong`] if it exceeds
/// [`MAX_MESSAGE_SIZE`].
pub fn encode(message: &str) -> Result<Vec<u8>, FrameError> {
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::MessageTooLong);
    }
    if message.as_bytes().contains(&MESSAGE_TERMINATOR) {
        return Err(FrameError::EmbeddedTerminator);
    }

    let mut buf = Vec::with_capacity(message.len() + 1);
    buf.extend_from_slice(message.as_bytes());
    buf.push(MESSAGE_TERMINATOR);
    Ok(buf)
}

/// Decoder state machine for streaming frame parsing.
///
/// Buffers incoming read chunks and yields complete messages. A message that
/// spans several reads is accumulated; a partial message is never surfaced.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position we have consumed up to.
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with default buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append bytes from one read to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        // Compact the buffer once most of it is consumed.
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Number of unconsumed bytes in the buffer.
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next message.
    ///
    /// Returns:
    /// - `Ok(Some(text))` when a complete message was decoded (terminator
    ///   stripped)
    /// - `Ok(None)` when more data is needed
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidUtf8`] if the payload is not UTF-8
    /// - [`FrameError::MessageTooLong`] if the unterminated tail already
    ///   exceeds [`MAX_MESSAGE_SIZE`]
    pub fn next_message(&mut self) -> Result<Option<String>, FrameError> {
        let unread = &self.buffer[self.read_pos..];

        let Some(offset) = unread.iter().position(|b| *b == MESSAGE_TERMINATOR) else {
            if unread.len() > MAX_MESSAGE_SIZE {
                return Err(FrameError::MessageTooLong);
            }
            return Ok(None);
        };

        if offset > MAX_MESSAGE_SIZE {
            return Err(FrameError::MessageTooLong);
        }

        let payload = unread[..offset].to_vec();
        self.read_pos += offset + 1;

        match String::from_utf8(payload) {
            Ok(text) => Ok(Some(text)),
            Err(_) => Err(FrameError::InvalidUtf8),
        }
    }

    /// Discard all buffered data.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}
