//! Incremental frame extraction for one device connection.
//!
//! [`FrameDecoder`] is fed arbitrary chunks as they arrive from the socket and
//! yields every complete `[...]` frame found so far. Partial data is kept
//! until the next chunk. Some firmware wraps frames in a hex transport layer;
//! a chunk that is pure hex and decodes to marker-bearing text is unwrapped
//! before buffering.

use super::{ProtocolError, FRAME_END, FRAME_START};

/// Default cap on pending (unframed) data per connection.
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

const START: u8 = FRAME_START as u8;
const END: u8 = FRAME_END as u8;

/// Per-connection frame decoder. Not shared between connections.
///
/// Pending data is kept as raw bytes; only a completed frame is turned into
/// text, so a multi-byte character split across reads survives intact.
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_buffer: usize,
}

impl FrameDecoder {
    /// Create a decoder that fails once more than `max_buffer` bytes are
    /// pending without a complete frame.
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_buffer.min(4096)),
            max_buffer,
        }
    }

    /// Append a chunk and extract every complete frame, in order.
    ///
    /// Returns the frame interiors (markers stripped). On overflow the pending
    /// buffer is cleared and an error is returned; frames completed by this
    /// chunk are lost with it since the connection is about to be dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ProtocolError> {
        match unwrap_hex(chunk) {
            Some(decoded) => self.buf.extend_from_slice(&decoded),
            None => self.buf.extend_from_slice(chunk),
        }

        let frames = self.drain_frames();

        if self.buf.len() > self.max_buffer {
            self.buf.clear();
            return Err(ProtocolError::BufferOverflow {
                limit: self.max_buffer,
            });
        }
        Ok(frames)
    }

    /// Bytes currently buffered waiting for a frame terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn drain_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            let Some(start) = self.buf.iter().position(|&b| b == START) else {
                break;
            };
            let Some(end) = self.buf.iter().position(|&b| b == END) else {
                break;
            };
            if end < start {
                // Stray terminator ahead of any start marker: it can never
                // close a frame, so drop everything through it.
                self.buf.drain(..=end);
                continue;
            }
            frames.push(String::from_utf8_lossy(&self.buf[start + 1..end]).into_owned());
            self.buf.drain(..=end);
        }
        frames
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER)
    }
}

/// Decode `chunk` as a hex wrapper if it looks like one.
///
/// A chunk qualifies when it is non-empty, contains only hex digits and ASCII
/// whitespace, has an even digit count, and decodes to bytes containing both
/// frame markers. Anything else returns `None` and is buffered raw.
fn unwrap_hex(chunk: &[u8]) -> Option<Vec<u8>> {
    if chunk.is_empty()
        || !chunk
            .iter()
            .all(|b| b.is_ascii_hexdigit() || b.is_ascii_whitespace())
    {
        return None;
    }

    let digits: Vec<u8> = chunk
        .iter()
        .copied()
        .filter(u8::is_ascii_hexdigit)
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }

    let decoded = hex::decode(&digits).ok()?;
    (decoded.contains(&START) && decoded.contains(&END)).then_some(decoded)
}
