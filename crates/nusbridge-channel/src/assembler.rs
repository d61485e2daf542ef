//! Sentinel and size bounded stream framing.
//!
//! Bytes are buffered until either the last three buffered bytes are [`SENTINEL`] (the frame is
//! the buffer without the sentinel) or the buffer reaches the limit (the frame is the whole
//! buffer). The buffer is cleared after every frame.
//!
//! There is no escaping. A payload containing the sentinel is cut at that point, and a sentinel
//! split across a size-limited frame boundary is not recognised.

use tracing::trace;

/// End-of-frame marker.
pub const SENTINEL: [u8; 3] = [0xA5, 0xA6, 0xA7];

/// Splits a byte stream into frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    limit: usize,
}

impl FrameAssembler {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        FrameAssembler {
            buffer: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Longest frame emitted without a sentinel.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Change the size limit, e.g. after the transport renegotiated its payload size. Takes
    /// effect with the next byte.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
    }

    /// Bytes buffered towards the next frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop the partially assembled frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Feed one byte, returning a frame if it completes one.
    ///
    /// A lone sentinel completes an empty frame, which is discarded.
    pub fn push_byte(&mut self, byte: u8) -> Option<Vec<u8>> {
        self.buffer.push(byte);

        if self.buffer.ends_with(&SENTINEL) {
            self.buffer.truncate(self.buffer.len() - SENTINEL.len());
            let frame = std::mem::take(&mut self.buffer);
            trace!(len = frame.len(), "Sentinel terminated frame");
            return (!frame.is_empty()).then_some(frame);
        }

        if self.buffer.len() >= self.limit {
            let frame = std::mem::take(&mut self.buffer);
            trace!(len = frame.len(), "Size limited frame");
            return Some(frame);
        }

        None
    }

    /// Feed a chunk, returning every frame it completes in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.push_byte(b)).collect()
    }
}
