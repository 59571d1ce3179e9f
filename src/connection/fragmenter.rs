//! Message fragmentation for outgoing WebSocket messages (RFC 6455).

use bytes::Bytes;

use crate::protocol::{Frame, OpCode};

/// Iterator that produces frames from a message payload.
///
/// Splits large payloads into multiple frames according to the configured
/// fragment size. First frame uses the original opcode, continuation frames
/// use `OpCode::Continuation`. Fragments share the payload buffer.
pub struct MessageFragmenter {
    payload: Bytes,
    opcode: OpCode,
    fragment_size: usize,
    is_first: bool,
}

impl MessageFragmenter {
    /// Create a new fragmenter for the given payload.
    #[inline]
    #[must_use]
    pub fn new(payload: Bytes, opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode,
            fragment_size: fragment_size.max(1),
            is_first: true,
        }
    }

    /// Check if fragmentation is needed (payload exceeds fragment_size).
    #[inline]
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.payload.len() > self.fragment_size
    }

    /// Get remaining bytes to send.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len()
    }
}

impl Iterator for MessageFragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.payload.is_empty() {
            // An empty message is still one frame.
            if self.is_first {
                self.is_first = false;
                return Some(Frame::new(true, self.opcode, Bytes::new()));
            }
            return None;
        }

        let chunk_size = self.payload.len().min(self.fragment_size);
        let chunk = self.payload.split_to(chunk_size);
        let is_final = self.payload.is_empty();

        let opcode = if self.is_first {
            self.is_first = false;
            self.opcode
        } else {
            OpCode::Continuation
        };

        Some(Frame::new(is_final, opcode, chunk))
    }
}
