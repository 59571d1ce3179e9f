//! Per-connection outbound byte queue.

use std::collections::VecDeque;

use bytes::Bytes;

/// Encoded bytes waiting for the transport.
///
/// The writer drains it in batches so that one busy connection cannot hold
/// the socket loop for longer than one batch.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl OutboundQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Empty chunks are dropped.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Total queued bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Take at most `cap` bytes from the front of the queue.
    ///
    /// A chunk that straddles the cap is split; its tail stays queued. A cap
    /// of zero is treated as one byte so the queue always makes progress.
    pub fn next_batch(&mut self, cap: usize) -> Vec<Bytes> {
        let cap = cap.max(1);
        let mut batch = Vec::new();
        let mut taken = 0;

        while taken < cap {
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            let room = cap - taken;
            if chunk.len() > room {
                let head = chunk.split_to(room);
                self.chunks.push_front(chunk);
                taken += head.len();
                batch.push(head);
                break;
            }
            taken += chunk.len();
            batch.push(chunk);
        }

        self.len -= taken;
        batch
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}
