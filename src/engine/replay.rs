//! Replay buffer for late-joiner support
//!
//! Consumers can attach to a session at any point in its life. The replay
//! buffer keeps the most recent stretch of produced bytes, bounded by a
//! byte ceiling, so a late joiner starts from a valid recent prefix instead
//! of an empty stream. Fragmented MP4 output stays decodable from a
//! fragment boundary, which the most recent window is overwhelmingly likely
//! to contain.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Size-bounded, ordered buffer of produced chunks.
#[derive(Debug)]
pub struct ReplayBuffer {
    /// Maximum total size in bytes
    ceiling: usize,
    /// Current total size in bytes
    total_bytes: usize,
    /// Buffered chunks, oldest first
    chunks: VecDeque<Bytes>,
}

impl ReplayBuffer {
    /// Create a buffer with the given byte ceiling.
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            total_bytes: 0,
            chunks: VecDeque::new(),
        }
    }

    /// Append a chunk, evicting oldest whole chunks until the total size is
    /// back under the ceiling.
    ///
    /// Eviction is strictly oldest-first. A single chunk larger than the
    /// whole ceiling therefore evicts everything including itself; live
    /// consumers still receive such a chunk, it just leaves no replay trace.
    pub fn push(&mut self, chunk: Bytes) {
        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);

        while self.total_bytes > self.ceiling {
            if let Some(old) = self.chunks.pop_front() {
                self.total_bytes -= old.len();
            }
        }
    }

    /// Copy the buffered window into one contiguous chunk.
    ///
    /// Used to seed a new consumer queue with a single item, so seeding can
    /// never overrun a bounded queue no matter how fragmented the window is.
    pub fn snapshot(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            buf.extend_from_slice(chunk);
        }
        buf.freeze()
    }

    /// Current total size in bytes.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Number of buffered chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
