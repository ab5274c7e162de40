//! Bounded ring buffer of terminal output for reattach replay.
//!
//! Chunks are kept in arrival order. Once full, the oldest chunk is dropped
//! for each new one; the producing process is never throttled.

use std::collections::VecDeque;

/// Default maximum number of buffered chunks.
pub const DEFAULT_CAPACITY: usize = 5000;

pub struct OutputBuffer {
    chunks: VecDeque<String>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: String) {
        while self.chunks.len() >= self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
    }

    /// Buffered chunks, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
