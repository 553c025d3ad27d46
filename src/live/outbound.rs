//! Bounded FIFO for frames captured before the stream is open

use std::collections::VecDeque;

use crate::voice::EncodedChunk;

/// Outbound chunks waiting for the transport to open
///
/// When full, the oldest chunk is dropped to make room.
#[derive(Debug)]
pub struct OutboundQueue {
    chunks: VecDeque<EncodedChunk>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` chunks
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append a chunk, evicting the oldest if at capacity
    pub fn push(&mut self, chunk: EncodedChunk) {
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
            self.dropped += 1;
            tracing::warn!(
                capacity = self.capacity,
                dropped = self.dropped,
                "outbound buffer full before stream opened, dropping oldest frame"
            );
        }
        self.chunks.push_back(chunk);
    }

    /// Remove and return every queued chunk, oldest first
    pub fn drain(&mut self) -> Vec<EncodedChunk> {
        self.chunks.drain(..).collect()
    }

    /// Number of queued chunks
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total chunks evicted since creation
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &str) -> EncodedChunk {
        EncodedChunk {
            data: tag.to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        }
    }

    #[test]
    fn test_drains_in_fifo_order() {
        let mut queue = OutboundQueue::new(4);
        queue.push(chunk("a"));
        queue.push(chunk("b"));
        queue.push(chunk("c"));

        let drained: Vec<String> = queue.drain().into_iter().map(|c| c.data).collect();
        assert_eq!(drained, ["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drops_oldest_when_full() {
        let mut queue = OutboundQueue::new(2);
        queue.push(chunk("a"));
        queue.push(chunk("b"));
        queue.push(chunk("c"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        let drained: Vec<String> = queue.drain().into_iter().map(|c| c.data).collect();
        assert_eq!(drained, ["b", "c"]);
    }
}
