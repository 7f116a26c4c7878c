//! Chunk queue between the producer and the consumer loop.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pcmbridge_core::AudioChunk;

/// Unbounded FIFO of submitted chunks.
///
/// `push` never blocks. `pop` waits at most its timeout so the consumer can
/// keep checking its stop flag.
#[derive(Default)]
pub struct BufferQueue {
    chunks: Mutex<VecDeque<AudioChunk>>,
    ready: Condvar,
}

impl BufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the tail.
    pub fn push(&self, chunk: AudioChunk) {
        self.chunks.lock().push_back(chunk);
        self.ready.notify_one();
    }

    /// Take the head chunk, waiting up to `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<AudioChunk> {
        let deadline = Instant::now() + timeout;
        let mut chunks = self.chunks.lock();
        loop {
            if let Some(chunk) = chunks.pop_front() {
                return Some(chunk);
            }
            if self.ready.wait_until(&mut chunks, deadline).timed_out() {
                return chunks.pop_front();
            }
        }
    }

    /// Drop every queued chunk. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut chunks = self.chunks.lock();
        let dropped = chunks.len();
        chunks.clear();
        dropped
    }

    /// Current length. Stale as soon as it returns.
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn chunk(tag: u8, len: usize) -> AudioChunk {
        AudioChunk::new(vec![tag; len])
    }

    #[test]
    fn test_fifo_order() {
        let queue = BufferQueue::new();
        for tag in 1..=3 {
            queue.push(chunk(tag, 4));
        }
        assert_eq!(queue.len(), 3);

        for tag in 1..=3 {
            let popped = queue.pop(Duration::ZERO).unwrap();
            assert_eq!(popped.as_bytes(), &[tag; 4]);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_times_out() {
        let queue = BufferQueue::new();
        let start = Instant::now();
        assert!(queue.pop(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let queue = Arc::new(BufferQueue::new());
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(chunk(7, 2));
        });

        let start = Instant::now();
        let popped = queue.pop(Duration::from_secs(5)).unwrap();
        assert_eq!(popped.as_bytes(), &[7, 7]);
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_clear_reports_dropped() {
        let queue = BufferQueue::new();
        queue.push(chunk(1, 1));
        queue.push(AudioChunk::end_of_stream());
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn test_concurrent_producers_keep_per_thread_order() {
        let queue = Arc::new(BufferQueue::new());
        let producers: Vec<_> = (0..4u8)
            .map(|tag| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for seq in 0..100u8 {
                        queue.push(AudioChunk::new(vec![tag, seq]));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut last_seen = [None::<u8>; 4];
        while let Some(popped) = queue.pop(Duration::ZERO) {
            let [tag, seq] = [popped.as_bytes()[0], popped.as_bytes()[1]];
            if let Some(prev) = last_seen[tag as usize] {
                assert!(seq > prev);
            }
            last_seen[tag as usize] = Some(seq);
        }
        assert!(last_seen.iter().all(|s| *s == Some(99)));
    }
}
