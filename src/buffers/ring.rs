// SPDX-License-Identifier: GPL-3.0-only

//! Bounded frame FIFO decoupling producers from one consumer
//!
//! `publish` never waits on the consumer: when the queue is full the oldest
//! frame is released back to its pool and counted as dropped, preserving
//! recency for preview and detection. `dequeue` suspends until a frame is
//! available or the ring is closed and drained.

use crate::devices::types::VideoFrame;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

struct RingState {
    queue: VecDeque<VideoFrame>,
    closed: bool,
}

/// Bounded, drop-oldest frame queue with async consumption
pub struct FrameRingBuffer {
    state: Mutex<RingState>,
    notify: Notify,
    capacity: usize,
    drop_count: AtomicU64,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be nonzero");
        Self {
            state: Mutex::new(RingState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            drop_count: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame; O(1), never blocks on the consumer
    ///
    /// Frames published after `close` are released immediately.
    pub fn publish(&self, frame: VideoFrame) {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            if state.queue.len() == self.capacity {
                state.queue.pop_front();
                self.drop_count.fetch_add(1, Ordering::Relaxed);
            }
            state.queue.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Wait for the next frame; `None` once the ring is closed and drained
    ///
    /// Intended for a single consumer task per ring.
    pub async fn dequeue(&self) -> Option<VideoFrame> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(frame) = state.queue.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the ring; pending frames remain dequeueable
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.notify.notify_waiters();
        // A consumer that raced past the waiter registration still holds a
        // permit path through notify_one semantics
        self.notify.notify_one();
    }

    /// Frames discarded by the drop-oldest policy
    pub fn drop_count(&self) -> u64 {
        self.drop_count.load(Ordering::Relaxed)
    }

    /// Frames currently queued
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame number at the head of the queue, without consuming or waking
    pub fn try_peek_frame_number(&self) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .queue
            .front()
            .map(|f| f.frame_number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::FramePool;
    use crate::devices::types::{FrameRate, PixelFormat, VideoMode};
    use std::time::Duration;

    fn tiny_mode() -> VideoMode {
        VideoMode {
            width: 4,
            height: 2,
            frame_rate: FrameRate::FPS_30,
            pixel_format: PixelFormat::Uyvy,
            interlaced: false,
            label: "test".into(),
        }
    }

    fn frame(pool: &FramePool, number: u64) -> VideoFrame {
        let mode = tiny_mode();
        let buffer = pool.rent(mode.frame_bytes());
        VideoFrame::new(
            buffer,
            mode.clone(),
            mode.row_bytes(),
            Duration::from_millis(number * 33),
            number,
        )
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        // Capacity 3, publish F1..F5: expect F3, F4, F5 out and 2 drops
        let pool = FramePool::new(8);
        let ring = FrameRingBuffer::new(3);
        for n in 1..=5 {
            ring.publish(frame(&pool, n));
        }

        assert_eq!(ring.dequeue().await.map(|f| f.frame_number()), Some(3));
        assert_eq!(ring.dequeue().await.map(|f| f.frame_number()), Some(4));
        assert_eq!(ring.dequeue().await.map(|f| f.frame_number()), Some(5));
        assert_eq!(ring.drop_count(), 2);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_publish() {
        let pool = FramePool::new(2);
        let ring = std::sync::Arc::new(FrameRingBuffer::new(2));

        let consumer = {
            let ring = std::sync::Arc::clone(&ring);
            tokio::spawn(async move { ring.dequeue().await.map(|f| f.frame_number()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        ring.publish(frame(&pool, 42));
        assert_eq!(consumer.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let pool = FramePool::new(2);
        let ring = FrameRingBuffer::new(2);
        ring.publish(frame(&pool, 1));
        ring.close();

        assert_eq!(ring.dequeue().await.map(|f| f.frame_number()), Some(1));
        assert!(ring.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let ring = std::sync::Arc::new(FrameRingBuffer::new(2));
        let consumer = {
            let ring = std::sync::Arc::clone(&ring);
            tokio::spawn(async move { ring.dequeue().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ring.close();
        assert!(consumer.await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_after_close_is_discarded() {
        let pool = FramePool::new(2);
        let ring = FrameRingBuffer::new(2);
        ring.close();
        ring.publish(frame(&pool, 1));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_peek_has_no_side_effects() {
        let pool = FramePool::new(2);
        let ring = FrameRingBuffer::new(2);
        assert_eq!(ring.try_peek_frame_number(), None);
        ring.publish(frame(&pool, 9));
        assert_eq!(ring.try_peek_frame_number(), Some(9));
        assert_eq!(ring.len(), 1);
    }
}
