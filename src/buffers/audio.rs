// SPDX-License-Identifier: GPL-3.0-only

//! Circular byte buffer for PCM sample traffic
//!
//! Unlike the frame ring this is lossy at the tail: `write` stores as many
//! bytes as fit and reports how many it took, so a producer can account for
//! shortfall instead of overwriting unread audio.

use std::sync::Mutex;

struct AudioRingState {
    buf: Vec<u8>,
    /// Read position
    head: usize,
    /// Bytes currently stored
    len: usize,
}

/// Mutex-guarded circular PCM buffer
pub struct AudioRingBuffer {
    state: Mutex<AudioRingState>,
    capacity: usize,
}

impl AudioRingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "audio ring capacity must be nonzero");
        Self {
            state: Mutex::new(AudioRingState {
                buf: vec![0; capacity],
                head: 0,
                len: 0,
            }),
            capacity,
        }
    }

    /// Store up to `data.len()` bytes; returns the count actually written
    pub fn write(&self, data: &[u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        let free = self.capacity - state.len;
        let to_write = data.len().min(free);
        let mut pos = (state.head + state.len) % self.capacity;
        for &byte in &data[..to_write] {
            state.buf[pos] = byte;
            pos = (pos + 1) % self.capacity;
        }
        state.len += to_write;
        to_write
    }

    /// Consume up to `out.len()` bytes; returns the count read
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        let to_read = out.len().min(state.len);
        for slot in out[..to_read].iter_mut() {
            *slot = state.buf[state.head];
            state.head = (state.head + 1) % self.capacity;
        }
        state.len -= to_read;
        to_read
    }

    /// Copy up to `out.len()` bytes without consuming them
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let state = self.state.lock().unwrap();
        let to_read = out.len().min(state.len);
        let mut pos = state.head;
        for slot in out[..to_read].iter_mut() {
            *slot = state.buf[pos];
            pos = (pos + 1) % self.capacity;
        }
        to_read
    }

    /// Discard all stored bytes
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.head = 0;
        state.len = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_round_trip() {
        let ring = AudioRingBuffer::new(8);
        assert_eq!(ring.write(&[1, 2, 3, 4]), 4);

        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_write_reports_short_count_when_full() {
        let ring = AudioRingBuffer::new(4);
        assert_eq!(ring.write(&[1, 2, 3]), 3);
        // Only one byte of room left
        assert_eq!(ring.write(&[4, 5, 6]), 1);
        assert_eq!(ring.len(), 4);

        let mut out = [0u8; 4];
        ring.read(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let ring = AudioRingBuffer::new(4);
        ring.write(&[1, 2, 3]);
        let mut out = [0u8; 2];
        ring.read(&mut out);
        // Head is now at 2; this write wraps
        assert_eq!(ring.write(&[4, 5, 6]), 3);

        let mut rest = [0u8; 4];
        assert_eq!(ring.read(&mut rest), 4);
        assert_eq!(rest, [3, 4, 5, 6]);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let ring = AudioRingBuffer::new(8);
        ring.write(&[9, 8, 7]);

        let mut peeked = [0u8; 3];
        assert_eq!(ring.peek(&mut peeked), 3);
        assert_eq!(peeked, [9, 8, 7]);
        assert_eq!(ring.len(), 3);

        let mut read = [0u8; 3];
        ring.read(&mut read);
        assert_eq!(read, [9, 8, 7]);
    }

    #[test]
    fn test_clear_empties_buffer() {
        let ring = AudioRingBuffer::new(8);
        ring.write(&[1, 2, 3]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.write(&[5; 8]), 8);
    }
}
