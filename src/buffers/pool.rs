// SPDX-License-Identifier: GPL-3.0-only

//! Slot-recycling byte-buffer pool
//!
//! Steady-state frame traffic must not allocate per frame. The pool hands out
//! exclusively owned buffers; dropping a [`PooledBuffer`] returns its storage
//! to the pool. `rent` never fails and never blocks: if the free list is
//! empty a fresh buffer is allocated, and surplus buffers beyond the pool
//! capacity are discarded on release instead of being retained.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    created: AtomicUsize,
}

/// Fixed-capacity pool of reusable byte buffers
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    /// Create a pool that retains at most `capacity` free buffers
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                created: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a buffer of exactly `size` bytes
    ///
    /// Reuses a free slot when one exists; a slot smaller than `size` is
    /// grown in place, so the pool converges on the largest frame size seen.
    pub fn rent(&self, size: usize) -> PooledBuffer {
        let recycled = self.inner.free.lock().unwrap().pop();
        let mut data = match recycled {
            Some(buf) => buf,
            None => {
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(size)
            }
        };
        data.clear();
        data.resize(size, 0);
        PooledBuffer {
            data,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Total buffers allocated over the pool's lifetime
    pub fn buffers_created(&self) -> usize {
        self.inner.created.load(Ordering::Relaxed)
    }

    /// Buffers currently idle in the free list
    pub fn free_count(&self) -> usize {
        self.inner.free.lock().unwrap().len()
    }
}

/// Exclusively owned byte region; returns to its pool on drop
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<PoolInner>,
}

impl PooledBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PooledBuffer({} bytes)", self.data.len())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let mut free = pool.free.lock().unwrap();
        if free.len() < pool.capacity {
            free.push(std::mem::take(&mut self.data));
        }
        // Beyond capacity the storage is simply freed
    }
}
