// SPDX-License-Identifier: GPL-3.0-only

//! Pooled buffers and bounded queues for the frame and sample paths

pub mod audio;
pub mod pool;
pub mod ring;

pub use audio::AudioRingBuffer;
pub use pool::{FramePool, PooledBuffer};
pub use ring::FrameRingBuffer;
