// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for capture sources

use crate::buffers::{FramePool, PooledBuffer};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Frame rate as an exact rational (numerator/denominator)
///
/// NTSC rates like 59.94 are stored exactly (60000/1001); anything the source
/// reports that is not a canonical broadcast rate is kept as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const FPS_23_976: FrameRate = FrameRate::new(24000, 1001);
    pub const FPS_24: FrameRate = FrameRate::new(24, 1);
    pub const FPS_25: FrameRate = FrameRate::new(25, 1);
    pub const FPS_29_97: FrameRate = FrameRate::new(30000, 1001);
    pub const FPS_30: FrameRate = FrameRate::new(30, 1);
    pub const FPS_50: FrameRate = FrameRate::new(50, 1);
    pub const FPS_59_94: FrameRate = FrameRate::new(60000, 1001);
    pub const FPS_60: FrameRate = FrameRate::new(60, 1);

    pub const fn new(num: u32, den: u32) -> Self {
        Self {
            num,
            den: if den == 0 { 1 } else { den },
        }
    }

    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, den: 1 }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Nominal duration of one frame
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(self.den as f64 / self.num as f64)
    }

    /// Fraction string for muxer invocations (e.g. "60000/1001")
    pub fn as_fraction(&self) -> String {
        format!("{}/{}", self.num, self.den)
    }
}

impl std::fmt::Display for FrameRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.den != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_30
    }
}

/// Pixel format of delivered frames
///
/// UYVY is the engine's working format; every source delivers it. The other
/// variants exist so modes advertised by hardware can be represented and
/// rejected with a useful error instead of silently mangled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PixelFormat {
    /// Packed 4:2:2 8-bit (U Y0 V Y1 per two pixels)
    #[default]
    Uyvy,
    /// 32-bit BGRA
    Bgra,
    /// Packed 4:2:2 10-bit (v210 layout)
    Yuv422_10,
}

impl PixelFormat {
    /// Bytes per row for a tightly packed row of `width` pixels
    pub fn row_bytes(&self, width: u32) -> u32 {
        match self {
            PixelFormat::Uyvy => width * 2,
            PixelFormat::Bgra => width * 4,
            // v210 packs 6 pixels into 16 bytes
            PixelFormat::Yuv422_10 => width.div_ceil(6) * 16,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Uyvy => write!(f, "UYVY"),
            PixelFormat::Bgra => write!(f, "BGRA"),
            PixelFormat::Yuv422_10 => write!(f, "YUV422_10"),
        }
    }
}

/// A negotiated or advertised video mode; immutable once observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub pixel_format: PixelFormat,
    pub interlaced: bool,
    pub label: String,
}

impl VideoMode {
    /// 1080p progressive UYVY helper, the engine's nominal mode
    pub fn hd1080(frame_rate: FrameRate) -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate,
            pixel_format: PixelFormat::Uyvy,
            interlaced: false,
            label: format!("1080p{}", frame_rate),
        }
    }

    /// Tightly packed bytes per row
    pub fn row_bytes(&self) -> u32 {
        self.pixel_format.row_bytes(self.width)
    }

    /// Tightly packed bytes per frame
    pub fn frame_bytes(&self) -> usize {
        self.row_bytes() as usize * self.height as usize
    }
}

impl std::fmt::Display for VideoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}{}{} {}",
            self.width,
            self.height,
            if self.interlaced { "i" } else { "p" },
            self.frame_rate,
            self.pixel_format
        )
    }
}

/// Device lifecycle status
///
/// Linear lifecycle except `Error`, which can be entered from anywhere;
/// `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceStatus {
    #[default]
    Idle,
    Initializing,
    Capturing,
    Error,
    Disconnected,
}

impl DeviceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceStatus::Disconnected)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Idle => write!(f, "Idle"),
            DeviceStatus::Initializing => write!(f, "Initializing"),
            DeviceStatus::Capturing => write!(f, "Capturing"),
            DeviceStatus::Error => write!(f, "Error"),
            DeviceStatus::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Status transition event
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub device_id: String,
    pub old: DeviceStatus,
    pub new: DeviceStatus,
}

/// One delivered video frame
///
/// Owns its pixel data through an exclusively held pool buffer. Delivery
/// handlers receive `&VideoFrame` valid only for the callback; a consumer
/// that retains data copies it with [`VideoFrame::copy_into`].
#[derive(Debug)]
pub struct VideoFrame {
    buffer: PooledBuffer,
    mode: VideoMode,
    row_stride: u32,
    timestamp: Duration,
    frame_number: u64,
}

impl VideoFrame {
    pub fn new(
        buffer: PooledBuffer,
        mode: VideoMode,
        row_stride: u32,
        timestamp: Duration,
        frame_number: u64,
    ) -> Self {
        debug_assert!(row_stride >= mode.row_bytes());
        Self {
            buffer,
            mode,
            row_stride,
            timestamp,
            frame_number,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn mode(&self) -> &VideoMode {
        &self.mode
    }

    /// Bytes per row, including any padding
    pub fn row_stride(&self) -> u32 {
        self.row_stride
    }

    /// Time since capture start
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Strictly monotonic per capture session, reset on each start
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Copy this frame into a buffer rented from `pool`
    pub fn copy_into(&self, pool: &FramePool) -> VideoFrame {
        let mut buffer = pool.rent(self.buffer.len());
        buffer.as_mut_slice().copy_from_slice(&self.buffer);
        VideoFrame {
            buffer,
            mode: self.mode.clone(),
            row_stride: self.row_stride,
            timestamp: self.timestamp,
            frame_number: self.frame_number,
        }
    }
}

/// PCM audio format of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
    /// 16 (integer PCM) or 32 (float PCM from network sources)
    pub bits_per_sample: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 16,
        }
    }
}

/// One delivered block of interleaved PCM samples
#[derive(Debug)]
pub struct AudioSampleBlock {
    buffer: PooledBuffer,
    format: AudioFormat,
    timestamp: Duration,
}

impl AudioSampleBlock {
    pub fn new(buffer: PooledBuffer, format: AudioFormat, timestamp: Duration) -> Self {
        Self {
            buffer,
            format,
            timestamp,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u32 {
        self.format.channels
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.format.bits_per_sample
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Copy this block into a buffer rented from `pool`
    pub fn copy_into(&self, pool: &FramePool) -> AudioSampleBlock {
        let mut buffer = pool.rent(self.buffer.len());
        buffer.as_mut_slice().copy_from_slice(&self.buffer);
        AudioSampleBlock {
            buffer,
            format: self.format,
            timestamp: self.timestamp,
        }
    }
}
