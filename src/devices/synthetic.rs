// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic capture sources
//!
//! Black, solid-color, and still-image producers that behave exactly like a
//! live device: negotiated mode, paced delivery on a producer thread, status
//! transitions, and silent audio so the full A/V path is drivable without
//! hardware. Configured from the `virtual.colors` and `virtual.stillimages`
//! settings.

use super::capture_loop::{CaptureLoop, LoopStep};
use super::{DeviceCore, DeviceManager, VideoSource, stable_device_id};
use crate::buffers::FramePool;
use crate::config::{Settings, parse_hex_color};
use crate::constants::frames::POOL_CAPACITY;
use crate::devices::types::{
    AudioFormat, AudioSampleBlock, DeviceStatus, FrameRate, PixelFormat, StatusChange, VideoFrame,
    VideoMode,
};
use crate::errors::{DeviceError, DeviceResult};
use crate::events::EventHub;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Family prefix for synthetic device ids
pub const FAMILY: &str = "virt";

/// What a synthetic source displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticPattern {
    Black,
    Color { r: u8, g: u8, b: u8 },
    StillImage { path: PathBuf },
}

impl SyntheticPattern {
    fn display_name(&self) -> String {
        match self {
            SyntheticPattern::Black => "Black".to_string(),
            SyntheticPattern::Color { r, g, b } => format!("Color #{:02X}{:02X}{:02X}", r, g, b),
            SyntheticPattern::StillImage { path } => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Still".to_string()),
        }
    }
}

/// A synthetic frame/sample source
pub struct SyntheticDevice {
    core: DeviceCore,
    pattern: SyntheticPattern,
    audio_format: Option<AudioFormat>,
    pool: FramePool,
    producer: Mutex<Option<CaptureLoop>>,
}

impl SyntheticDevice {
    pub fn new(pattern: SyntheticPattern) -> Arc<Self> {
        Self::with_audio(pattern, Some(AudioFormat::default()))
    }

    /// Build with an explicit audio format, or `None` for a video-only source
    pub fn with_audio(pattern: SyntheticPattern, audio_format: Option<AudioFormat>) -> Arc<Self> {
        let name = pattern.display_name();
        let id = stable_device_id(FAMILY, &name);
        Arc::new(Self {
            core: DeviceCore::new(id, name, vec!["synthetic".to_string()]),
            pattern,
            audio_format,
            pool: FramePool::new(POOL_CAPACITY),
            producer: Mutex::new(None),
        })
    }
}

struct ProducerState {
    template: Arc<Vec<u8>>,
    mode: VideoMode,
    started: Instant,
    next_due: Instant,
    frame_number: u64,
}

impl VideoSource for SyntheticDevice {
    fn device_id(&self) -> &str {
        self.core.device_id()
    }

    fn display_name(&self) -> &str {
        self.core.display_name()
    }

    fn available_connectors(&self) -> Vec<String> {
        self.core.connectors()
    }

    fn status(&self) -> DeviceStatus {
        self.core.status()
    }

    fn current_mode(&self) -> Option<VideoMode> {
        self.core.current_mode()
    }

    fn list_modes(&self) -> Vec<VideoMode> {
        vec![
            VideoMode::hd1080(FrameRate::FPS_30),
            VideoMode::hd1080(FrameRate::FPS_60),
            VideoMode::hd1080(FrameRate::FPS_59_94),
        ]
    }

    fn start_capture(&self, mode: &VideoMode) -> DeviceResult<()> {
        if self.core.status() == DeviceStatus::Capturing {
            return Err(DeviceError::AlreadyCapturing);
        }
        if mode.pixel_format != PixelFormat::Uyvy {
            self.core.set_status(DeviceStatus::Error);
            return Err(DeviceError::ModeNotSupported(format!(
                "synthetic sources produce UYVY, not {}",
                mode.pixel_format
            )));
        }
        self.core.set_status(DeviceStatus::Initializing);

        let template = match render_pattern(&self.pattern, mode) {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                self.core.set_status(DeviceStatus::Error);
                return Err(DeviceError::SourceUnavailable(e));
            }
        };

        let mode = mode.clone();
        let loop_mode = mode.clone();
        let pool = self.pool.clone();
        let frames = self.core.video_frames().clone();
        let audio = self.core.audio_samples().clone();
        let audio_format = self.audio_format;
        let interval = mode.frame_rate.frame_interval();
        let name = format!("synthetic-{}", self.core.device_id());

        let producer = CaptureLoop::spawn(
            &name,
            move || {
                let now = Instant::now();
                Ok(ProducerState {
                    template,
                    mode: loop_mode,
                    started: now,
                    next_due: now,
                    frame_number: 0,
                })
            },
            move |state| {
                let now = Instant::now();
                if now < state.next_due {
                    return LoopStep::Idle(state.next_due - now);
                }

                let timestamp = state.next_due.duration_since(state.started);
                let mut buffer = pool.rent(state.template.len());
                buffer.as_mut_slice().copy_from_slice(&state.template);
                let frame = VideoFrame::new(
                    buffer,
                    state.mode.clone(),
                    state.mode.row_bytes(),
                    timestamp,
                    state.frame_number,
                );
                frames.emit(&frame);
                drop(frame);

                if let Some(format) = audio_format {
                    let samples_per_frame = (format.sample_rate as f64
                        * interval.as_secs_f64())
                    .round() as usize;
                    let bytes =
                        samples_per_frame * format.channels as usize
                            * (format.bits_per_sample as usize / 8);
                    let silence = pool.rent(bytes);
                    let block = AudioSampleBlock::new(silence, format, timestamp);
                    audio.emit(&block);
                }

                state.frame_number += 1;
                state.next_due += interval;
                LoopStep::Continue
            },
        );

        *self.producer.lock().unwrap() = Some(producer);
        self.core.set_current_mode(Some(mode));
        self.core.set_status(DeviceStatus::Capturing);
        info!(device = %self.core.device_id(), "Synthetic capture started");
        Ok(())
    }

    fn stop_capture(&self) {
        let producer = self.producer.lock().unwrap().take();
        if let Some(mut producer) = producer {
            producer.stop();
            self.core.set_current_mode(None);
            self.core.set_status(DeviceStatus::Idle);
            info!(device = %self.core.device_id(), "Synthetic capture stopped");
        }
    }

    fn video_frames(&self) -> &EventHub<VideoFrame> {
        self.core.video_frames()
    }

    fn audio_samples(&self) -> &EventHub<AudioSampleBlock> {
        self.core.audio_samples()
    }

    fn status_changed(&self) -> &EventHub<StatusChange> {
        self.core.status_changed()
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        if let Some(mut producer) = self.producer.lock().unwrap().take() {
            producer.stop();
        }
    }
}

/// BT.601 RGB → (Y, U, V) integer approximation
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(16, 235) as u8,
        u.clamp(16, 240) as u8,
        v.clamp(16, 240) as u8,
    )
}

/// Fill a full UYVY frame for the given pattern
fn render_pattern(pattern: &SyntheticPattern, mode: &VideoMode) -> Result<Vec<u8>, String> {
    match pattern {
        SyntheticPattern::Black => Ok(solid_uyvy(16, 128, 128, mode)),
        SyntheticPattern::Color { r, g, b } => {
            let (y, u, v) = rgb_to_yuv(*r, *g, *b);
            Ok(solid_uyvy(y, u, v, mode))
        }
        SyntheticPattern::StillImage { path } => load_still_frame(path, mode),
    }
}

fn solid_uyvy(y: u8, u: u8, v: u8, mode: &VideoMode) -> Vec<u8> {
    let mut frame = Vec::with_capacity(mode.frame_bytes());
    let pairs = mode.frame_bytes() / 4;
    for _ in 0..pairs {
        frame.extend_from_slice(&[u, y, v, y]);
    }
    frame
}

/// Load a still image as one UYVY frame, scaled to the mode
///
/// Accepts binary PPM (P6, 8-bit) or a raw `.uyvy` dump of exactly the
/// mode's frame size.
fn load_still_frame(path: &Path, mode: &VideoMode) -> Result<Vec<u8>, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("uyvy") | Some("raw") => {
            if bytes.len() != mode.frame_bytes() {
                return Err(format!(
                    "raw frame is {} bytes, mode needs {}",
                    bytes.len(),
                    mode.frame_bytes()
                ));
            }
            Ok(bytes)
        }
        Some("ppm") => {
            let (rgb, src_w, src_h) = parse_ppm(&bytes)?;
            Ok(scale_rgb_to_uyvy(&rgb, src_w, src_h, mode))
        }
        other => Err(format!("unsupported still format: {:?}", other)),
    }
}

/// Minimal binary PPM (P6) parser
fn parse_ppm(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32), String> {
    let mut pos = 0;
    let mut fields = Vec::new();
    // Header: magic, width, height, maxval, separated by whitespace/comments
    while fields.len() < 4 && pos < bytes.len() {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos < bytes.len() && bytes[pos] == b'#' {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        let start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        fields.push(&bytes[start..pos]);
    }
    if fields.len() < 4 || fields[0] != b"P6" {
        return Err("not a binary PPM (P6)".to_string());
    }
    let parse = |f: &[u8]| -> Result<u32, String> {
        std::str::from_utf8(f)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| "bad PPM header".to_string())
    };
    let width = parse(fields[1])?;
    let height = parse(fields[2])?;
    let maxval = parse(fields[3])?;
    if maxval != 255 {
        return Err(format!("unsupported PPM maxval {}", maxval));
    }
    pos += 1; // single whitespace after maxval
    let expected = width as usize * height as usize * 3;
    if bytes.len() < pos + expected {
        return Err("truncated PPM pixel data".to_string());
    }
    Ok((bytes[pos..pos + expected].to_vec(), width, height))
}

/// Nearest-neighbor scale + BT.601 conversion into a packed UYVY frame
fn scale_rgb_to_uyvy(rgb: &[u8], src_w: u32, src_h: u32, mode: &VideoMode) -> Vec<u8> {
    let mut out = Vec::with_capacity(mode.frame_bytes());
    for dy in 0..mode.height {
        let sy = (dy as u64 * src_h as u64 / mode.height as u64).min(src_h as u64 - 1) as usize;
        for dx2 in 0..(mode.width / 2) {
            let sample = |dx: u32| -> (u8, u8, u8) {
                let sx =
                    (dx as u64 * src_w as u64 / mode.width as u64).min(src_w as u64 - 1) as usize;
                let idx = (sy * src_w as usize + sx) * 3;
                rgb_to_yuv(rgb[idx], rgb[idx + 1], rgb[idx + 2])
            };
            let (y0, u0, v0) = sample(dx2 * 2);
            let (y1, u1, v1) = sample(dx2 * 2 + 1);
            // Chroma is shared per pixel pair; average the two samples
            let u = ((u0 as u16 + u1 as u16) / 2) as u8;
            let v = ((v0 as u16 + v1 as u16) / 2) as u8;
            out.extend_from_slice(&[u, y0, v, y1]);
        }
    }
    out
}

/// Registry of synthetic sources, derived from settings
pub struct SyntheticDeviceManager {
    settings: Arc<Settings>,
    devices: Mutex<BTreeMap<String, Arc<SyntheticDevice>>>,
    device_arrived: EventHub<Arc<dyn VideoSource>>,
    device_removed: EventHub<String>,
}

impl SyntheticDeviceManager {
    pub fn new(settings: Arc<Settings>) -> Arc<Self> {
        let manager = Arc::new(Self {
            settings,
            devices: Mutex::new(BTreeMap::new()),
            device_arrived: EventHub::new(),
            device_removed: EventHub::new(),
        });
        manager.refresh_devices();
        manager
    }

    fn desired_patterns(&self) -> Vec<SyntheticPattern> {
        let mut patterns = vec![SyntheticPattern::Black];
        for color in self.settings.virtual_colors() {
            match parse_hex_color(&color) {
                Some((r, g, b)) => patterns.push(SyntheticPattern::Color { r, g, b }),
                None => warn!(value = %color, "Ignoring unparseable virtual color"),
            }
        }
        for path in self.settings.virtual_still_images() {
            patterns.push(SyntheticPattern::StillImage { path });
        }
        patterns
    }
}

impl DeviceManager for SyntheticDeviceManager {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn available_devices(&self) -> Vec<Arc<dyn VideoSource>> {
        self.devices
            .lock()
            .unwrap()
            .values()
            .map(|d| Arc::clone(d) as Arc<dyn VideoSource>)
            .collect()
    }

    fn refresh_devices(&self) {
        let desired = self.desired_patterns();
        let mut arrived = Vec::new();
        let mut removed = Vec::new();
        {
            let mut devices = self.devices.lock().unwrap();
            let desired_ids: Vec<String> = desired
                .iter()
                .map(|p| stable_device_id(FAMILY, &p.display_name()))
                .collect();

            for pattern in desired {
                let id = stable_device_id(FAMILY, &pattern.display_name());
                if !devices.contains_key(&id) {
                    let device = SyntheticDevice::new(pattern);
                    devices.insert(id, Arc::clone(&device));
                    arrived.push(device as Arc<dyn VideoSource>);
                }
            }
            let gone: Vec<String> = devices
                .keys()
                .filter(|id| !desired_ids.contains(id))
                .cloned()
                .collect();
            for id in gone {
                if let Some(device) = devices.remove(&id) {
                    device.stop_capture();
                    device.core.set_status(DeviceStatus::Disconnected);
                    removed.push(id);
                }
            }
        }
        // Emit outside the device-map lock
        for device in arrived {
            self.device_arrived.emit(&device);
        }
        for id in removed {
            self.device_removed.emit(&id);
        }
    }

    fn get_device(&self, device_id: &str) -> Option<Arc<dyn VideoSource>> {
        self.devices
            .lock()
            .unwrap()
            .get(device_id)
            .map(|d| Arc::clone(d) as Arc<dyn VideoSource>)
    }

    fn device_arrived(&self) -> &EventHub<Arc<dyn VideoSource>> {
        &self.device_arrived
    }

    fn device_removed(&self) -> &EventHub<String> {
        &self.device_removed
    }
}
