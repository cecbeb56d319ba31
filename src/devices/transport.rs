// SPDX-License-Identifier: GPL-3.0-only

//! Transport-listener capture sources
//!
//! Each device supervises an external receiver process that listens on an
//! SRT port and emits raw UYVY frames on stdout. The actual mode is learned
//! from the receiver's stderr stream banner (`Stream #X:Y: Video: ... WxH`);
//! until it appears, the requested mode stands. Inputs come from the
//! `srt.inputs` setting. Video only: the simulator feed these listeners carry
//! is silent.

use super::capture_loop::{CaptureLoop, LoopStep};
use super::{DeviceCore, DeviceManager, VideoSource, stable_device_id};
use crate::buffers::FramePool;
use crate::config::{Settings, SrtInputConfig};
use crate::constants::frames::POOL_CAPACITY;
use crate::constants::timing::{CAPTURE_STOP_TIMEOUT, FRAME_LOG_INTERVAL, PRODUCER_IDLE_WAIT};
use crate::devices::types::{
    AudioSampleBlock, DeviceStatus, FrameRate, PixelFormat, StatusChange, VideoFrame, VideoMode,
};
use crate::errors::{DeviceError, DeviceResult};
use crate::events::EventHub;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Family prefix for transport device ids
pub const FAMILY: &str = "srt";

/// Default receiver program
const RECEIVER_PROGRAM: &str = "ffmpeg";

/// Resolution (and optional rate) detected from the receiver's stream banner
#[derive(Debug, Clone, Copy, PartialEq)]
struct DetectedMode {
    width: u32,
    height: u32,
    fps: Option<f64>,
}

fn stream_banner_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Stream #\d+:\d+.*Video:.*?(\d{2,5})x(\d{2,5})").expect("valid regex")
    })
}

fn fps_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*fps").expect("valid regex"))
}

/// Parse one stderr line for the video stream banner
fn parse_stream_banner(line: &str) -> Option<DetectedMode> {
    let caps = stream_banner_regex().captures(line)?;
    let width = caps[1].parse().ok()?;
    let height = caps[2].parse().ok()?;
    let fps = fps_regex()
        .captures(line)
        .and_then(|c| c[1].parse::<f64>().ok());
    Some(DetectedMode { width, height, fps })
}

fn frame_rate_from_fps(fps: f64) -> FrameRate {
    // Map the NTSC family back to exact rationals
    let canonical = [
        (23.976, FrameRate::FPS_23_976),
        (29.97, FrameRate::FPS_29_97),
        (59.94, FrameRate::FPS_59_94),
    ];
    for (value, rate) in canonical {
        if (fps - value).abs() < 0.005 {
            return rate;
        }
    }
    if (fps - fps.round()).abs() < 0.005 {
        FrameRate::from_int(fps.round() as u32)
    } else {
        FrameRate::new((fps * 1000.0).round() as u32, 1000)
    }
}

struct ReceiverWorker {
    producer: CaptureLoop,
    child: Arc<Mutex<Child>>,
}

/// A capture source fed by a supervised receiver process
pub struct TransportDevice {
    core: Arc<DeviceCore>,
    input: SrtInputConfig,
    program: String,
    command_override: Option<(String, Vec<String>)>,
    pool: FramePool,
    worker: Mutex<Option<ReceiverWorker>>,
    stopping: Arc<AtomicBool>,
}

impl TransportDevice {
    pub fn new(input: SrtInputConfig) -> Arc<Self> {
        Self::build(input, RECEIVER_PROGRAM.to_string(), None)
    }

    fn build(
        input: SrtInputConfig,
        program: String,
        command_override: Option<(String, Vec<String>)>,
    ) -> Arc<Self> {
        let id = stable_device_id(FAMILY, &input.name);
        let connector = format!("srt://:{}", input.port);
        Arc::new(Self {
            core: Arc::new(DeviceCore::new(id, input.name.clone(), vec![connector])),
            input,
            program,
            command_override,
            pool: FramePool::new(POOL_CAPACITY),
            worker: Mutex::new(None),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Receiver invocation: SRT listener in, raw UYVY frames out on stdout
    fn receiver_command(&self) -> (String, Vec<String>) {
        if let Some((program, args)) = &self.command_override {
            return (program.clone(), args.clone());
        }
        let url = format!(
            "srt://0.0.0.0:{}?mode=listener&latency={}",
            self.input.port,
            // SRT latency is given to the receiver in microseconds
            self.input.latency_ms as u64 * 1000,
        );
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "info".to_string(),
            "-i".to_string(),
            url,
            "-map".to_string(),
            "0:v:0".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "uyvy422".to_string(),
            "pipe:1".to_string(),
        ];
        (self.program.clone(), args)
    }
}

enum ReceivePhase {
    /// Waiting for the stream banner (or the fallback deadline)
    Negotiating { deadline: Instant },
    /// Reading fixed-size frames
    Streaming {
        mode: VideoMode,
        frame_number: u64,
        started: Instant,
    },
}

struct ReceiverState {
    stdout: ChildStdout,
    detected: Arc<Mutex<Option<DetectedMode>>>,
    requested: VideoMode,
    phase: ReceivePhase,
}

impl VideoSource for TransportDevice {
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
        // The sender dictates the real mode; advertise the nominal ones
        vec![
            VideoMode::hd1080(FrameRate::FPS_30),
            VideoMode::hd1080(FrameRate::FPS_60),
        ]
    }

    fn start_capture(&self, mode: &VideoMode) -> DeviceResult<()> {
        if self.core.status() == DeviceStatus::Capturing {
            return Err(DeviceError::AlreadyCapturing);
        }
        if mode.pixel_format != PixelFormat::Uyvy {
            self.core.set_status(DeviceStatus::Error);
            return Err(DeviceError::ModeNotSupported(format!(
                "transport listeners deliver UYVY, not {}",
                mode.pixel_format
            )));
        }
        self.core.set_status(DeviceStatus::Initializing);
        self.stopping.store(false, Ordering::SeqCst);

        let (program, args) = self.receiver_command();
        info!(device = %self.core.device_id(), program = %program, "Starting receiver");

        let mut child = match Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.core.set_status(DeviceStatus::Error);
                return Err(DeviceError::SourceUnavailable(format!(
                    "{}: {}",
                    program, e
                )));
            }
        };

        let stdout = child.stdout.take().ok_or_else(|| {
            self.core.set_status(DeviceStatus::Error);
            DeviceError::SourceUnavailable("receiver stdout unavailable".to_string())
        })?;
        let stderr = child.stderr.take();

        // Stderr drain: log lines and capture the stream banner
        let detected: Arc<Mutex<Option<DetectedMode>>> = Arc::new(Mutex::new(None));
        if let Some(stderr) = stderr {
            let detected_slot = Arc::clone(&detected);
            let device_id = self.core.device_id().to_string();
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    if let Some(found) = parse_stream_banner(&line) {
                        debug!(device = %device_id, width = found.width, height = found.height,
                            fps = ?found.fps, "Receiver reported stream mode");
                        *detected_slot.lock().unwrap() = Some(found);
                    }
                    debug!(device = %device_id, line = %line, "receiver");
                }
            });
        }

        let child = Arc::new(Mutex::new(child));
        let requested = mode.clone();
        let pool = self.pool.clone();
        let frames = self.core.video_frames().clone();
        let device_id = self.core.device_id().to_string();
        let stopping = Arc::clone(&self.stopping);
        // The producer marks unexpected stream loss as a device error
        let mark_error = {
            let core = Arc::clone(&self.core);
            move || core.set_status(DeviceStatus::Error)
        };

        let producer = CaptureLoop::spawn(
            &format!("receiver-{}", device_id),
            move || {
                Ok(ReceiverState {
                    stdout,
                    detected,
                    requested,
                    phase: ReceivePhase::Negotiating {
                        deadline: Instant::now() + Duration::from_secs(5),
                    },
                })
            },
            move |state| match &mut state.phase {
                ReceivePhase::Negotiating { deadline } => {
                    let found = *state.detected.lock().unwrap();
                    let mode = match found {
                        Some(found) => {
                            let mut mode = state.requested.clone();
                            mode.width = found.width;
                            mode.height = found.height;
                            if let Some(fps) = found.fps {
                                mode.frame_rate = frame_rate_from_fps(fps);
                            }
                            mode.label = format!("{}x{} (detected)", mode.width, mode.height);
                            Some(mode)
                        }
                        None if Instant::now() >= *deadline => Some(state.requested.clone()),
                        None => None,
                    };
                    match mode {
                        Some(mode) => {
                            state.phase = ReceivePhase::Streaming {
                                mode,
                                frame_number: 0,
                                started: Instant::now(),
                            };
                            LoopStep::Continue
                        }
                        None => LoopStep::Idle(PRODUCER_IDLE_WAIT),
                    }
                }
                ReceivePhase::Streaming {
                    mode,
                    frame_number,
                    started,
                } => {
                    let mut buffer = pool.rent(mode.frame_bytes());
                    match state.stdout.read_exact(buffer.as_mut_slice()) {
                        Ok(()) => {
                            let frame = VideoFrame::new(
                                buffer,
                                mode.clone(),
                                mode.row_bytes(),
                                started.elapsed(),
                                *frame_number,
                            );
                            frames.emit(&frame);
                            if frame_number.is_multiple_of(FRAME_LOG_INTERVAL) {
                                debug!(device = %device_id, frame = *frame_number,
                                    "Receiver frames flowing");
                            }
                            *frame_number += 1;
                            LoopStep::Continue
                        }
                        Err(e) => {
                            if !stopping.load(Ordering::SeqCst) {
                                warn!(device = %device_id, error = %e, "Receiver stream ended");
                                mark_error();
                            }
                            LoopStep::Stop
                        }
                    }
                }
            },
        );

        *self.worker.lock().unwrap() = Some(ReceiverWorker { producer, child });
        self.core.set_current_mode(Some(mode.clone()));
        self.core.set_status(DeviceStatus::Capturing);
        Ok(())
    }

    fn stop_capture(&self) {
        let worker = self.worker.lock().unwrap().take();
        let Some(mut worker) = worker else {
            return;
        };
        self.stopping.store(true, Ordering::SeqCst);
        worker.producer.request_stop();

        // Give the receiver its graceful window, then force-terminate so the
        // producer's blocking read unblocks
        let deadline = Instant::now() + CAPTURE_STOP_TIMEOUT;
        loop {
            let exited = worker
                .child
                .lock()
                .unwrap()
                .try_wait()
                .ok()
                .flatten()
                .is_some();
            if exited {
                break;
            }
            if Instant::now() >= deadline {
                warn!(device = %self.core.device_id(), "Receiver did not exit, killing");
                let mut child = worker.child.lock().unwrap();
                let _ = child.kill();
                let _ = child.wait();
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        worker.producer.stop();
        self.core.set_current_mode(None);
        self.core.set_status(DeviceStatus::Idle);
        info!(device = %self.core.device_id(), "Receiver stopped");
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

impl Drop for TransportDevice {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

/// Registry of transport listeners, derived from the `srt.inputs` setting
pub struct TransportDeviceManager {
    settings: Arc<Settings>,
    devices: Mutex<BTreeMap<String, Arc<TransportDevice>>>,
    device_arrived: EventHub<Arc<dyn VideoSource>>,
    device_removed: EventHub<String>,
}

impl TransportDeviceManager {
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
}

impl DeviceManager for TransportDeviceManager {
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
        let inputs = self.settings.srt_inputs();
        let mut arrived = Vec::new();
        let mut removed = Vec::new();
        {
            let mut devices = self.devices.lock().unwrap();
            let desired_ids: Vec<String> = inputs
                .iter()
                .map(|i| stable_device_id(FAMILY, &i.name))
                .collect();

            for input in inputs {
                let id = stable_device_id(FAMILY, &input.name);
                if !devices.contains_key(&id) {
                    let device = TransportDevice::new(input);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_parse_stream_banner() {
        let line = "  Stream #0:0: Video: rawvideo (UYVY / 0x59565955), uyvy422, 1920x1080, 995328 kb/s, 30 fps, 30 tbr";
        let mode = parse_stream_banner(line).unwrap();
        assert_eq!((mode.width, mode.height), (1920, 1080));
        assert_eq!(mode.fps, Some(30.0));
    }

    #[test]
    fn test_parse_stream_banner_ntsc_rate() {
        let line = "  Stream #0:1: Video: h264, yuv420p, 1280x720, 59.94 fps";
        let mode = parse_stream_banner(line).unwrap();
        assert_eq!(frame_rate_from_fps(mode.fps.unwrap()), FrameRate::FPS_59_94);
    }

    #[test]
    fn test_audio_banner_is_ignored() {
        let line = "  Stream #0:1: Audio: aac, 48000 Hz, stereo";
        assert!(parse_stream_banner(line).is_none());
    }

    #[test]
    fn test_receiver_command_shape() {
        let device = TransportDevice::new(SrtInputConfig {
            name: "Sim".into(),
            port: 9001,
            latency_ms: 80,
        });
        let (program, args) = device.receiver_command();
        assert_eq!(program, "ffmpeg");
        assert!(args.iter().any(|a| a.contains("srt://0.0.0.0:9001")));
        assert!(args.iter().any(|a| a.contains("latency=80000")));
        assert!(args.contains(&"uyvy422".to_string()));
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn test_frames_flow_from_fake_receiver() {
        // A fake receiver announcing an 8x2 stream and emitting 3 frames
        let script = "echo 'Stream #0:0: Video: rawvideo, uyvy422, 8x2, 30 fps' >&2; \
                      head -c 96 /dev/zero";
        let device = TransportDevice::build(
            SrtInputConfig {
                name: "Fake".into(),
                port: 0,
                latency_ms: 0,
            },
            "sh".into(),
            Some(("sh".into(), vec!["-c".into(), script.into()])),
        );

        let count = Arc::new(AtomicU64::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = device.video_frames().subscribe(move |frame: &VideoFrame| {
            assert_eq!(frame.mode().width, 8);
            assert_eq!(frame.data().len(), 32);
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        device
            .start_capture(&VideoMode::hd1080(FrameRate::FPS_30))
            .unwrap();
        // Wait for the short-lived fake stream to drain
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        device.stop_capture();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_manager_tracks_settings() {
        let settings = Arc::new(Settings::in_memory());
        let manager = TransportDeviceManager::new(Arc::clone(&settings));
        assert!(manager.available_devices().is_empty());

        settings
            .set(
                crate::config::keys::SRT_INPUTS,
                r#"[{"name":"Sim","port":9001}]"#,
            )
            .unwrap();
        manager.refresh_devices();
        assert_eq!(manager.available_devices().len(), 1);
        let id = stable_device_id(FAMILY, "Sim");
        assert!(manager.get_device(&id).is_some());

        settings.set(crate::config::keys::SRT_INPUTS, "[]").unwrap();
        manager.refresh_devices();
        assert!(manager.available_devices().is_empty());
    }
}
