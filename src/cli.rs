// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for headless engine operation
//!
//! This module provides command-line functionality for:
//! - Listing configured capture devices
//! - Running a timed multi-input recording
//! - Running a golf session with auto-cut and clip export

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use swingcast::autocut::{AutoCutController, CutTriggered};
use swingcast::clock::SystemClock;
use swingcast::config::{Settings, load_or_default};
use swingcast::constants::RecordingPreset;
use swingcast::devices::synthetic::SyntheticDeviceManager;
use swingcast::devices::transport::TransportDeviceManager;
use swingcast::devices::{
    CompositeDeviceManager, DeviceManager, FrameRate, VideoFrame, VideoMode, VideoSource,
};
use swingcast::export::{
    ClipExporter, FfmpegClipper, FfmpegOverlayCompositor, OverlayConfig,
};
use swingcast::recording::{
    InputConfig, MuxerCommand, RecordingOptions, RecordingOrchestrator, RecordingProgress,
};
use swingcast::SensitivityPreset;
use swingcast::sequence::{GolfSession, MemorySequenceStore, SequenceRecorder};
use swingcast::switcher::Switcher;

/// Build the composite registry from settings
fn registry(settings: &Arc<Settings>) -> Arc<CompositeDeviceManager> {
    let synthetic = SyntheticDeviceManager::new(Arc::clone(settings));
    let transport = TransportDeviceManager::new(Arc::clone(settings));
    CompositeDeviceManager::new(vec![
        synthetic as Arc<dyn DeviceManager>,
        transport as Arc<dyn DeviceManager>,
    ])
}

/// Ctrl-C flag for long-running commands
fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    let _ = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    });
    flag
}

/// Sleep out the duration, waking early on Ctrl-C
async fn run_window(duration: Duration, interrupted: &AtomicBool) {
    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < deadline {
        if interrupted.load(Ordering::SeqCst) {
            println!("Interrupted.");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// List all configured devices and their advertised modes
pub fn list_devices(settings_path: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let settings = Arc::new(load_or_default(settings_path.as_deref()));
    let registry = registry(&settings);

    let devices = registry.available_devices();
    if devices.is_empty() {
        println!("No devices configured.");
        return Ok(());
    }

    println!("Available devices:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {} ({})", index, device.display_name(), device.device_id());
        let modes: Vec<String> = device
            .list_modes()
            .iter()
            .map(|m| m.to_string())
            .collect();
        println!("      Modes: {}", modes.join(", "));
        println!("      Connectors: {}", device.available_connectors().join(", "));
        println!();
    }
    Ok(())
}

/// Start capture on up to `count` devices and return them
fn start_devices(
    registry: &CompositeDeviceManager,
    count: usize,
) -> Result<Vec<Arc<dyn VideoSource>>, Box<dyn Error>> {
    let devices = registry.available_devices();
    if devices.len() < count {
        return Err(format!(
            "need {} devices, found {}; configure srt.inputs or virtual.colors",
            count,
            devices.len()
        )
        .into());
    }
    let mode = VideoMode::hd1080(FrameRate::FPS_30);
    let selected: Vec<Arc<dyn VideoSource>> = devices.into_iter().take(count).collect();
    for device in &selected {
        device.start_capture(&mode)?;
    }
    Ok(selected)
}

/// Record all selected inputs for a fixed duration
pub async fn record(
    settings_path: Option<PathBuf>,
    output: PathBuf,
    duration_secs: u64,
    preset: RecordingPreset,
    inputs: usize,
) -> Result<(), Box<dyn Error>> {
    let settings = Arc::new(load_or_default(settings_path.as_deref()));
    let registry = registry(&settings);
    let devices = start_devices(&registry, inputs)?;

    let orchestrator = RecordingOrchestrator::new(
        Arc::clone(&registry),
        Arc::new(SystemClock),
        MuxerCommand::default(),
    );
    let _progress_sub = orchestrator.progress().subscribe(|p: &RecordingProgress| {
        println!(
            "  {:>4}s  {:>8} frames  {:>3} dropped  {:>7.2} Mbps",
            p.duration.as_secs(),
            p.frames_recorded,
            p.dropped_frames,
            p.bitrate_mbps
        );
    });

    let input_configs = devices
        .iter()
        .enumerate()
        .map(|(i, d)| InputConfig {
            device_id: d.device_id().to_string(),
            suffix: format!("_cam{}", i + 1),
            enabled: true,
        })
        .collect();
    let session = orchestrator
        .start_recording(RecordingOptions {
            output_directory: output,
            preset,
            inputs: input_configs,
            ..Default::default()
        })
        .await?;
    println!(
        "Recording {} inputs to {}*",
        session.per_input.len(),
        session.file_path.display()
    );

    let interrupted = interrupt_flag();
    run_window(Duration::from_secs(duration_secs), &interrupted).await;

    let session = orchestrator.stop_recording().await?;
    println!(
        "Saved {} bytes across {} files ({} frames, {} dropped).",
        session.file_size_bytes,
        session.per_input.len(),
        session.frames_recorded(),
        session.dropped_frames()
    );
    for device in &devices {
        device.stop_capture();
    }
    Ok(())
}

/// Grab one frame from a capturing device (for idle calibration)
async fn capture_one_frame(device: &Arc<dyn VideoSource>) -> Result<VideoFrame, Box<dyn Error>> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<VideoFrame>(1);
    let pool = swingcast::buffers::FramePool::new(2);
    let sub = device.video_frames().subscribe(move |frame| {
        let _ = tx.try_send(frame.copy_into(&pool));
    });
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .map_err(|_| "no frame from simulator source within 5s")?
        .ok_or("simulator frame stream closed")?;
    drop(sub);
    Ok(frame)
}

/// Run a full golf session: record both sources, auto-cut between them,
/// and export a clip per completed swing
pub async fn golf(
    settings_path: Option<PathBuf>,
    output: PathBuf,
    duration_secs: u64,
    golfer_name: String,
    audio: bool,
) -> Result<(), Box<dyn Error>> {
    let settings = Arc::new(load_or_default(settings_path.as_deref()));
    let registry = registry(&settings);
    let devices = start_devices(&registry, 2)?;
    let golfer_cam = Arc::clone(&devices[0]);
    let simulator = Arc::clone(&devices[1]);
    println!(
        "Golfer camera: {} / Simulator: {}",
        golfer_cam.display_name(),
        simulator.display_name()
    );

    let clock = Arc::new(SystemClock);
    let orchestrator = RecordingOrchestrator::new(
        Arc::clone(&registry),
        clock.clone() as Arc<dyn swingcast::Clock>,
        MuxerCommand::default(),
    );
    let recording = orchestrator
        .start_recording(RecordingOptions {
            output_directory: output,
            inputs: vec![
                InputConfig {
                    device_id: golfer_cam.device_id().to_string(),
                    suffix: "_golfer".to_string(),
                    enabled: true,
                },
                InputConfig {
                    device_id: simulator.device_id().to_string(),
                    suffix: "_sim".to_string(),
                    enabled: true,
                },
            ],
            ..Default::default()
        })
        .await?;

    // Auto-cut with the configured sensitivity
    let mut config = settings
        .golf_sensitivity()
        .and_then(|name| SensitivityPreset::from_name(&name))
        .unwrap_or_default()
        .config();
    config.audio_enabled = audio;
    let switcher = Arc::new(Switcher::new());
    let controller = AutoCutController::new(
        config,
        Arc::clone(&switcher),
        clock.clone() as Arc<dyn swingcast::Clock>,
    )?;
    let _cut_sub = controller.cut_triggered().subscribe(|cut: &CutTriggered| {
        println!("  CUT -> source {} ({})", cut.target_source_index, cut.reason);
    });

    // Calibrate against the quiet simulator screen, then arm
    let idle_frame = capture_one_frame(&simulator).await?;
    controller.calibrate_idle_reference(&idle_frame)?;
    controller.enable()?;
    let _wiring = controller.attach(&golfer_cam, &simulator);
    let ticker = controller.spawn_ticker();

    // Sequence bookkeeping and per-swing clip export
    let session = GolfSession::new(
        golfer_name,
        recording.start_time_utc,
        recording.per_input[1].file_path.clone(),
    );
    let recorder = SequenceRecorder::attach(
        session.id,
        &switcher,
        controller.cut_triggered(),
        clock as Arc<dyn swingcast::Clock>,
    );
    let exporter = ClipExporter::new(
        Arc::new(FfmpegClipper::default()),
        Arc::new(FfmpegOverlayCompositor::default()),
        Arc::new(MemorySequenceStore::new()),
    );
    let cancel = Arc::new(AtomicBool::new(false));
    let _export_sub = exporter.attach(
        &recorder,
        session,
        OverlayConfig::default(),
        Arc::clone(&cancel),
    );
    let _done_sub = exporter.completed().subscribe(|done| {
        match (&done.output_path, &done.error) {
            (Some(path), _) => println!("  Clip ready: {}", path.display()),
            (None, Some(error)) => println!("  Clip export failed: {}", error),
            _ => {}
        }
    });

    println!("Session running; Ctrl-C to finish.");
    let interrupted = interrupt_flag();
    run_window(Duration::from_secs(duration_secs), &interrupted).await;

    cancel.store(true, Ordering::SeqCst);
    ticker.abort();
    controller.disable();
    let session = orchestrator.stop_recording().await?;
    println!(
        "Session saved: {} bytes, {} frames.",
        session.file_size_bytes,
        session.frames_recorded()
    );
    for device in &devices {
        device.stop_capture();
    }
    Ok(())
}
