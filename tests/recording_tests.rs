// SPDX-License-Identifier: GPL-3.0-only

//! Multi-input recording against a sink muxer command
//!
//! These tests drive real synthetic devices through the orchestrator; the
//! muxer is replaced by `cat` so the bytes that reach each "encoder" can be
//! counted exactly.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use swingcast::clock::SystemClock;
use swingcast::config::Settings;
use swingcast::devices::synthetic::SyntheticDeviceManager;
use swingcast::devices::{
    CompositeDeviceManager, DeviceManager, DeviceStatus, FrameRate, PixelFormat, VideoMode,
    VideoSource,
};
use swingcast::errors::RecordingError;
use swingcast::recording::{
    InputConfig, MuxerCommand, RecorderState, RecorderStateChange, RecordingOptions,
    RecordingOrchestrator,
};

fn test_mode() -> VideoMode {
    VideoMode {
        width: 64,
        height: 36,
        frame_rate: FrameRate::from_int(100),
        pixel_format: PixelFormat::Uyvy,
        interlaced: false,
        label: "test".into(),
    }
}

fn registry_with_black_and_color() -> (Arc<CompositeDeviceManager>, Vec<Arc<dyn VideoSource>>) {
    let settings = Arc::new(Settings::in_memory());
    settings
        .set(swingcast::config::keys::VIRTUAL_COLORS, "#FF0000")
        .unwrap();
    let synthetic = SyntheticDeviceManager::new(settings);
    let registry = CompositeDeviceManager::new(vec![synthetic as Arc<dyn DeviceManager>]);
    let devices = registry.available_devices();
    assert_eq!(devices.len(), 2);
    (registry, devices)
}

fn sink_command(dir: &std::path::Path) -> MuxerCommand {
    // Every pipeline instance appends to its own stdin sink; the per-input
    // recording file itself is never written by `cat`, so sizes come from
    // the sink files
    MuxerCommand::custom(
        "sh",
        vec![
            "-c".into(),
            format!("cat > \"{}/sink_$$.bin\"", dir.display()),
        ],
    )
}

fn options(dir: &std::path::Path, devices: &[Arc<dyn VideoSource>]) -> RecordingOptions {
    RecordingOptions {
        output_directory: dir.to_path_buf(),
        inputs: devices
            .iter()
            .enumerate()
            .map(|(i, d)| InputConfig {
                device_id: d.device_id().to_string(),
                suffix: format!("_cam{}", i + 1),
                enabled: true,
            })
            .collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_two_input_session_records_both() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, devices) = registry_with_black_and_color();
    for device in &devices {
        device.start_capture(&test_mode()).unwrap();
    }

    let orchestrator =
        RecordingOrchestrator::new(registry, Arc::new(SystemClock), sink_command(dir.path()));

    let states = Arc::new(Mutex::new(Vec::new()));
    let states_clone = Arc::clone(&states);
    let _sub = orchestrator
        .state_changed()
        .subscribe(move |c: &RecorderStateChange| states_clone.lock().unwrap().push(c.new));

    let session = orchestrator
        .start_recording(options(dir.path(), &devices))
        .await
        .unwrap();
    assert_eq!(session.per_input.len(), 2);
    assert_eq!(orchestrator.state(), RecorderState::Recording);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let session = orchestrator.stop_recording().await.unwrap();

    assert!(session.frames_recorded() > 0, "both inputs should have frames");
    assert!(session.end_time_utc.is_some());
    for input in &session.per_input {
        assert!(
            input.frames_recorded > 0,
            "input {} recorded nothing",
            input.input_index
        );
    }
    // Devices keep capturing; the recorder never owns their lifecycle
    for device in &devices {
        assert_eq!(device.status(), DeviceStatus::Capturing);
        device.stop_capture();
    }
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            RecorderState::Starting,
            RecorderState::Recording,
            RecorderState::Stopping,
            RecorderState::Stopped,
        ]
    );

    // The sink files hold exactly the recorded frames
    let frame_bytes = test_mode().frame_bytes() as u64;
    let mut sink_total = 0u64;
    for entry in std::fs::read_dir(dir.path()).unwrap().flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("sink_") {
            sink_total += entry.metadata().unwrap().len();
        }
    }
    assert_eq!(sink_total, session.frames_recorded() * frame_bytes);
}

#[tokio::test]
async fn test_start_requires_capturing_devices() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, devices) = registry_with_black_and_color();
    // Devices intentionally left idle

    let orchestrator =
        RecordingOrchestrator::new(registry, Arc::new(SystemClock), sink_command(dir.path()));
    let result = orchestrator
        .start_recording(options(dir.path(), &devices))
        .await;

    assert!(matches!(result, Err(RecordingError::InputNotCapturing(_))));
    assert_eq!(orchestrator.state(), RecorderState::Stopped);
}

#[tokio::test]
async fn test_bad_input_at_start_unwinds_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, devices) = registry_with_black_and_color();
    for device in &devices {
        device.start_capture(&test_mode()).unwrap();
    }

    let orchestrator =
        RecordingOrchestrator::new(registry, Arc::new(SystemClock), sink_command(dir.path()));
    let mut options = options(dir.path(), &devices);
    // Second input points at a device that is not capturing
    options.inputs[1].device_id = "srt-00000000".to_string();

    let result = orchestrator.start_recording(options).await;
    // Start is atomic: a bad input aborts the attempt and unwinds
    assert!(result.is_err());
    assert_eq!(orchestrator.state(), RecorderState::Stopped);

    for device in &devices {
        assert_eq!(device.status(), DeviceStatus::Capturing);
        device.stop_capture();
    }
}

#[tokio::test]
async fn test_pause_drops_frames_without_buffering() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, devices) = registry_with_black_and_color();
    for device in &devices {
        device.start_capture(&test_mode()).unwrap();
    }

    let orchestrator =
        RecordingOrchestrator::new(registry, Arc::new(SystemClock), sink_command(dir.path()));
    orchestrator
        .start_recording(options(dir.path(), &devices))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    orchestrator.pause();
    assert_eq!(orchestrator.state(), RecorderState::Paused);
    tokio::time::sleep(Duration::from_millis(100)).await;

    orchestrator.resume();
    assert_eq!(orchestrator.state(), RecorderState::Recording);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let session = orchestrator.stop_recording().await.unwrap();
    // Roughly 350 ms of wall time at 100 fps minus the paused window;
    // the exact count varies, but a full no-pause run would be near 35
    // per input. Just require that something was recorded and the pause
    // did not error the pipelines.
    assert!(session.frames_recorded() > 0);

    for device in &devices {
        device.stop_capture();
    }
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, devices) = registry_with_black_and_color();
    for device in &devices {
        device.start_capture(&test_mode()).unwrap();
    }

    let orchestrator =
        RecordingOrchestrator::new(registry, Arc::new(SystemClock), sink_command(dir.path()));
    orchestrator
        .start_recording(options(dir.path(), &devices))
        .await
        .unwrap();

    let again = orchestrator
        .start_recording(options(dir.path(), &devices))
        .await;
    assert!(matches!(again, Err(RecordingError::AlreadyRecording)));

    orchestrator.stop_recording().await.unwrap();
    for device in &devices {
        device.stop_capture();
    }
}

#[tokio::test]
async fn test_stop_without_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _devices) = registry_with_black_and_color();
    let orchestrator =
        RecordingOrchestrator::new(registry, Arc::new(SystemClock), sink_command(dir.path()));
    assert!(matches!(
        orchestrator.stop_recording().await,
        Err(RecordingError::NotRecording)
    ));
}
