// SPDX-License-Identifier: GPL-3.0-only

//! Multi-input recording orchestrator
//!
//! Fans N capturing devices out into N encoding pipelines under one logical
//! session. Preview owns device lifecycle: every selected device must already
//! be capturing, and neither start nor stop here touches device capture. A
//! pipeline failure on one input leaves the others recording.

use super::muxer::{HwAccel, MuxerCommand, MuxerConfig};
use super::pipeline::{EncodingPipeline, PipelineState};
use super::session::{
    InputRecordingSession, InputStateChange, RecorderState, RecorderStateChange, RecordingProgress,
    RecordingSession,
};
use crate::clock::Clock;
use crate::constants::RecordingPreset;
use crate::constants::timing::PROGRESS_INTERVAL;
use crate::devices::{CompositeDeviceManager, DeviceStatus, VideoSource};
use crate::errors::{RecordingError, RecordingResult};
use crate::events::{EventHub, Subscription};
use crate::storage::{FilenameGenerator, TemplateContext};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// One input selection
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub device_id: String,
    /// Appended to the base filename (e.g. "_cam1")
    pub suffix: String,
    pub enabled: bool,
}

/// Options for `start_recording`
#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub output_directory: PathBuf,
    pub filename_template: String,
    pub preset: RecordingPreset,
    pub hw_accel: HwAccel,
    /// Empty selects the first enumerated device (single-input mode)
    pub inputs: Vec<InputConfig>,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("."),
            filename_template: "{datetime}_{preset}{name}".to_string(),
            preset: RecordingPreset::default(),
            hw_accel: HwAccel::default(),
            inputs: Vec::new(),
        }
    }
}

struct ActiveInput {
    device_id: String,
    pipeline: Arc<EncodingPipeline>,
    error_reported: AtomicBool,
    _video_sub: Subscription<crate::devices::VideoFrame>,
    _audio_sub: Subscription<crate::devices::AudioSampleBlock>,
}

struct ActiveRecording {
    session: RecordingSession,
    inputs: Vec<ActiveInput>,
    progress_task: tokio::task::JoinHandle<()>,
}

/// Drives one or more encoding pipelines as a single logical session
pub struct RecordingOrchestrator {
    devices: Arc<CompositeDeviceManager>,
    clock: Arc<dyn Clock>,
    filenames: FilenameGenerator,
    muxer_command: MuxerCommand,
    state: Mutex<RecorderState>,
    active: tokio::sync::Mutex<Option<ActiveRecording>>,
    pause_gate: Arc<AtomicBool>,
    state_changed: EventHub<RecorderStateChange>,
    progress: EventHub<RecordingProgress>,
    input_state_changed: EventHub<InputStateChange>,
}

impl RecordingOrchestrator {
    pub fn new(
        devices: Arc<CompositeDeviceManager>,
        clock: Arc<dyn Clock>,
        muxer_command: MuxerCommand,
    ) -> Arc<Self> {
        Arc::new(Self {
            devices,
            filenames: FilenameGenerator::new(Arc::clone(&clock)),
            clock,
            muxer_command,
            state: Mutex::new(RecorderState::Stopped),
            active: tokio::sync::Mutex::new(None),
            pause_gate: Arc::new(AtomicBool::new(false)),
            state_changed: EventHub::new(),
            progress: EventHub::new(),
            input_state_changed: EventHub::new(),
        })
    }

    pub fn state(&self) -> RecorderState {
        *self.state.lock().unwrap()
    }

    pub fn state_changed(&self) -> &EventHub<RecorderStateChange> {
        &self.state_changed
    }

    pub fn progress(&self) -> &EventHub<RecordingProgress> {
        &self.progress
    }

    pub fn input_state_changed(&self) -> &EventHub<InputStateChange> {
        &self.input_state_changed
    }

    fn transition(&self, new: RecorderState, session: Option<RecordingSession>) {
        let old = {
            let mut state = self.state.lock().unwrap();
            let old = *state;
            *state = new;
            old
        };
        if old != new {
            info!(%old, %new, "Recorder state changed");
            self.state_changed.emit(&RecorderStateChange { old, new, session });
        }
    }

    /// Resolve the effective input list, falling back to the first
    /// enumerated device when none are configured
    fn resolve_inputs(&self, options: &RecordingOptions) -> RecordingResult<Vec<InputConfig>> {
        let configured: Vec<InputConfig> = options
            .inputs
            .iter()
            .filter(|i| i.enabled)
            .cloned()
            .collect();
        if !configured.is_empty() {
            return Ok(configured);
        }
        let first = self
            .devices
            .available_devices()
            .first()
            .map(|d| d.device_id().to_string())
            .ok_or(RecordingError::NoInputs)?;
        Ok(vec![InputConfig {
            device_id: first,
            suffix: String::new(),
            enabled: true,
        }])
    }

    /// Start a session across all enabled inputs
    ///
    /// Every device must already be in `Capturing`; this never starts
    /// capture itself. On any per-input failure the already-created
    /// pipelines are finalized and the recorder returns to `Stopped`.
    pub async fn start_recording(
        self: &Arc<Self>,
        options: RecordingOptions,
    ) -> RecordingResult<RecordingSession> {
        {
            let state = self.state.lock().unwrap();
            if *state != RecorderState::Stopped {
                return Err(RecordingError::AlreadyRecording);
            }
        }
        self.transition(RecorderState::Starting, None);

        match self.start_inner(options).await {
            Ok(session) => {
                self.transition(RecorderState::Recording, Some(session.clone()));
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Recording start failed");
                self.transition(RecorderState::Error, None);
                self.transition(RecorderState::Stopped, None);
                Err(e)
            }
        }
    }

    async fn start_inner(
        self: &Arc<Self>,
        options: RecordingOptions,
    ) -> RecordingResult<RecordingSession> {
        let inputs = self.resolve_inputs(&options)?;

        tokio::fs::create_dir_all(&options.output_directory)
            .await
            .map_err(|e| RecordingError::OutputPath(e.to_string()))?;

        let ctx = TemplateContext::with_preset(options.preset.display_name());
        let base_name = self.filenames.generate(&options.filename_template, &ctx);
        let base_path = options.output_directory.join(&base_name);
        let start_time = self.clock.now_utc();

        let mut active_inputs = Vec::with_capacity(inputs.len());
        let mut per_input = Vec::with_capacity(inputs.len());

        for (index, input) in inputs.iter().enumerate() {
            let result = self
                .start_input(index, input, &options, &base_path)
                .await;
            match result {
                Ok((active, record)) => {
                    active_inputs.push(active);
                    per_input.push(record);
                }
                Err(e) => {
                    // Unwind the inputs that already started
                    for started in &active_inputs {
                        let _ = started.pipeline.finalize().await;
                    }
                    return Err(e);
                }
            }
        }

        let session = RecordingSession {
            id: uuid::Uuid::new_v4(),
            file_path: base_path,
            start_time_utc: start_time,
            start_timecode: start_time.format("%H:%M:%S:00").to_string(),
            preset: options.preset,
            per_input,
            end_time_utc: None,
            file_size_bytes: 0,
        };

        self.pause_gate.store(false, Ordering::Relaxed);
        let progress_task = self.spawn_progress_task(
            active_inputs
                .iter()
                .map(|i| (i.device_id.clone(), Arc::clone(&i.pipeline)))
                .collect(),
            start_time,
        );

        let mut active = self.active.lock().await;
        *active = Some(ActiveRecording {
            session: session.clone(),
            inputs: active_inputs,
            progress_task,
        });
        info!(
            session = %session.id,
            inputs = session.per_input.len(),
            base = %session.file_path.display(),
            "Recording started"
        );
        Ok(session)
    }

    async fn start_input(
        self: &Arc<Self>,
        index: usize,
        input: &InputConfig,
        options: &RecordingOptions,
        base_path: &std::path::Path,
    ) -> RecordingResult<(ActiveInput, InputRecordingSession)> {
        let device = self
            .devices
            .get_device(&input.device_id)
            .ok_or_else(|| RecordingError::InputNotCapturing(input.device_id.clone()))?;
        if device.status() != DeviceStatus::Capturing {
            return Err(RecordingError::InputNotCapturing(input.device_id.clone()));
        }
        let mode = device
            .current_mode()
            .ok_or_else(|| RecordingError::InputNotCapturing(input.device_id.clone()))?;

        let file_path = PathBuf::from(format!(
            "{}{}.mp4",
            base_path.display(),
            input.suffix
        ));

        let pipeline = EncodingPipeline::initialize(
            MuxerConfig {
                file_path: file_path.clone(),
                video_mode: mode,
                audio_format: Some(Default::default()),
                preset: options.preset,
                hw_accel: options.hw_accel,
                use_fragmented_mp4: true,
            },
            &self.muxer_command,
        )
        .await?;

        // Fan the device's event streams into the pipeline. The pause gate
        // drops frames on the floor; nothing is buffered across a pause.
        let paused = Arc::clone(&self.pause_gate);
        let video_pipeline = Arc::clone(&pipeline);
        let video_paused = Arc::clone(&paused);
        let video_sub = device.video_frames().subscribe(move |frame| {
            if !video_paused.load(Ordering::Relaxed) {
                video_pipeline.write_video_frame(frame);
            }
        });
        let audio_pipeline = Arc::clone(&pipeline);
        let audio_paused = Arc::clone(&paused);
        let audio_sub = device.audio_samples().subscribe(move |block| {
            if !audio_paused.load(Ordering::Relaxed) {
                audio_pipeline.write_audio_samples(block);
            }
        });

        let record = InputRecordingSession {
            input_index: index,
            device_id: input.device_id.clone(),
            file_path,
            frames_recorded: 0,
            dropped_frames: 0,
            file_size_bytes: 0,
        };
        Ok((
            ActiveInput {
                device_id: input.device_id.clone(),
                pipeline,
                error_reported: AtomicBool::new(false),
                _video_sub: video_sub,
                _audio_sub: audio_sub,
            },
            record,
        ))
    }

    fn spawn_progress_task(
        self: &Arc<Self>,
        pipelines: Vec<(String, Arc<EncodingPipeline>)>,
        start_time: chrono::DateTime<chrono::Utc>,
    ) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let now = orchestrator.clock.now_utc();
                let duration = (now - start_time)
                    .to_std()
                    .unwrap_or_default();
                let mut frames = 0u64;
                let mut dropped = 0u64;
                let mut bytes = 0u64;
                for (index, (device_id, pipeline)) in pipelines.iter().enumerate() {
                    frames += pipeline.frames_written();
                    dropped += pipeline.dropped_frames();
                    bytes += pipeline.file_size();
                    if pipeline.state() == PipelineState::Error {
                        orchestrator.report_input_error(index, device_id);
                    }
                }
                let bitrate_mbps = if duration.as_secs_f64() > 0.0 {
                    (bytes as f64 * 8.0) / duration.as_secs_f64() / 1_000_000.0
                } else {
                    0.0
                };
                orchestrator.progress.emit(&RecordingProgress {
                    duration,
                    file_size_bytes: bytes,
                    frames_recorded: frames,
                    dropped_frames: dropped,
                    bitrate_mbps,
                });
            }
        })
    }

    fn report_input_error(&self, input_index: usize, device_id: &str) {
        // Raise the per-input failure once; the other inputs keep recording
        let active = self.active.try_lock();
        let Ok(active) = active else { return };
        let Some(active) = active.as_ref() else { return };
        let Some(input) = active.inputs.get(input_index) else {
            return;
        };
        if !input.error_reported.swap(true, Ordering::SeqCst) {
            warn!(device = %device_id, "Input pipeline failed; continuing remaining inputs");
            self.input_state_changed.emit(&InputStateChange {
                input_index,
                device_id: device_id.to_string(),
                message: "encoding pipeline failed".to_string(),
            });
        }
    }

    /// Gate frames without buffering; resume takes effect immediately
    pub fn pause(&self) {
        if self.state() != RecorderState::Recording {
            return;
        }
        self.pause_gate.store(true, Ordering::Relaxed);
        self.transition(RecorderState::Paused, None);
    }

    pub fn resume(&self) {
        if self.state() != RecorderState::Paused {
            return;
        }
        self.pause_gate.store(false, Ordering::Relaxed);
        self.transition(RecorderState::Recording, None);
    }

    /// Stop the session: unsubscribe, finalize all pipelines in parallel,
    /// and return the completed session record. Device capture is untouched.
    pub async fn stop_recording(self: &Arc<Self>) -> RecordingResult<RecordingSession> {
        {
            let state = self.state.lock().unwrap();
            if !matches!(*state, RecorderState::Recording | RecorderState::Paused) {
                return Err(RecordingError::NotRecording);
            }
        }
        self.transition(RecorderState::Stopping, None);

        let active = self.active.lock().await.take();
        let Some(active) = active else {
            self.transition(RecorderState::Stopped, None);
            return Err(RecordingError::NotRecording);
        };
        active.progress_task.abort();
        self.pause_gate.store(false, Ordering::Relaxed);

        let mut session = active.session;
        // Dropping the inputs' subscriptions detaches the devices before the
        // pipelines flush
        let inputs = active.inputs;
        let pipelines: Vec<Arc<EncodingPipeline>> =
            inputs.iter().map(|i| Arc::clone(&i.pipeline)).collect();
        drop(inputs);

        let results =
            futures::future::join_all(pipelines.iter().map(|p| p.finalize())).await;
        for (record, (pipeline, result)) in session
            .per_input
            .iter_mut()
            .zip(pipelines.iter().zip(results))
        {
            record.frames_recorded = pipeline.frames_written();
            record.dropped_frames = pipeline.dropped_frames();
            record.file_size_bytes = pipeline.file_size();
            if let Err(e) = result {
                warn!(input = record.input_index, error = %e, "Input finalize failed");
            }
        }
        session.file_size_bytes = session.per_input.iter().map(|i| i.file_size_bytes).sum();
        session.end_time_utc = Some(self.clock.now_utc());

        self.transition(RecorderState::Stopped, Some(session.clone()));
        info!(
            session = %session.id,
            bytes = session.file_size_bytes,
            frames = session.frames_recorded(),
            dropped = session.dropped_frames(),
            "Recording stopped"
        );
        Ok(session)
    }
}
