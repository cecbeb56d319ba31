// SPDX-License-Identifier: GPL-3.0-only

//! Auto-cut state machine and controller
//!
//! The state machine itself is a pure function over `(state, event, config,
//! now)`; every time-based transition is driven by an explicit `Tick` event,
//! so the whole cut policy is deterministic under a manual clock. The
//! controller owns the detectors, routes golfer-camera frames to the swing
//! detector and simulator frames to the reset detector, and turns accepted
//! transitions into switcher cuts and events.

use super::audio::AudioImpactDetector;
use super::config::AutoCutConfig;
use super::reset::ResetDetector;
use super::swing::SwingDetector;
use crate::clock::Clock;
use crate::constants::timing::AUTOCUT_TICK_INTERVAL;
use crate::devices::types::{AudioSampleBlock, PixelFormat, VideoFrame};
use crate::devices::VideoSource;
use crate::events::{EventHub, Subscription};
use crate::switcher::Switcher;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Auto-cut controller state
///
/// `SwingDetected` and `ResetDetected` are transient: entered, published,
/// and left within the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoCutState {
    #[default]
    Disabled,
    WaitingForSwing,
    SwingDetected,
    FollowingShot,
    ResetDetected,
    Cooldown,
}

impl std::fmt::Display for AutoCutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutoCutState::Disabled => write!(f, "Disabled"),
            AutoCutState::WaitingForSwing => write!(f, "WaitingForSwing"),
            AutoCutState::SwingDetected => write!(f, "SwingDetected"),
            AutoCutState::FollowingShot => write!(f, "FollowingShot"),
            AutoCutState::ResetDetected => write!(f, "ResetDetected"),
            AutoCutState::Cooldown => write!(f, "Cooldown"),
        }
    }
}

/// Why a cut was made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutReason {
    SwingDetected,
    AudioSwing,
    /// Video spike confirmed by a recent audio spike
    VideoAudioFusion,
    /// Audio spike confirmed by a recent video spike
    AudioVideoFusion,
    PracticeSwing,
    BallLanded,
    Timeout,
}

impl CutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CutReason::SwingDetected => "swing_detected",
            CutReason::AudioSwing => "audio_swing",
            CutReason::VideoAudioFusion => "video_audio_fusion",
            CutReason::AudioVideoFusion => "audio_video_fusion",
            CutReason::PracticeSwing => "practice_swing",
            CutReason::BallLanded => "ball_landed",
            CutReason::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for CutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A cut decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutTriggered {
    pub target_source_index: usize,
    pub reason: CutReason,
}

/// State transition notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCutStateChanged {
    pub new_state: AutoCutState,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FsmEvent {
    Enable,
    Disable,
    VideoSwing,
    AudioSpike,
    ResetObserved,
    Tick,
}

/// The state variable plus the spike memory used for fusion
#[derive(Debug, Clone, Copy)]
pub(crate) struct FsmData {
    pub state: AutoCutState,
    pub entered_at: DateTime<Utc>,
    pub last_audio_spike: Option<DateTime<Utc>>,
    pub last_video_spike: Option<DateTime<Utc>>,
}

impl FsmData {
    pub fn disabled(now: DateTime<Utc>) -> Self {
        Self {
            state: AutoCutState::Disabled,
            entered_at: now,
            last_audio_spike: None,
            last_video_spike: None,
        }
    }
}

/// Outcome of one state-machine step
#[derive(Debug)]
pub(crate) struct StepResult {
    pub data: FsmData,
    pub cut: Option<CutTriggered>,
    /// States entered during this step, in order (transients included)
    pub visited: Vec<AutoCutState>,
}

fn secs(value: f64) -> Duration {
    Duration::milliseconds((value * 1000.0).round() as i64)
}

/// Pure state transition
///
/// At most one cut per step. States that do not consume an event leave the
/// data untouched.
pub(crate) fn transition(
    mut data: FsmData,
    event: FsmEvent,
    config: &AutoCutConfig,
    now: DateTime<Utc>,
) -> StepResult {
    let mut visited = Vec::new();
    let mut cut = None;
    let fusion_window = Duration::milliseconds(config.audio_video_fusion_window_ms);

    let enter = |data: &mut FsmData, state: AutoCutState, visited: &mut Vec<AutoCutState>| {
        data.state = state;
        data.entered_at = now;
        visited.push(state);
    };

    match (data.state, event) {
        (state, FsmEvent::Disable) => {
            if state != AutoCutState::Disabled {
                data.last_audio_spike = None;
                data.last_video_spike = None;
                enter(&mut data, AutoCutState::Disabled, &mut visited);
            }
        }
        (AutoCutState::Disabled, FsmEvent::Enable) => {
            enter(&mut data, AutoCutState::WaitingForSwing, &mut visited);
        }
        (_, FsmEvent::Enable) => {}

        (AutoCutState::WaitingForSwing, FsmEvent::VideoSwing) => {
            let fused = data
                .last_audio_spike
                .is_some_and(|t| now - t <= fusion_window);
            let reason = if fused {
                CutReason::VideoAudioFusion
            } else {
                CutReason::SwingDetected
            };
            cut = Some(CutTriggered {
                target_source_index: 1,
                reason,
            });
            data.last_audio_spike = None;
            data.last_video_spike = None;
            enter(&mut data, AutoCutState::SwingDetected, &mut visited);
            enter(&mut data, AutoCutState::FollowingShot, &mut visited);
        }
        (AutoCutState::WaitingForSwing, FsmEvent::AudioSpike) => {
            let video_recent = data
                .last_video_spike
                .is_some_and(|t| now - t <= fusion_window);
            if config.audio_only_mode {
                cut = Some(CutTriggered {
                    target_source_index: 1,
                    reason: CutReason::AudioSwing,
                });
            } else if video_recent {
                cut = Some(CutTriggered {
                    target_source_index: 1,
                    reason: CutReason::AudioVideoFusion,
                });
            } else {
                data.last_audio_spike = Some(now);
                return StepResult { data, cut, visited };
            }
            data.last_audio_spike = None;
            data.last_video_spike = None;
            enter(&mut data, AutoCutState::FollowingShot, &mut visited);
        }

        (AutoCutState::FollowingShot, FsmEvent::ResetObserved) => {
            if now - data.entered_at < secs(config.practice_swing_timeout_seconds) {
                cut = Some(CutTriggered {
                    target_source_index: 0,
                    reason: CutReason::PracticeSwing,
                });
                enter(&mut data, AutoCutState::Cooldown, &mut visited);
            } else {
                enter(&mut data, AutoCutState::ResetDetected, &mut visited);
            }
        }
        (AutoCutState::FollowingShot, FsmEvent::Tick) => {
            if now - data.entered_at >= secs(config.max_simulator_duration_seconds) {
                cut = Some(CutTriggered {
                    target_source_index: 0,
                    reason: CutReason::Timeout,
                });
                enter(&mut data, AutoCutState::Cooldown, &mut visited);
            }
        }

        (AutoCutState::ResetDetected, FsmEvent::Tick) => {
            if now - data.entered_at >= secs(config.post_landing_delay_seconds) {
                cut = Some(CutTriggered {
                    target_source_index: 0,
                    reason: CutReason::BallLanded,
                });
                enter(&mut data, AutoCutState::Cooldown, &mut visited);
            }
        }

        (AutoCutState::Cooldown, FsmEvent::Tick) => {
            if now - data.entered_at >= secs(config.cooldown_duration_seconds) {
                enter(&mut data, AutoCutState::WaitingForSwing, &mut visited);
            }
        }
        // Spikes during cooldown are remembered for fusion but emit nothing
        (AutoCutState::Cooldown, FsmEvent::VideoSwing) => {
            data.last_video_spike = Some(now);
        }
        (AutoCutState::Cooldown, FsmEvent::AudioSpike) => {
            data.last_audio_spike = Some(now);
        }

        _ => {}
    }

    StepResult { data, cut, visited }
}

struct ControllerInner {
    data: FsmData,
    swing: SwingDetector,
    reset: ResetDetector,
    audio: AudioImpactDetector,
    golfer_frames: u64,
    simulator_frames: u64,
}

/// Wires the detectors, state machine, clock, and switcher together
pub struct AutoCutController {
    config: AutoCutConfig,
    inner: Mutex<ControllerInner>,
    switcher: Arc<Switcher>,
    clock: Arc<dyn Clock>,
    cut_triggered: EventHub<CutTriggered>,
    state_changed: EventHub<AutoCutStateChanged>,
}

impl AutoCutController {
    /// Build with a validated config
    pub fn new(
        config: AutoCutConfig,
        switcher: Arc<Switcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, String> {
        config.validate()?;
        let now = clock.now_utc();
        Ok(Arc::new(Self {
            inner: Mutex::new(ControllerInner {
                data: FsmData::disabled(now),
                swing: SwingDetector::new(&config),
                reset: ResetDetector::new(&config),
                audio: AudioImpactDetector::new(&config),
                golfer_frames: 0,
                simulator_frames: 0,
            }),
            config,
            switcher,
            clock,
            cut_triggered: EventHub::new(),
            state_changed: EventHub::new(),
        }))
    }

    pub fn state(&self) -> AutoCutState {
        self.inner.lock().unwrap().data.state
    }

    pub fn config(&self) -> &AutoCutConfig {
        &self.config
    }

    pub fn cut_triggered(&self) -> &EventHub<CutTriggered> {
        &self.cut_triggered
    }

    pub fn state_changed(&self) -> &EventHub<AutoCutStateChanged> {
        &self.state_changed
    }

    /// Store the idle reference from a confirmed-quiet simulator frame
    pub fn calibrate_idle_reference(&self, frame: &VideoFrame) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap();
        inner.reset.calibrate(frame)?;
        info!("Idle reference calibrated");
        Ok(())
    }

    pub fn is_calibrated(&self) -> bool {
        self.inner.lock().unwrap().reset.is_calibrated()
    }

    /// Arm the controller; requires a calibrated idle reference
    ///
    /// Resets every detector baseline, so a re-enable starts from scratch.
    pub fn enable(&self) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.data.state != AutoCutState::Disabled {
            return Ok(());
        }
        if !inner.reset.is_calibrated() {
            return Err("auto-cut requires a calibrated idle reference".to_string());
        }
        inner.swing.reset();
        inner.audio.reset();
        inner.reset.reset_counter();
        inner.golfer_frames = 0;
        inner.simulator_frames = 0;
        self.step(inner, FsmEvent::Enable);
        Ok(())
    }

    /// Return to `Disabled` from any state
    pub fn disable(&self) {
        let inner = self.inner.lock().unwrap();
        self.step(inner, FsmEvent::Disable);
    }

    /// Golfer-camera frame path (program source 0 only)
    pub fn process_golfer_frame(&self, frame: &VideoFrame) {
        if !self.check_frame(frame) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        // The swing detector only consumes frames while armed; cooldown
        // keeps its baseline warm without being allowed to cut
        if !matches!(
            inner.data.state,
            AutoCutState::WaitingForSwing | AutoCutState::Cooldown
        ) {
            return;
        }
        let analyse = inner.golfer_frames % self.config.frame_skip as u64 == 0;
        inner.golfer_frames += 1;
        if !analyse {
            return;
        }
        if inner.swing.process(frame) {
            debug!("Video swing spike");
            self.step(inner, FsmEvent::VideoSwing);
        }
    }

    /// Simulator frame path (program source 1 only)
    pub fn process_simulator_frame(&self, frame: &VideoFrame) {
        if !self.check_frame(frame) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.data.state != AutoCutState::FollowingShot {
            return;
        }
        let analyse = inner.simulator_frames % self.config.frame_skip as u64 == 0;
        inner.simulator_frames += 1;
        if !analyse {
            return;
        }
        if inner.reset.process(frame) {
            debug!("Simulator reset observed");
            self.step(inner, FsmEvent::ResetObserved);
        }
    }

    /// Golfer-microphone sample path
    pub fn process_audio(&self, block: &AudioSampleBlock) {
        if !self.config.audio_enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if !matches!(
            inner.data.state,
            AutoCutState::WaitingForSwing | AutoCutState::Cooldown
        ) {
            return;
        }
        if inner.audio.process(block) {
            debug!("Audio impact spike");
            self.step(inner, FsmEvent::AudioSpike);
        }
    }

    /// Advance wall-clock-driven transitions
    pub fn tick(&self) {
        let inner = self.inner.lock().unwrap();
        self.step(inner, FsmEvent::Tick);
    }

    /// Periodic tick task; abort the handle to stop
    pub fn spawn_ticker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AUTOCUT_TICK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                controller.tick();
            }
        })
    }

    /// Route the device event streams of a two-source setup into the
    /// controller; drop the returned wiring to detach
    pub fn attach(
        self: &Arc<Self>,
        golfer: &Arc<dyn VideoSource>,
        simulator: &Arc<dyn VideoSource>,
    ) -> AutoCutWiring {
        let video_controller = Arc::clone(self);
        let golfer_sub = golfer
            .video_frames()
            .subscribe(move |frame| video_controller.process_golfer_frame(frame));
        let audio_controller = Arc::clone(self);
        let audio_sub = golfer
            .audio_samples()
            .subscribe(move |block| audio_controller.process_audio(block));
        let sim_controller = Arc::clone(self);
        let simulator_sub = simulator
            .video_frames()
            .subscribe(move |frame| sim_controller.process_simulator_frame(frame));
        AutoCutWiring {
            _golfer_video: golfer_sub,
            _golfer_audio: audio_sub,
            _simulator_video: simulator_sub,
        }
    }

    /// Frames the detectors cannot analyse are logged and skipped, never
    /// allowed to take the controller down
    fn check_frame(&self, frame: &VideoFrame) -> bool {
        let mode = frame.mode();
        if mode.pixel_format != PixelFormat::Uyvy {
            warn!(format = %mode.pixel_format, "Skipping non-UYVY frame in auto-cut");
            return false;
        }
        if frame.data().len() < mode.frame_bytes() {
            warn!("Skipping truncated frame in auto-cut");
            return false;
        }
        true
    }

    /// Run one FSM step and publish its effects outside the lock
    fn step(&self, mut inner: MutexGuard<'_, ControllerInner>, event: FsmEvent) {
        let now = self.clock.now_utc();
        let result = transition(inner.data, event, &self.config, now);
        inner.data = result.data;
        if result.visited.contains(&AutoCutState::FollowingShot) {
            // New shot cycle: the idle run must start fresh
            inner.reset.reset_counter();
        }
        drop(inner);

        // The cut is published before the state that presupposes it
        if let Some(cut) = result.cut {
            info!(target = cut.target_source_index, reason = %cut.reason, "Auto cut");
            self.switcher.set_program_source_index(cut.target_source_index);
            self.cut_triggered.emit(&cut);
        }
        for state in result.visited {
            self.state_changed.emit(&AutoCutStateChanged { new_state: state });
        }
    }
}

/// Subscriptions tying a controller to its two sources
pub struct AutoCutWiring {
    _golfer_video: Subscription<VideoFrame>,
    _golfer_audio: Subscription<AudioSampleBlock>,
    _simulator_video: Subscription<VideoFrame>,
}
