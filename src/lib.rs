// SPDX-License-Identifier: GPL-3.0-only

//! Swingcast - live capture, switching, and clip export for golf-simulator
//! broadcast
//!
//! Two live sources (golfer camera and simulator screen) are ingested as
//! 1080p UYVY, continuously recorded, and switched on air by an automatic
//! cut engine that detects swings visually and acoustically, then returns to
//! the golfer camera once the simulator settles. Completed swings are cut
//! out of the simulator recording as shareable clips.
//!
//! # Architecture
//!
//! - [`devices`]: capture-source abstraction, synthetic and transport
//!   families, composite registry
//! - [`buffers`]: frame pools, the drop-oldest frame ring, the audio ring
//! - [`recording`]: supervised muxer pipelines and the multi-input recorder
//! - [`switcher`]: program/preview switching
//! - [`autocut`]: the swing/impact/reset detectors and the cut state machine
//! - [`sequence`]: swing sequence bookkeeping per session
//! - [`export`]: clip extraction and overlay compositing
//! - [`config`] / [`storage`]: settings store and filename generation

pub mod autocut;
pub mod buffers;
pub mod clock;
pub mod config;
pub mod constants;
pub mod devices;
pub mod errors;
pub mod events;
pub mod export;
pub mod recording;
pub mod sequence;
pub mod storage;
pub mod switcher;

// Re-export commonly used types
pub use autocut::{AutoCutConfig, AutoCutController, AutoCutState, CutReason, SensitivityPreset};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use constants::RecordingPreset;
pub use devices::CompositeDeviceManager;
pub use recording::{RecordingOptions, RecordingOrchestrator};
pub use sequence::{GolfSession, SequenceRecorder, SwingSequence};
pub use switcher::Switcher;
