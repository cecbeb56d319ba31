// SPDX-License-Identifier: GPL-3.0-only

//! Recording session records and recorder events

use crate::constants::RecordingPreset;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Per-input recording record
#[derive(Debug, Clone)]
pub struct InputRecordingSession {
    pub input_index: usize,
    pub device_id: String,
    pub file_path: PathBuf,
    pub frames_recorded: u64,
    pub dropped_frames: u64,
    pub file_size_bytes: u64,
}

/// One logical multi-input recording
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub id: Uuid,
    /// Base path (without per-input suffix)
    pub file_path: PathBuf,
    pub start_time_utc: DateTime<Utc>,
    pub start_timecode: String,
    pub preset: RecordingPreset,
    pub per_input: Vec<InputRecordingSession>,
    pub end_time_utc: Option<DateTime<Utc>>,
    pub file_size_bytes: u64,
}

impl RecordingSession {
    /// Aggregate frames recorded across inputs
    pub fn frames_recorded(&self) -> u64 {
        self.per_input.iter().map(|i| i.frames_recorded).sum()
    }

    /// Aggregate dropped frames across inputs
    pub fn dropped_frames(&self) -> u64 {
        self.per_input.iter().map(|i| i.dropped_frames).sum()
    }
}

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Stopped,
    Starting,
    Recording,
    Paused,
    Stopping,
    Error,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderState::Stopped => write!(f, "Stopped"),
            RecorderState::Starting => write!(f, "Starting"),
            RecorderState::Recording => write!(f, "Recording"),
            RecorderState::Paused => write!(f, "Paused"),
            RecorderState::Stopping => write!(f, "Stopping"),
            RecorderState::Error => write!(f, "Error"),
        }
    }
}

/// Recorder state transition event
#[derive(Debug, Clone)]
pub struct RecorderStateChange {
    pub old: RecorderState,
    pub new: RecorderState,
    /// Present once a session exists for the transition
    pub session: Option<RecordingSession>,
}

/// Aggregated per-second progress event
#[derive(Debug, Clone, Copy)]
pub struct RecordingProgress {
    pub duration: Duration,
    pub file_size_bytes: u64,
    pub frames_recorded: u64,
    pub dropped_frames: u64,
    pub bitrate_mbps: f64,
}

/// Raised when one input's pipeline fails while the rest keep recording
#[derive(Debug, Clone)]
pub struct InputStateChange {
    pub input_index: usize,
    pub device_id: String,
    pub message: String,
}
