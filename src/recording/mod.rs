// SPDX-License-Identifier: GPL-3.0-only

//! Multi-input recording: muxer supervision and session orchestration

pub mod fifo;
pub mod muxer;
pub mod orchestrator;
pub mod pipeline;
pub mod session;

pub use muxer::{HwAccel, MuxerCommand, MuxerConfig};
pub use orchestrator::{InputConfig, RecordingOptions, RecordingOrchestrator};
pub use pipeline::{EncodingPipeline, PipelineState};
pub use session::{
    InputRecordingSession, InputStateChange, RecorderState, RecorderStateChange,
    RecordingProgress, RecordingSession,
};
