// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture engine

use std::fmt;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Result type for clip export operations
pub type ExportResult<T> = Result<T, ExportError>;

/// Result type for settings access
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Device and capture errors
#[derive(Debug, Clone)]
pub enum DeviceError {
    /// Device with the given id is not known to any manager
    NotFound(String),
    /// Capture is already running on this device
    AlreadyCapturing,
    /// The requested video mode is not supported by this source
    ModeNotSupported(String),
    /// The underlying source could not be opened or resolved
    SourceUnavailable(String),
    /// The capture producer failed after starting
    CaptureFailed(String),
    /// Configuration for this device family is invalid
    InvalidConfiguration(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound(id) => write!(f, "Device not found: {}", id),
            DeviceError::AlreadyCapturing => write!(f, "Capture already in progress"),
            DeviceError::ModeNotSupported(msg) => write!(f, "Mode not supported: {}", msg),
            DeviceError::SourceUnavailable(msg) => write!(f, "Source unavailable: {}", msg),
            DeviceError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            DeviceError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Recording and encoding-pipeline errors
#[derive(Debug, Clone)]
pub enum RecordingError {
    /// A recording is already active
    AlreadyRecording,
    /// No recording is active
    NotRecording,
    /// A selected input device is not in the Capturing state
    InputNotCapturing(String),
    /// No input devices were selected and none could be enumerated
    NoInputs,
    /// The muxer process could not be spawned
    MuxerSpawnFailed(String),
    /// The muxer process exited or its pipe broke mid-recording
    MuxerFailed(String),
    /// Output path could not be created or written
    OutputPath(String),
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::NotRecording => write!(f, "No recording in progress"),
            RecordingError::InputNotCapturing(id) => {
                write!(f, "Input device is not capturing: {}", id)
            }
            RecordingError::NoInputs => write!(f, "No recordable inputs"),
            RecordingError::MuxerSpawnFailed(msg) => {
                write!(f, "Failed to start muxer process: {}", msg)
            }
            RecordingError::MuxerFailed(msg) => write!(f, "Muxer process failed: {}", msg),
            RecordingError::OutputPath(msg) => write!(f, "Output path error: {}", msg),
        }
    }
}

impl std::error::Error for RecordingError {}

/// Kind of a clip-export error, used to decide retry eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportErrorKind {
    /// Transient state problem (service busy, file not yet flushed); retried
    InvalidOperation,
    /// Filesystem error
    Io,
    /// Extraction/compositing subprocess failed
    Subprocess,
    /// The sequence or session data is unusable
    BadSequence,
    /// The export was cancelled
    Cancelled,
}

/// Clip export error with retry classification
#[derive(Debug, Clone)]
pub struct ExportError {
    pub kind: ExportErrorKind,
    pub message: String,
}

impl ExportError {
    pub fn new(kind: ExportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ExportErrorKind::InvalidOperation, message)
    }

    pub fn subprocess(message: impl Into<String>) -> Self {
        Self::new(ExportErrorKind::Subprocess, message)
    }

    /// Only invalid-operation errors are retried by the export pipeline
    pub fn is_retryable(&self) -> bool {
        self.kind == ExportErrorKind::InvalidOperation
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExportErrorKind::InvalidOperation => write!(f, "Invalid operation: {}", self.message),
            ExportErrorKind::Io => write!(f, "I/O error: {}", self.message),
            ExportErrorKind::Subprocess => write!(f, "Subprocess error: {}", self.message),
            ExportErrorKind::BadSequence => write!(f, "Bad sequence: {}", self.message),
            ExportErrorKind::Cancelled => write!(f, "Cancelled: {}", self.message),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::new(ExportErrorKind::Io, err.to_string())
    }
}

/// Settings store errors
#[derive(Debug, Clone)]
pub enum SettingsError {
    /// The settings file could not be read or written
    Io(String),
    /// A stored value failed to parse as the requested type
    Parse(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(msg) => write!(f, "Settings I/O error: {}", msg),
            SettingsError::Parse(msg) => write!(f, "Settings parse error: {}", msg),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(err: std::io::Error) -> Self {
        SettingsError::Io(err.to_string())
    }
}
