// SPDX-License-Identifier: GPL-3.0-only

//! Clipping service: range extraction from a recording on disk

use crate::errors::{ExportError, ExportErrorKind, ExportResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

/// A named clip range within the active recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipHandle {
    pub name: String,
    pub in_offset: Duration,
    pub out_offset: Duration,
}

/// Extraction boundary consumed by the export pipeline
pub trait ClippingService: Send + Sync {
    /// Select the recording that subsequent clips are cut from
    fn set_active_recording(&self, path: &Path) -> ExportResult<()>;

    /// Define a named clip by offsets from the recording start
    fn create_clip(
        &self,
        name: &str,
        in_offset: Duration,
        out_offset: Duration,
    ) -> ExportResult<ClipHandle>;

    /// Cut the clip out to `output_dir`, returning the written path
    fn extract_clip(&self, clip: &ClipHandle, output_dir: &Path) -> ExportResult<PathBuf>;
}

fn stream_banner_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Stream #\d+:\d+.*Video:.*?(\d{2,5})x(\d{2,5})").expect("valid regex")
    })
}

/// Media-muxer-backed clipping service
pub struct FfmpegClipper {
    program: String,
    active: Mutex<Option<PathBuf>>,
    probed_resolution: Mutex<Option<(u32, u32)>>,
}

impl Default for FfmpegClipper {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegClipper {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            active: Mutex::new(None),
            probed_resolution: Mutex::new(None),
        }
    }

    /// Resolution reported by the extractor's stderr for the last clip
    pub fn probed_resolution(&self) -> Option<(u32, u32)> {
        *self.probed_resolution.lock().unwrap()
    }

    fn format_offset(offset: Duration) -> String {
        format!("{:.3}", offset.as_secs_f64())
    }
}

impl ClippingService for FfmpegClipper {
    fn set_active_recording(&self, path: &Path) -> ExportResult<()> {
        if !path.exists() {
            // The recording may still be flushing; the caller retries
            return Err(ExportError::invalid_operation(format!(
                "recording not on disk yet: {}",
                path.display()
            )));
        }
        *self.active.lock().unwrap() = Some(path.to_path_buf());
        debug!(path = %path.display(), "Active recording set");
        Ok(())
    }

    fn create_clip(
        &self,
        name: &str,
        in_offset: Duration,
        out_offset: Duration,
    ) -> ExportResult<ClipHandle> {
        if self.active.lock().unwrap().is_none() {
            return Err(ExportError::invalid_operation(
                "no active recording selected",
            ));
        }
        if out_offset <= in_offset {
            return Err(ExportError::new(
                ExportErrorKind::BadSequence,
                format!(
                    "clip range is empty: in {:?} out {:?}",
                    in_offset, out_offset
                ),
            ));
        }
        Ok(ClipHandle {
            name: name.to_string(),
            in_offset,
            out_offset,
        })
    }

    fn extract_clip(&self, clip: &ClipHandle, output_dir: &Path) -> ExportResult<PathBuf> {
        let active = self
            .active
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ExportError::invalid_operation("no active recording selected"))?;

        std::fs::create_dir_all(output_dir)?;
        let output_path = output_dir.join(format!("{}.mp4", clip.name));

        // Stream copy between the offsets; no re-encode
        let output = Command::new(&self.program)
            .arg("-hide_banner")
            .arg("-y")
            .arg("-ss")
            .arg(Self::format_offset(clip.in_offset))
            .arg("-to")
            .arg(Self::format_offset(clip.out_offset))
            .arg("-i")
            .arg(&active)
            .arg("-c")
            .arg("copy")
            .arg(&output_path)
            .output()
            .map_err(|e| ExportError::subprocess(format!("{}: {}", self.program, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(caps) = stream_banner_regex().captures(&stderr) {
            let parsed = caps[1]
                .parse::<u32>()
                .ok()
                .zip(caps[2].parse::<u32>().ok());
            if let Some((width, height)) = parsed {
                debug!(width, height, "Extractor reported clip resolution");
                *self.probed_resolution.lock().unwrap() = Some((width, height));
            }
        }

        if !output.status.success() {
            return Err(ExportError::subprocess(format!(
                "extractor exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        info!(clip = %clip.name, output = %output_path.display(), "Clip extracted");
        Ok(output_path)
    }
}
