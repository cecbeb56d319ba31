// SPDX-License-Identifier: GPL-3.0-only

//! Overlay configuration and the compositor boundary
//!
//! A final clip can carry a logo bug (scaled, positioned, alpha-blended
//! image) and a lower third (boxed text naming the golfer). The reference
//! compositor invokes the media muxer with a filter graph; any alternative
//! renderer just implements [`OverlayCompositor`].

use crate::errors::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Logo bug placement, in normalized coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoBug {
    pub path: PathBuf,
    /// Horizontal position of the top-left corner, 0..1
    pub x_pct: f32,
    /// Vertical position of the top-left corner, 0..1
    pub y_pct: f32,
    /// Bug width as a fraction of the frame width, 0..1
    pub scale_pct: f32,
    /// 0 transparent .. 1 opaque
    pub opacity: f32,
}

/// Lower-third anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LowerThirdPosition {
    BottomLeft,
    #[default]
    BottomCenter,
    BottomRight,
}

/// Lower-third text banner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowerThird {
    pub enabled: bool,
    /// May contain `{golfer}`, replaced with the golfer's display name
    pub text: String,
    pub font: String,
    pub size: u32,
    /// `#RRGGBB`
    pub fg_color: String,
    /// `#RRGGBB`
    pub bg_color: String,
    /// 0 transparent .. 1 opaque
    pub bg_opacity: f32,
    pub position: LowerThirdPosition,
}

impl Default for LowerThird {
    fn default() -> Self {
        Self {
            enabled: false,
            text: "{golfer}".to_string(),
            font: "Sans".to_string(),
            size: 48,
            fg_color: "#FFFFFF".to_string(),
            bg_color: "#000000".to_string(),
            bg_opacity: 0.6,
            position: LowerThirdPosition::default(),
        }
    }
}

/// Overlay selection for exported clips
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub logo_bug: Option<LogoBug>,
    pub lower_third: Option<LowerThird>,
}

impl OverlayConfig {
    /// Whether an overlay pass is needed at all
    pub fn has_overlays(&self) -> bool {
        self.logo_bug.is_some() || self.lower_third.as_ref().is_some_and(|lt| lt.enabled)
    }
}

/// Compositor boundary consumed by the export pipeline
pub trait OverlayCompositor: Send + Sync {
    fn export_with_overlays(
        &self,
        base_path: &Path,
        final_path: &Path,
        golfer_name: Option<&str>,
        config: &OverlayConfig,
    ) -> ExportResult<()>;
}

/// Media-muxer-backed compositor
pub struct FfmpegOverlayCompositor {
    program: String,
}

impl Default for FfmpegOverlayCompositor {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegOverlayCompositor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Build the filter graph for the configured overlays
    ///
    /// The last stage leaves its output pad unlabeled so the muxer maps it
    /// without an explicit `-map`.
    fn filter_graph(config: &OverlayConfig, golfer_name: Option<&str>) -> String {
        let lower_third = config.lower_third.as_ref().filter(|lt| lt.enabled);
        let mut graph = String::new();
        let mut label = "[0:v]".to_string();

        if let Some(bug) = &config.logo_bug {
            // Input 1 is the bug image: scale to the configured width,
            // apply opacity, pin to the normalized position
            graph.push_str(&format!(
                "[1:v]scale=iw*{:.3}:-1,format=rgba,colorchannelmixer=aa={:.3}[bug];",
                bug.scale_pct, bug.opacity
            ));
            graph.push_str(&format!(
                "{}[bug]overlay=x=W*{:.3}:y=H*{:.3}",
                label, bug.x_pct, bug.y_pct
            ));
            if lower_third.is_some() {
                graph.push_str("[with_bug];");
                label = "[with_bug]".to_string();
            }
        }

        if let Some(lower) = lower_third {
            let text = lower
                .text
                .replace("{golfer}", golfer_name.unwrap_or(""))
                .replace('\'', "\\'")
                .replace(':', "\\:");
            let x_expr = match lower.position {
                LowerThirdPosition::BottomLeft => "40",
                LowerThirdPosition::BottomCenter => "(w-text_w)/2",
                LowerThirdPosition::BottomRight => "w-text_w-40",
            };
            graph.push_str(&format!(
                "{}drawtext=text='{}':font='{}':fontsize={}:fontcolor={}:box=1:boxcolor={}@{:.2}:boxborderw=12:x={}:y=h-text_h-60",
                label,
                text,
                lower.font,
                lower.size,
                lower.fg_color,
                lower.bg_color,
                lower.bg_opacity,
                x_expr
            ));
        }
        graph
    }
}

impl OverlayCompositor for FfmpegOverlayCompositor {
    fn export_with_overlays(
        &self,
        base_path: &Path,
        final_path: &Path,
        golfer_name: Option<&str>,
        config: &OverlayConfig,
    ) -> ExportResult<()> {
        if !base_path.exists() {
            return Err(ExportError::invalid_operation(format!(
                "base clip not present yet: {}",
                base_path.display()
            )));
        }
        if !config.has_overlays() {
            std::fs::copy(base_path, final_path)?;
            return Ok(());
        }

        let graph = Self::filter_graph(config, golfer_name);
        let mut command = Command::new(&self.program);
        command
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(base_path);
        if let Some(bug) = &config.logo_bug {
            command.arg("-i").arg(&bug.path);
        }
        command
            .arg("-filter_complex")
            .arg(&graph)
            .arg("-c:a")
            .arg("copy")
            .arg(final_path);

        debug!(graph = %graph, "Running overlay compositor");
        let output = command
            .output()
            .map_err(|e| ExportError::subprocess(format!("{}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(ExportError::subprocess(format!(
                "compositor exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!(output = %final_path.display(), "Overlay composite written");
        Ok(())
    }
}
