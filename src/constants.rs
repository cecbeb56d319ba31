// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use serde::{Deserialize, Serialize};

/// Recording quality presets
///
/// A preset names a bitrate tier; the actual target bitrate depends on the
/// recorded resolution. Preset contents are opaque to the recording core and
/// are passed through to the muxer invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordingPreset {
    /// Smaller files, reduced quality
    Low,
    /// Balanced quality and file size (default)
    #[default]
    Medium,
    /// Larger files, better quality
    High,
}

impl RecordingPreset {
    pub const ALL: [RecordingPreset; 3] = [
        RecordingPreset::Low,
        RecordingPreset::Medium,
        RecordingPreset::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            RecordingPreset::Low => "Low",
            RecordingPreset::Medium => "Medium",
            RecordingPreset::High => "High",
        }
    }

    /// Target bitrate in kbps for the given recording width
    ///
    /// Tiers:
    /// - SD (below 1280): Low=1, Medium=2, High=4 Mbps
    /// - HD (1280): Low=2.5, Medium=5, High=10 Mbps
    /// - Full HD (1920): Low=4, Medium=8, High=16 Mbps
    /// - 4K (3840 and above): Low=15, Medium=30, High=50 Mbps
    pub fn bitrate_kbps(&self, width: u32) -> u32 {
        match (resolution_tier(width), self) {
            (ResolutionTier::SD, RecordingPreset::Low) => 1_000,
            (ResolutionTier::SD, RecordingPreset::Medium) => 2_000,
            (ResolutionTier::SD, RecordingPreset::High) => 4_000,
            (ResolutionTier::HD, RecordingPreset::Low) => 2_500,
            (ResolutionTier::HD, RecordingPreset::Medium) => 5_000,
            (ResolutionTier::HD, RecordingPreset::High) => 10_000,
            (ResolutionTier::FullHD, RecordingPreset::Low) => 4_000,
            (ResolutionTier::FullHD, RecordingPreset::Medium) => 8_000,
            (ResolutionTier::FullHD, RecordingPreset::High) => 16_000,
            (ResolutionTier::FourK, RecordingPreset::Low) => 15_000,
            (ResolutionTier::FourK, RecordingPreset::Medium) => 30_000,
            (ResolutionTier::FourK, RecordingPreset::High) => 50_000,
        }
    }
}

impl std::fmt::Display for RecordingPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Resolution tiers for bitrate selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    SD,
    HD,
    FullHD,
    FourK,
}

/// Tier for a given frame width
pub fn resolution_tier(width: u32) -> ResolutionTier {
    match width {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Format a kbps value for display (e.g. "8 Mbps", "2.5 Mbps")
pub fn format_bitrate(kbps: u32) -> String {
    let mbps = kbps as f64 / 1000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Device discovery refresh period
    pub const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// Graceful-stop window for capture-side listener subprocesses
    pub const CAPTURE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

    /// Graceful-stop window for encode-side writers (muxer flush)
    pub const ENCODE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

    /// Recording progress event period
    pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

    /// Auto-cut periodic tick
    pub const AUTOCUT_TICK_INTERVAL: Duration = Duration::from_millis(100);

    /// Bounded wait inside producer select loops, so shutdown latency stays low
    pub const PRODUCER_IDLE_WAIT: Duration = Duration::from_millis(100);

    /// Frame counter modulo for periodic frame-path logging
    pub const FRAME_LOG_INTERVAL: u64 = 300;
}

/// Frame path sizing
pub mod frames {
    /// Slots retained per frame pool
    pub const POOL_CAPACITY: usize = 8;

    /// Queue depth for per-input recording rings
    pub const RECORD_RING_CAPACITY: usize = 16;

    /// Audio ring capacity (one second of 48 kHz stereo 16-bit)
    pub const AUDIO_RING_BYTES: usize = 48_000 * 2 * 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_tiers() {
        assert_eq!(resolution_tier(3840), ResolutionTier::FourK);
        assert_eq!(resolution_tier(1920), ResolutionTier::FullHD);
        assert_eq!(resolution_tier(1280), ResolutionTier::HD);
        assert_eq!(resolution_tier(640), ResolutionTier::SD);
    }

    #[test]
    fn test_bitrate_scales_with_preset() {
        assert_eq!(RecordingPreset::Medium.bitrate_kbps(1920), 8_000);
        assert!(
            RecordingPreset::High.bitrate_kbps(1920) > RecordingPreset::Low.bitrate_kbps(1920)
        );
    }

    #[test]
    fn test_format_bitrate() {
        assert_eq!(format_bitrate(8_000), "8 Mbps");
        assert_eq!(format_bitrate(2_500), "2.5 Mbps");
    }
}
