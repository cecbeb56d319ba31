// SPDX-License-Identifier: GPL-3.0-only

//! Auto-cut tunables

use serde::{Deserialize, Serialize};

/// Normalized region of interest within the analysis grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Roi {
    /// Full-frame region
    pub const FULL: Roi = Roi {
        left: 0.0,
        top: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.left)
            && (0.0..=1.0).contains(&self.top)
            && self.width >= 0.0
            && self.height >= 0.0
            && self.left + self.width <= 1.0 + f32::EPSILON
            && self.top + self.height <= 1.0 + f32::EPSILON
    }
}

/// All auto-cut tunables
///
/// Defaults are the production values; sensitivity presets override the
/// detection thresholds only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCutConfig {
    // Analysis grid
    pub analysis_width: u32,
    pub analysis_height: u32,
    /// Analyse every Nth delivered frame
    pub frame_skip: u32,
    /// Compare against the luma grid this many analysis cycles back
    pub frame_compare_gap: usize,

    // Video swing detector
    pub ema_alpha: f64,
    pub swing_spike_multiplier: f64,
    pub minimum_spike_threshold: f64,
    pub roi: Roi,

    // Reset detector
    pub idle_similarity_threshold: f64,
    pub consecutive_idle_frames_required: u32,
    pub static_scene_threshold: f64,

    // Audio impact detector
    pub audio_enabled: bool,
    pub audio_ema_alpha: f64,
    pub audio_spike_multiplier: f64,
    pub minimum_audio_threshold_db: f64,
    pub audio_only_mode: bool,
    pub audio_video_fusion_window_ms: i64,

    // Timing
    pub max_simulator_duration_seconds: f64,
    pub practice_swing_timeout_seconds: f64,
    pub post_landing_delay_seconds: f64,
    pub cooldown_duration_seconds: f64,
}

impl Default for AutoCutConfig {
    fn default() -> Self {
        Self {
            analysis_width: 120,
            analysis_height: 68,
            frame_skip: 4,
            frame_compare_gap: 2,

            ema_alpha: 0.05,
            swing_spike_multiplier: 4.0,
            minimum_spike_threshold: 500.0,
            roi: Roi {
                left: 0.2,
                top: 0.1,
                width: 0.6,
                height: 0.8,
            },

            idle_similarity_threshold: 0.95,
            consecutive_idle_frames_required: 3,
            static_scene_threshold: 200.0,

            audio_enabled: false,
            audio_ema_alpha: 0.05,
            audio_spike_multiplier: 4.0,
            minimum_audio_threshold_db: -40.0,
            audio_only_mode: false,
            audio_video_fusion_window_ms: 200,

            max_simulator_duration_seconds: 30.0,
            practice_swing_timeout_seconds: 3.0,
            post_landing_delay_seconds: 1.5,
            cooldown_duration_seconds: 2.0,
        }
    }
}

impl AutoCutConfig {
    /// Reject configs that would make the detectors misbehave
    pub fn validate(&self) -> Result<(), String> {
        if self.analysis_width == 0 || self.analysis_height == 0 {
            return Err("analysis grid must be nonzero".to_string());
        }
        if self.frame_skip == 0 {
            return Err("frame_skip must be at least 1".to_string());
        }
        if self.frame_compare_gap == 0 {
            return Err("frame_compare_gap must be at least 1".to_string());
        }
        if !self.roi.is_valid() {
            return Err("roi must lie within [0,1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.ema_alpha) || !(0.0..=1.0).contains(&self.audio_ema_alpha) {
            return Err("ema alpha must lie within [0,1]".to_string());
        }
        if self.swing_spike_multiplier <= 0.0 || self.minimum_spike_threshold < 0.0 {
            return Err("swing thresholds must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.idle_similarity_threshold) {
            return Err("idle similarity must lie within [0,1]".to_string());
        }
        Ok(())
    }
}

/// Detection sensitivity presets over the default config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensitivityPreset {
    /// Trip on smaller spikes, settle faster
    High,
    #[default]
    Default,
    /// Demand bigger spikes and longer idle confirmation
    Low,
}

impl SensitivityPreset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "high" => Some(SensitivityPreset::High),
            "default" | "" => Some(SensitivityPreset::Default),
            "low" => Some(SensitivityPreset::Low),
            _ => None,
        }
    }

    /// Apply this preset's overrides to a config
    pub fn apply(&self, config: &mut AutoCutConfig) {
        match self {
            SensitivityPreset::Default => {}
            SensitivityPreset::High => {
                config.swing_spike_multiplier = 3.0;
                config.minimum_spike_threshold = 350.0;
                config.audio_spike_multiplier = 3.0;
                config.consecutive_idle_frames_required = 2;
            }
            SensitivityPreset::Low => {
                config.swing_spike_multiplier = 5.5;
                config.minimum_spike_threshold = 800.0;
                config.audio_spike_multiplier = 5.5;
                config.consecutive_idle_frames_required = 5;
            }
        }
    }

    pub fn config(&self) -> AutoCutConfig {
        let mut config = AutoCutConfig::default();
        self.apply(&mut config);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AutoCutConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_roi_rejected() {
        let mut config = AutoCutConfig::default();
        config.roi.left = 0.8;
        config.roi.width = 0.6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_frame_skip_rejected() {
        let config = AutoCutConfig {
            frame_skip: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_presets_order_thresholds() {
        let high = SensitivityPreset::High.config();
        let default = SensitivityPreset::Default.config();
        let low = SensitivityPreset::Low.config();
        assert!(high.minimum_spike_threshold < default.minimum_spike_threshold);
        assert!(default.minimum_spike_threshold < low.minimum_spike_threshold);
        // Timing knobs are untouched by presets
        assert_eq!(
            high.cooldown_duration_seconds,
            low.cooldown_duration_seconds
        );
    }

    #[test]
    fn test_preset_from_name() {
        assert_eq!(
            SensitivityPreset::from_name("high"),
            Some(SensitivityPreset::High)
        );
        assert_eq!(
            SensitivityPreset::from_name("Default"),
            Some(SensitivityPreset::Default)
        );
        assert_eq!(SensitivityPreset::from_name("nope"), None);
    }
}
