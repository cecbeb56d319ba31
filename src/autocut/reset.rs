// SPDX-License-Identifier: GPL-3.0-only

//! Simulator reset detector
//!
//! The simulator returns to a quiescent screen once the shot has landed.
//! A frame counts as idle-like when it matches the calibrated idle reference
//! closely enough AND the scene has stopped moving; a run of idle-like
//! frames confirms the reset. Without calibration the detector never fires.

use super::config::AutoCutConfig;
use super::luma::{LumaGrid, sad_over_roi, similarity};
use crate::devices::types::{PixelFormat, VideoFrame};
use crate::autocut::config::Roi;
use tracing::trace;

/// Calibrated idle-reference detector
pub struct ResetDetector {
    config: AutoCutConfig,
    reference: Option<LumaGrid>,
    previous: Option<LumaGrid>,
    consecutive_idle: u32,
}

impl ResetDetector {
    pub fn new(config: &AutoCutConfig) -> Self {
        Self {
            config: config.clone(),
            reference: None,
            previous: None,
            consecutive_idle: 0,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.reference.is_some()
    }

    /// Store the idle reference from a confirmed-quiet simulator frame
    ///
    /// An unusable frame leaves the detector uncalibrated.
    pub fn calibrate(&mut self, frame: &VideoFrame) -> Result<(), String> {
        let mode = frame.mode();
        if mode.pixel_format != PixelFormat::Uyvy {
            return Err(format!("idle reference must be UYVY, got {}", mode.pixel_format));
        }
        if frame.data().len() < mode.frame_bytes() {
            return Err("idle reference frame is truncated".to_string());
        }
        let grid = LumaGrid::extract(
            frame,
            self.config.analysis_width,
            self.config.analysis_height,
        );
        self.calibrate_grid(grid);
        Ok(())
    }

    /// Calibrate from a pre-extracted grid (tests, stored references)
    pub fn calibrate_grid(&mut self, grid: LumaGrid) {
        self.previous = Some(grid.clone());
        self.reference = Some(grid);
        self.consecutive_idle = 0;
    }

    /// Restart the idle run without dropping the calibration
    pub fn reset_counter(&mut self) {
        self.consecutive_idle = 0;
        self.previous = self.reference.clone();
    }

    /// Drop calibration entirely
    pub fn reset(&mut self) {
        self.reference = None;
        self.previous = None;
        self.consecutive_idle = 0;
    }

    /// Analyse one simulator frame; true when the reset is confirmed
    pub fn process(&mut self, frame: &VideoFrame) -> bool {
        if self.reference.is_none() {
            return false;
        }
        let grid = LumaGrid::extract(
            frame,
            self.config.analysis_width,
            self.config.analysis_height,
        );
        self.process_grid(grid)
    }

    /// Analyse a pre-extracted grid
    pub fn process_grid(&mut self, grid: LumaGrid) -> bool {
        let Some(reference) = &self.reference else {
            return false;
        };

        let sim = similarity(&grid, reference);
        let inter_sad = match &self.previous {
            Some(previous) => sad_over_roi(&grid, previous, &Roi::FULL),
            None => f64::INFINITY,
        };
        let idle_like = sim >= self.config.idle_similarity_threshold
            && inter_sad < self.config.static_scene_threshold;

        if idle_like {
            self.consecutive_idle += 1;
        } else {
            self.consecutive_idle = 0;
        }
        self.previous = Some(grid);

        trace!(
            similarity = sim,
            inter_sad,
            run = self.consecutive_idle,
            "Reset analysis"
        );
        // Fire exactly once per idle run
        self.consecutive_idle == self.config.consecutive_idle_frames_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AutoCutConfig {
        AutoCutConfig {
            analysis_width: 8,
            analysis_height: 4,
            consecutive_idle_frames_required: 3,
            ..Default::default()
        }
    }

    fn flat(value: u8) -> LumaGrid {
        LumaGrid::from_raw(8, 4, vec![value; 32]).unwrap()
    }

    #[test]
    fn test_uncalibrated_never_fires() {
        let mut detector = ResetDetector::new(&config());
        for _ in 0..20 {
            assert!(!detector.process_grid(flat(100)));
        }
    }

    #[test]
    fn test_reset_after_consecutive_idle_frames() {
        let mut detector = ResetDetector::new(&config());
        detector.calibrate_grid(flat(100));

        assert!(!detector.process_grid(flat(100)));
        assert!(!detector.process_grid(flat(100)));
        // Third consecutive idle frame confirms
        assert!(detector.process_grid(flat(100)));
        // And the confirmation is single-shot
        assert!(!detector.process_grid(flat(100)));
    }

    #[test]
    fn test_motion_restarts_the_run() {
        let mut detector = ResetDetector::new(&config());
        detector.calibrate_grid(flat(100));

        assert!(!detector.process_grid(flat(100)));
        assert!(!detector.process_grid(flat(100)));
        // Shot still in flight: big inter-frame change, far from reference
        assert!(!detector.process_grid(flat(250)));
        // Back at the reference, but the first frame still carries the
        // inter-frame jump, so the idle run restarts after it
        assert!(!detector.process_grid(flat(100)));
        assert!(!detector.process_grid(flat(100)));
        assert!(!detector.process_grid(flat(100)));
        assert!(detector.process_grid(flat(100)));
    }

    #[test]
    fn test_similar_but_moving_is_not_idle() {
        let mut detector = ResetDetector::new(&config());
        let mut noisy = config();
        noisy.static_scene_threshold = 50.0;
        let mut detector_strict = ResetDetector::new(&noisy);
        detector.calibrate_grid(flat(100));
        detector_strict.calibrate_grid(flat(100));

        // 3 luma levels of flicker: similar to reference (sim ~0.988) but
        // the inter-frame sum (3 x 32 = 96) exceeds the strict floor
        for value in [100u8, 103, 100, 103, 100, 103] {
            assert!(!detector_strict.process_grid(flat(value)));
        }
    }

    #[test]
    fn test_reset_counter_keeps_calibration() {
        let mut detector = ResetDetector::new(&config());
        detector.calibrate_grid(flat(100));
        detector.process_grid(flat(100));
        detector.reset_counter();
        assert!(detector.is_calibrated());

        assert!(!detector.process_grid(flat(100)));
        assert!(!detector.process_grid(flat(100)));
        assert!(detector.process_grid(flat(100)));
    }
}
