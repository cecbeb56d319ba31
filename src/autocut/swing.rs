// SPDX-License-Identifier: GPL-3.0-only

//! Video swing detector
//!
//! Watches the golfer camera for a motion spike inside the region where the
//! golfer stands. Each analysed frame's luma grid is compared against the
//! grid from `frame_compare_gap` cycles earlier; the mean difference is
//! checked against an EMA-tracked baseline before the baseline absorbs the
//! new sample, so the spike itself cannot inflate the threshold it is
//! measured against.

use super::config::AutoCutConfig;
use super::luma::{LumaGrid, sad_over_roi};
use crate::devices::types::VideoFrame;
use tracing::trace;

/// Motion-spike detector over a circular luma history
pub struct SwingDetector {
    config: AutoCutConfig,
    history: Vec<LumaGrid>,
    next_slot: usize,
    frames_stored: usize,
    ema: f64,
    ema_initialized: bool,
}

impl SwingDetector {
    pub fn new(config: &AutoCutConfig) -> Self {
        let depth = config.frame_compare_gap + 1;
        Self {
            config: config.clone(),
            history: (0..depth)
                .map(|_| LumaGrid::new(config.analysis_width, config.analysis_height))
                .collect(),
            next_slot: 0,
            frames_stored: 0,
            ema: 0.0,
            ema_initialized: false,
        }
    }

    /// Forget history and baseline (fresh session)
    pub fn reset(&mut self) {
        self.next_slot = 0;
        self.frames_stored = 0;
        self.ema = 0.0;
        self.ema_initialized = false;
    }

    pub fn ema(&self) -> Option<f64> {
        self.ema_initialized.then_some(self.ema)
    }

    /// Analyse one frame; true when a swing spike is present
    pub fn process(&mut self, frame: &VideoFrame) -> bool {
        let mode = frame.mode();
        self.history[self.next_slot].fill_from_uyvy(
            frame.data(),
            mode.width,
            mode.height,
            frame.row_stride(),
        );
        self.step()
    }

    /// Analyse a pre-extracted grid (tests, replays)
    pub fn process_grid(&mut self, grid: &LumaGrid) -> bool {
        self.history[self.next_slot] = grid.clone();
        self.step()
    }

    fn step(&mut self) -> bool {
        let depth = self.history.len();
        let current = self.next_slot;
        self.next_slot = (self.next_slot + 1) % depth;
        if self.frames_stored < depth {
            self.frames_stored += 1;
        }
        // Need the full gap before a comparison exists
        if self.frames_stored < depth {
            return false;
        }

        // With the slot just advanced, the oldest stored grid is exactly
        // frame_compare_gap cycles behind `current`
        let oldest = self.next_slot;
        let sad = sad_over_roi(&self.history[current], &self.history[oldest], &self.config.roi);

        let threshold = if self.ema_initialized {
            (self.ema * self.config.swing_spike_multiplier)
                .max(self.config.minimum_spike_threshold)
        } else {
            self.config.minimum_spike_threshold
        };
        let spike = sad > threshold;

        if self.ema_initialized {
            self.ema = self.config.ema_alpha * sad + (1.0 - self.config.ema_alpha) * self.ema;
        } else {
            self.ema = sad;
            self.ema_initialized = true;
        }
        trace!(sad, threshold, ema = self.ema, spike, "Swing analysis");
        spike
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::config::Roi;

    fn config() -> AutoCutConfig {
        AutoCutConfig {
            analysis_width: 8,
            analysis_height: 4,
            frame_compare_gap: 2,
            roi: Roi::FULL,
            ..Default::default()
        }
    }

    fn flat(value: u8) -> LumaGrid {
        LumaGrid::from_raw(8, 4, vec![value; 32]).unwrap()
    }

    #[test]
    fn test_no_swing_before_history_fills() {
        let mut detector = SwingDetector::new(&config());
        // gap + 1 = 3 frames needed; the first two can never fire
        assert!(!detector.process_grid(&flat(100)));
        assert!(!detector.process_grid(&flat(100)));
    }

    #[test]
    fn test_stable_scene_never_fires() {
        let mut detector = SwingDetector::new(&config());
        for _ in 0..50 {
            assert!(!detector.process_grid(&flat(100)));
        }
    }

    #[test]
    fn test_spike_fires_after_converged_baseline() {
        let mut detector = SwingDetector::new(&config());
        for _ in 0..30 {
            assert!(!detector.process_grid(&flat(100)));
        }
        // A full-scale jump against the gap-old frame: 155 x 32 px = 4960 SAD
        assert!(detector.process_grid(&flat(255)));
    }

    #[test]
    fn test_small_motion_stays_below_absolute_floor() {
        let mut detector = SwingDetector::new(&config());
        for _ in 0..10 {
            detector.process_grid(&flat(100));
        }
        // 10 levels over 32 px sums to 320, under the 500 SAD floor
        assert!(!detector.process_grid(&flat(110)));
    }

    #[test]
    fn test_reset_clears_baseline_and_history() {
        let mut detector = SwingDetector::new(&config());
        for _ in 0..10 {
            detector.process_grid(&flat(100));
        }
        assert!(detector.ema().is_some());

        detector.reset();
        assert!(detector.ema().is_none());
        // History must refill before any comparison
        assert!(!detector.process_grid(&flat(255)));
        assert!(!detector.process_grid(&flat(0)));
    }
}
