// SPDX-License-Identifier: GPL-3.0-only

//! Audio impact detector
//!
//! A club strike is a sharp broadband transient well above the ambient
//! level. Each sample block is mixed to mono RMS; blocks under the noise
//! floor only feed the baseline, and a spike fires when the RMS jumps past
//! the EMA-tracked ambient level. The spike check runs before the baseline
//! absorbs the block.

use super::config::AutoCutConfig;
use crate::devices::types::AudioSampleBlock;
use tracing::trace;

/// RMS-over-EMA transient detector
pub struct AudioImpactDetector {
    config: AutoCutConfig,
    ema: f64,
    ema_initialized: bool,
}

impl AudioImpactDetector {
    pub fn new(config: &AutoCutConfig) -> Self {
        Self {
            config: config.clone(),
            ema: 0.0,
            ema_initialized: false,
        }
    }

    pub fn reset(&mut self) {
        self.ema = 0.0;
        self.ema_initialized = false;
    }

    pub fn ema(&self) -> Option<f64> {
        self.ema_initialized.then_some(self.ema)
    }

    /// Analyse one sample block; true on an impact spike
    pub fn process(&mut self, block: &AudioSampleBlock) -> bool {
        let Some(rms) = block_rms(block) else {
            return false;
        };
        self.process_rms(rms)
    }

    /// Analyse a precomputed normalized RMS value
    pub fn process_rms(&mut self, rms: f64) -> bool {
        let db = 20.0 * rms.max(1e-10).log10();

        // Below the noise floor: keep the baseline warm, never spike
        let spike = if db < self.config.minimum_audio_threshold_db {
            false
        } else {
            self.ema_initialized && rms > self.ema * self.config.audio_spike_multiplier
        };

        if self.ema_initialized {
            self.ema =
                self.config.audio_ema_alpha * rms + (1.0 - self.config.audio_ema_alpha) * self.ema;
        } else {
            self.ema = rms;
            self.ema_initialized = true;
        }
        trace!(rms, db, ema = self.ema, spike, "Audio analysis");
        spike
    }
}

/// Mono RMS over an interleaved PCM block, normalized to [0, 1]
///
/// All channels contribute equally: sum of squares over every scalar sample
/// divided by the scalar count. Returns `None` for an empty or unsupported
/// block.
pub fn block_rms(block: &AudioSampleBlock) -> Option<f64> {
    let data = block.data();
    if data.is_empty() {
        return None;
    }
    let mut sum_squares = 0.0f64;
    let count;
    match block.bits_per_sample() {
        16 => {
            let samples = data.len() / 2;
            if samples == 0 {
                return None;
            }
            for chunk in data.chunks_exact(2) {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64 / 32768.0;
                sum_squares += sample * sample;
            }
            count = samples;
        }
        32 => {
            // Float PCM, as delivered by network-video sources
            let samples = data.len() / 4;
            if samples == 0 {
                return None;
            }
            for chunk in data.chunks_exact(4) {
                let sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64;
                sum_squares += sample * sample;
            }
            count = samples;
        }
        _ => return None,
    }
    Some((sum_squares / count as f64).sqrt())
}
