// SPDX-License-Identifier: GPL-3.0-only

//! Downsampled luma analysis
//!
//! Detectors work on a small luma grid pulled straight out of the packed
//! UYVY frame with nearest-neighbor sampling, so a 1080p frame costs a
//! 120x68 walk rather than a full conversion.

use super::config::Roi;
use crate::devices::types::VideoFrame;

/// A downsampled single-channel luma image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaGrid {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl LumaGrid {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Build a grid directly from raw grid bytes (tests, calibration dumps)
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != (width * height) as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Fill from a packed UYVY frame, nearest-neighbor
    ///
    /// In UYVY a pixel's Y byte sits at `(col/2)*4 + 1` for even columns and
    /// `(col/2)*4 + 3` for odd ones. Out-of-range source reads clamp to the
    /// frame edges, so any `dst <= src` downsample stays in bounds.
    pub fn fill_from_uyvy(
        &mut self,
        frame_data: &[u8],
        src_width: u32,
        src_height: u32,
        src_stride: u32,
    ) {
        if src_width == 0 || src_height == 0 {
            self.data.fill(0);
            return;
        }
        for dy in 0..self.height {
            let src_row = ((dy as u64 * src_height as u64) / self.height as u64)
                .min(src_height as u64 - 1) as usize;
            let row_base = src_row * src_stride as usize;
            for dx in 0..self.width {
                let src_col = ((dx as u64 * src_width as u64) / self.width as u64)
                    .min(src_width as u64 - 1) as usize;
                let y_offset = (src_col / 2) * 4 + if src_col % 2 == 0 { 1 } else { 3 };
                let index = row_base + y_offset;
                let value = frame_data.get(index).copied().unwrap_or(0);
                self.data[(dy * self.width + dx) as usize] = value;
            }
        }
    }

    /// Convenience wrapper over a delivered frame
    pub fn extract(frame: &VideoFrame, width: u32, height: u32) -> LumaGrid {
        let mut grid = LumaGrid::new(width, height);
        let mode = frame.mode();
        grid.fill_from_uyvy(frame.data(), mode.width, mode.height, frame.row_stride());
        grid
    }
}

/// Summed absolute luma difference inside a normalized region
///
/// The region is mapped to its integer pixel span on the grid; an empty span
/// yields 0. The detection thresholds are calibrated against this sum at the
/// default 120x68 grid.
pub fn sad_over_roi(a: &LumaGrid, b: &LumaGrid, roi: &Roi) -> f64 {
    debug_assert_eq!((a.width, a.height), (b.width, b.height));
    let x0 = (roi.left * a.width as f32) as u32;
    let y0 = (roi.top * a.height as f32) as u32;
    let x1 = ((roi.left + roi.width) * a.width as f32) as u32;
    let y1 = ((roi.top + roi.height) * a.height as f32) as u32;
    let x1 = x1.min(a.width);
    let y1 = y1.min(a.height);
    if x0 >= x1 || y0 >= y1 {
        return 0.0;
    }

    let mut sum = 0u64;
    for y in y0..y1 {
        let row = (y * a.width) as usize;
        for x in x0..x1 {
            let idx = row + x as usize;
            sum += (a.data[idx] as i32 - b.data[idx] as i32).unsigned_abs() as u64;
        }
    }
    sum as f64
}

/// Per-pixel mean absolute difference over the whole grid
pub fn mean_abs_diff(a: &LumaGrid, b: &LumaGrid) -> f64 {
    let count = (a.width * a.height) as f64;
    if count == 0.0 {
        return 0.0;
    }
    sad_over_roi(a, b, &Roi::FULL) / count
}

/// `1 - avg(|A - B|) / 255` over the full grid
pub fn similarity(a: &LumaGrid, b: &LumaGrid) -> f64 {
    1.0 - mean_abs_diff(a, b) / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pack one UYVY row per luma row, chroma neutral
    fn uyvy_frame(luma: &[&[u8]]) -> (Vec<u8>, u32, u32) {
        let height = luma.len() as u32;
        let width = luma[0].len() as u32;
        assert!(width % 2 == 0);
        let mut data = Vec::with_capacity((width * height * 2) as usize);
        for row in luma {
            for pair in row.chunks(2) {
                data.extend_from_slice(&[128, pair[0], 128, pair[1]]);
            }
        }
        (data, width, height)
    }

    #[test]
    fn test_extract_identity_resolution() {
        let (data, w, h) = uyvy_frame(&[&[10, 20, 30, 40], &[50, 60, 70, 80]]);
        let mut grid = LumaGrid::new(w, h);
        grid.fill_from_uyvy(&data, w, h, w * 2);
        assert_eq!(grid.data(), &[10, 20, 30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn test_extract_downsamples_nearest() {
        let (data, w, h) = uyvy_frame(&[&[10, 20, 30, 40], &[50, 60, 70, 80]]);
        let mut grid = LumaGrid::new(2, 1);
        grid.fill_from_uyvy(&data, w, h, w * 2);
        // dst col 0 -> src col 0, dst col 1 -> src col 2; dst row 0 -> src row 0
        assert_eq!(grid.data(), &[10, 30]);
    }

    #[test]
    fn test_extract_never_reads_out_of_bounds() {
        // Tightly packed frame; a panic here would be an out-of-range index
        let (data, w, h) = uyvy_frame(&[&[1, 2], &[3, 4]]);
        let mut grid = LumaGrid::new(2, 2);
        grid.fill_from_uyvy(&data, w, h, w * 2);
        assert_eq!(grid.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_short_buffer_clamps_to_zero() {
        let mut grid = LumaGrid::new(4, 4);
        grid.fill_from_uyvy(&[255, 255], 1920, 1080, 3840);
        // Reads past the tiny buffer come back as 0, not a panic
        assert!(grid.data().iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn test_sad_over_full_roi() {
        let a = LumaGrid::from_raw(2, 2, vec![10, 10, 10, 10]).unwrap();
        let b = LumaGrid::from_raw(2, 2, vec![10, 20, 10, 20]).unwrap();
        assert_eq!(sad_over_roi(&a, &b, &Roi::FULL), 20.0);
    }

    #[test]
    fn test_sad_respects_roi() {
        // Differences only in the right half
        let a = LumaGrid::from_raw(4, 1, vec![0, 0, 100, 100]).unwrap();
        let b = LumaGrid::from_raw(4, 1, vec![0, 0, 0, 0]).unwrap();
        let left_half = Roi {
            left: 0.0,
            top: 0.0,
            width: 0.5,
            height: 1.0,
        };
        assert_eq!(sad_over_roi(&a, &b, &left_half), 0.0);
        assert_eq!(sad_over_roi(&a, &b, &Roi::FULL), 200.0);
    }

    #[test]
    fn test_empty_roi_is_zero() {
        let a = LumaGrid::from_raw(4, 4, vec![9; 16]).unwrap();
        let b = LumaGrid::from_raw(4, 4, vec![0; 16]).unwrap();
        let empty = Roi {
            left: 0.5,
            top: 0.5,
            width: 0.0,
            height: 0.0,
        };
        assert_eq!(sad_over_roi(&a, &b, &empty), 0.0);
    }

    #[test]
    fn test_similarity_bounds() {
        let a = LumaGrid::from_raw(2, 1, vec![0, 0]).unwrap();
        let same = LumaGrid::from_raw(2, 1, vec![0, 0]).unwrap();
        let opposite = LumaGrid::from_raw(2, 1, vec![255, 255]).unwrap();
        assert_eq!(similarity(&a, &same), 1.0);
        assert_eq!(similarity(&a, &opposite), 0.0);
    }
}
