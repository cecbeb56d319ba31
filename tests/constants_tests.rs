// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for recording presets

use swingcast::constants::{RecordingPreset, format_bitrate};

#[test]
fn test_preset_variants() {
    assert_eq!(RecordingPreset::ALL.len(), 3);
    for preset in RecordingPreset::ALL {
        assert!(!preset.display_name().is_empty());
    }
}

#[test]
fn test_preset_ordering_per_resolution() {
    for width in [640, 1280, 1920, 3840] {
        let mut previous = 0u32;
        for preset in RecordingPreset::ALL {
            let bitrate = preset.bitrate_kbps(width);
            assert!(bitrate > previous, "presets must be ordered at width {width}");
            previous = bitrate;
        }
    }
}

#[test]
fn test_bitrate_scales_with_resolution() {
    let hd = RecordingPreset::Medium.bitrate_kbps(1280);
    let full_hd = RecordingPreset::Medium.bitrate_kbps(1920);
    let four_k = RecordingPreset::Medium.bitrate_kbps(3840);
    assert!(hd < full_hd);
    assert!(full_hd < four_k);
}

#[test]
fn test_bitrate_formatting() {
    assert_eq!(format_bitrate(16_000), "16 Mbps");
    assert_eq!(format_bitrate(2_500), "2.5 Mbps");
}
