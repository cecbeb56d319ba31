// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the settings store

use swingcast::config::{Settings, keys};

#[test]
fn test_settings_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    {
        let settings = Settings::open(&path).unwrap();
        settings
            .set(keys::SRT_INPUTS, r#"[{"name":"Sim","port":9001}]"#)
            .unwrap();
        settings.set(keys::GOLF_SENSITIVITY, "Low").unwrap();
    }

    let settings = Settings::open(&path).unwrap();
    assert_eq!(settings.srt_inputs().len(), 1);
    assert_eq!(settings.golf_sensitivity(), Some("Low".to_string()));
}

#[test]
fn test_unknown_keys_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    {
        let settings = Settings::open(&path).unwrap();
        settings.set("ui.theme", "dark").unwrap();
    }
    let settings = Settings::open(&path).unwrap();
    assert_eq!(settings.get("ui.theme"), Some("dark".to_string()));
}

#[test]
fn test_missing_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::open(dir.path().join("absent.json")).unwrap();
    assert!(settings.srt_inputs().is_empty());
    assert!(settings.virtual_colors().is_empty());
    assert!(settings.virtual_still_images().is_empty());
}
