// SPDX-License-Identifier: GPL-3.0-only

//! Key/value settings store
//!
//! Settings are plain strings keyed by dotted names, persisted as one JSON
//! document under the user config directory. Typed accessors parse the keys
//! the engine consumes; unknown keys pass through untouched so external
//! surfaces can share the same file.

use crate::errors::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Setting keys consumed by the engine
pub mod keys {
    /// JSON array of transport-listener inputs
    pub const SRT_INPUTS: &str = "srt.inputs";
    /// Comma-separated still-image paths for synthetic sources
    pub const VIRTUAL_STILL_IMAGES: &str = "virtual.stillimages";
    /// Comma-separated solid colors (`#RRGGBB`) for synthetic sources
    pub const VIRTUAL_COLORS: &str = "virtual.colors";
    /// Auto-cut sensitivity preset name (High / Default / Low)
    pub const GOLF_SENSITIVITY: &str = "golf.sensitivity";
}

/// String get/set settings capability
pub trait SettingsProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> SettingsResult<()>;
}

/// One configured transport-listener input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrtInputConfig {
    pub name: String,
    pub port: u16,
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u32,
}

fn default_latency_ms() -> u32 {
    120
}

/// JSON-file-backed settings store
pub struct Settings {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, String>>,
}

impl Settings {
    /// Load from `path`, creating an empty store if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> SettingsResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(|e| SettingsError::Parse(e.to_string()))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = values.len(), "Settings loaded");
        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    /// Volatile store for tests and embedded use
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    /// Default settings location under the user config dir
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("swingcast")
            .join("settings.json")
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> SettingsResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(values)
            .map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Configured transport inputs, or empty when unset or unparseable
    pub fn srt_inputs(&self) -> Vec<SrtInputConfig> {
        let Some(raw) = self.get(keys::SRT_INPUTS) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed srt.inputs setting");
                Vec::new()
            }
        }
    }

    /// Configured synthetic solid colors as `#RRGGBB` strings
    pub fn virtual_colors(&self) -> Vec<String> {
        self.split_list(keys::VIRTUAL_COLORS)
    }

    /// Configured synthetic still-image paths
    pub fn virtual_still_images(&self) -> Vec<PathBuf> {
        self.split_list(keys::VIRTUAL_STILL_IMAGES)
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }

    /// Raw sensitivity preset name, if one is stored
    pub fn golf_sensitivity(&self) -> Option<String> {
        self.get(keys::GOLF_SENSITIVITY)
    }

    fn split_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl SettingsProvider for Settings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> SettingsResult<()> {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }
}

/// Helper mirroring the trait for `Settings` held directly
impl Settings {
    pub fn get(&self, key: &str) -> Option<String> {
        SettingsProvider::get(self, key)
    }

    pub fn set(&self, key: &str, value: &str) -> SettingsResult<()> {
        SettingsProvider::set(self, key, value)
    }
}

/// Parse a `#RRGGBB` color into (r, g, b)
pub fn parse_hex_color(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.trim().strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

/// Existing settings file if present, otherwise an in-memory store
pub fn load_or_default(path: Option<&Path>) -> Settings {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(Settings::default_path);
    match Settings::open(&path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Falling back to in-memory settings");
            Settings::in_memory()
        }
    }
}
