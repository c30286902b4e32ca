use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LooperSettings {
    pub host_name: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub buffer_size: Option<u32>,
    /// Serial device carrying control frames; stdin/stdout when unset.
    pub control_device: Option<PathBuf>,
    pub max_track_seconds: u32,
    pub memory_budget_mb: Option<u64>,
    pub input_latency_compensation_ms: f32,
    pub poll_timeout_ms: u64,
}

impl Default for LooperSettings {
    fn default() -> Self {
        Self {
            host_name: None,
            input_device: None,
            output_device: None,
            sample_rate: None,
            buffer_size: None,
            control_device: None,
            max_track_seconds: 60,
            memory_budget_mb: None,
            input_latency_compensation_ms: 5.0, // Default to 5ms safety buffer
            poll_timeout_ms: 1000,
        }
    }
}

impl LooperSettings {
    pub fn memory_budget_bytes(&self) -> Option<u64> {
        self.memory_budget_mb.map(|mb| mb * 1024 * 1024)
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "looper", "looper")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Where settings are read from: an explicit path, else the platform config dir.
pub fn settings_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => get_config_dir().map(|dir| dir.join(SETTINGS_FILE)),
    }
}

pub fn save_settings(settings: &LooperSettings, path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let json_string = serde_json::to_string_pretty(settings)?;
    fs::write(path, json_string)?;
    Ok(())
}

pub fn load_settings(path: Option<&Path>) -> LooperSettings {
    let Some(path) = path else {
        log::warn!("Could not determine config directory, using default settings.");
        return LooperSettings::default();
    };
    if !path.exists() {
        log::info!("No settings at {}, using defaults.", path.display());
        return LooperSettings::default();
    }
    match fs::read_to_string(path) {
        Ok(json_string) => parse_settings(&json_string).unwrap_or_else(|e| {
            log::warn!("Failed to parse settings file, using defaults. Error: {}", e);
            LooperSettings::default()
        }),
        Err(e) => {
            log::warn!("Failed to read settings file, using defaults. Error: {}", e);
            LooperSettings::default()
        }
    }
}

fn parse_settings(json: &str) -> Result<LooperSettings, serde_json::Error> {
    serde_json::from_str(json)
}
