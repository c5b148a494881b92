//! Application configuration.
//!
//! Stored as TOML in the platform data directory; a missing file yields
//! defaults.

use crate::sensors::impact::{
    CrashDetector, DEFAULT_CRASH_THRESHOLD, DEFAULT_DEBOUNCE_MS, DEFAULT_HIGH_IMPACT_RATIO,
};
use crate::sensors::types::{LocationRequest, SensorConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Sensor settings
    pub sensors: SensorSettings,
    /// Recording settings
    pub recording: RecordingSettings,
    /// Crash detection settings
    pub crash: CrashSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            sensors: SensorSettings::default(),
            recording: RecordingSettings::default(),
            crash: CrashSettings::default(),
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// BLE scan window in seconds
    pub scan_timeout_secs: u64,
    /// Location update request
    pub location: LocationRequest,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            scan_timeout_secs: SensorConfig::default().scan_timeout_secs,
            location: LocationRequest::default(),
        }
    }
}

impl SensorSettings {
    /// BLE stream configuration.
    pub fn ble_config(&self) -> SensorConfig {
        SensorConfig {
            scan_timeout_secs: self.scan_timeout_secs,
        }
    }
}

/// Recording-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Live stats tick interval in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

impl RecordingSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Crash detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashSettings {
    /// Net force above which an impact is a crash, m/s²
    pub threshold: f64,
    /// Minimum time between crash events in milliseconds
    pub debounce_ms: i64,
    /// Fraction of the threshold that counts as a high impact
    pub high_impact_ratio: f64,
}

impl Default for CrashSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CRASH_THRESHOLD,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            high_impact_ratio: DEFAULT_HIGH_IMPACT_RATIO,
        }
    }
}

impl CrashSettings {
    pub fn detector(&self) -> CrashDetector {
        CrashDetector::new(self.threshold, self.debounce_ms, self.high_impact_ratio)
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridetrack", "RideTrack")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Get the ride database path.
pub fn get_database_path() -> PathBuf {
    get_data_dir().join("rides.db")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load configuration from `path`; a missing file yields defaults.
pub fn load_config_from(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save configuration to `path`.
pub fn save_config_to(config: &AppConfig, path: &std::path::Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
