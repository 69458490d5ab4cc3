// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::streaming::StreamingConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Station identifier; used as the MQTT client id and topic segment
    pub station_id: String,

    /// Application version
    pub version: String,

    /// Data directory (record store root)
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Enable demo mode (simulated sensor)
    pub demo_mode: bool,

    /// Sampling configuration
    pub sampling: SamplingConfig,

    /// Detector configuration
    pub detector: DetectorConfig,

    /// Calibration configuration
    pub calibration: CalibrationConfig,

    /// Streaming configuration
    pub streaming: StreamingConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Telemetry configuration
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            station_id: "seismograph".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            demo_mode: true,
            sampling: SamplingConfig::default(),
            detector: DetectorConfig::default(),
            calibration: CalibrationConfig::default(),
            streaming: StreamingConfig::default(),
            storage: StorageConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            // Create parent directories
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("quakewatch"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Sample rate in Hz
    pub rate_hz: u32,
}

impl SamplingConfig {
    /// Sampling period derived from the configured rate.
    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.rate_hz.max(1) as f64)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { rate_hz: 500 }
    }
}

/// Detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Short-term average window in samples (0.05 s at 500 Hz)
    pub sta_window: usize,

    /// Long-term average window in samples (5 s at 500 Hz)
    pub lta_window: usize,

    /// STA/LTA trigger ratio
    pub sta_lta_ratio: f64,

    /// Micro event threshold base in g
    pub threshold_micro: f64,

    /// Light event threshold base in g
    pub threshold_light: f64,

    /// Strong event threshold base in g
    pub threshold_strong: f64,

    /// Minimum event duration in milliseconds
    pub min_event_duration_ms: u64,

    /// Enable noise-adaptive thresholds
    pub adaptive_thresholds: bool,

    /// Adaptive threshold update interval in milliseconds
    pub adaptive_update_interval_ms: u64,

    /// Local magnitude calibration offset
    pub local_magnitude_offset: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sta_window: 25,
            lta_window: 2500,
            sta_lta_ratio: 2.5,
            threshold_micro: 0.001,
            threshold_light: 0.005,
            threshold_strong: 0.02,
            min_event_duration_ms: 100,
            adaptive_thresholds: true,
            adaptive_update_interval_ms: 30_000,
            local_magnitude_offset: 0.0,
        }
    }
}

/// Calibration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Samples collected for the stability check
    pub stability_samples: usize,

    /// Interval between stability samples in milliseconds (~50 Hz)
    pub stability_interval_ms: u64,

    /// Samples collected for offset acquisition
    pub acquisition_samples: usize,

    /// Interval between acquisition samples in milliseconds (~100 Hz)
    pub acquisition_interval_ms: u64,

    /// Maximum allowed per-axis standard deviation during stability check, in g
    pub max_stddev_g: f64,

    /// Maximum reasonable X/Y axis offset in g
    pub max_xy_offset_g: f64,

    /// Minimum Z-axis raw value in g (gravity band)
    pub min_z_g: f64,

    /// Maximum Z-axis raw value in g (gravity band)
    pub max_z_g: f64,

    /// Offset delta against the previous calibration that raises a drift warning, in g
    pub max_offset_drift_g: f64,

    /// Maximum acceptable post-calibration test magnitude in g
    pub max_test_magnitude_g: f64,

    /// Baseline drift check interval in seconds
    pub drift_check_interval_secs: u64,

    /// Baseline drift warning threshold in percent
    pub warning_drift_percent: f64,

    /// Baseline drift critical threshold in percent
    pub critical_drift_percent: f64,

    /// Calibration age that triggers an informational notice, in hours
    pub max_age_hours: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            stability_samples: 50,
            stability_interval_ms: 20,
            acquisition_samples: 200,
            acquisition_interval_ms: 10,
            max_stddev_g: 0.01,
            max_xy_offset_g: 0.5,
            min_z_g: 0.8,
            max_z_g: 1.5,
            max_offset_drift_g: 0.1,
            max_test_magnitude_g: 0.1,
            drift_check_interval_secs: 300,
            warning_drift_percent: 20.0,
            critical_drift_percent: 50.0,
            max_age_hours: 24.0,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Enable persistence
    pub enabled: bool,

    /// Retention period in days
    pub retention_days: u32,

    /// Minimum interval between persisted sample summaries in milliseconds
    pub sample_log_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 90,
            sample_log_interval_ms: 1000,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Health snapshot interval in seconds
    pub health_interval_secs: u64,

    /// Sampler watchdog timeout in seconds
    pub watchdog_timeout_secs: u64,

    /// Wall-clock sync interval in seconds
    pub sync_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 5,
            watchdog_timeout_secs: 30,
            sync_interval_secs: 3600,
        }
    }
}
