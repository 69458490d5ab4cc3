// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Persistent record store: per-day JSON-lines files with retention.
//!
//! Layout under the data root:
//!
//! ```text
//! seismic/<wall_day>.json   full seismic records, one per line
//! events/<boot_day>.json    flat legacy events
//! system/<boot_day>.json    system events
//! data/<boot_day>.json      rolling sample summaries
//! ```
//!
//! Seismic files are keyed by validated wall-clock day (`ts_wall / 86400`);
//! the other streams key on boot-relative days so they keep working before
//! the first time sync.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::record::{SampleSummary, SeismicRecord, SystemEvent};

const SEISMIC_DIR: &str = "seismic";
const EVENTS_DIR: &str = "events";
const SYSTEM_DIR: &str = "system";
const DATA_DIR: &str = "data";

/// Cleanup runs at most once per hour.
const CLEANUP_INTERVAL_MS: u64 = 3_600_000;

/// Event classes whose flat legacy lines require a trusted wall clock.
const SEISMIC_CLASSES: [&str; 6] = ["Micro", "Minor", "Light", "Moderate", "Strong", "Major"];

#[derive(Serialize)]
struct FlatEventLine<'a> {
    timestamp: u64,
    #[serde(rename = "type")]
    kind: &'a str,
    description: &'a str,
    magnitude: f64,
    ntp_valid: bool,
}

#[derive(Serialize)]
struct SystemEventLine<'a> {
    timestamp: u64,
    ntp_valid: bool,
    #[serde(rename = "type")]
    kind: &'a str,
    description: &'a str,
    value: f64,
}

/// Aggregate statistics over stored seismic records.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SeismicStatistics {
    /// Record count per event class
    pub by_type: BTreeMap<String, u64>,
    /// Minimum Richter magnitude seen
    pub min_richter: Option<f64>,
    /// Maximum Richter magnitude seen
    pub max_richter: Option<f64>,
    /// Mean Richter magnitude
    pub avg_richter: Option<f64>,
}

/// Query result for recent seismic records.
#[derive(Debug, Clone, Serialize)]
pub struct SeismicReport {
    /// Most recent records, newest file first
    pub events: Vec<serde_json::Value>,
    /// Number of records returned
    pub total_count: usize,
    /// Aggregate statistics over the returned records
    pub statistics: SeismicStatistics,
}

/// Storage usage summary.
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    /// Files currently stored
    pub file_count: usize,
    /// Total bytes across all record files
    pub total_bytes: u64,
}

/// Append-only JSON-lines record store.
pub struct DataLogger {
    root: PathBuf,
    retention_days: u32,
    last_cleanup_mono: u64,
}

impl DataLogger {
    /// Open (and create) the store under `root`.
    pub fn open(root: &Path, retention_days: u32) -> Result<Self> {
        for dir in [SEISMIC_DIR, EVENTS_DIR, SYSTEM_DIR, DATA_DIR] {
            fs::create_dir_all(root.join(dir))
                .with_context(|| format!("creating {} directory", dir))?;
        }
        info!("Record store opened at {:?}", root);
        Ok(Self {
            root: root.to_path_buf(),
            retention_days,
            last_cleanup_mono: 0,
        })
    }

    fn append_line(&self, dir: &str, day: u64, line: &str) -> Result<()> {
        let path = self.root.join(dir).join(format!("{}.json", day));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {:?}", path))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Append a full seismic record. Records without a validated wall
    /// clock never reach disk; the assembler drops them first and this is
    /// the last line of defense.
    pub fn append_seismic(&self, record: &SeismicRecord) -> Result<()> {
        if !record.detection.ntp_validated {
            bail!("refusing to persist seismic record without validated wall clock");
        }
        let day = record.detection.ts_wall / 86_400;
        self.append_line(SEISMIC_DIR, day, &serde_json::to_string(record)?)
    }

    /// Append a flat legacy event line. Seismic classes are gated on a
    /// trusted wall clock; returns whether the line was written.
    pub fn log_event(
        &self,
        clock: &dyn Clock,
        kind: &str,
        description: &str,
        magnitude: f64,
    ) -> Result<bool> {
        let trusted = clock.trusted();
        if SEISMIC_CLASSES.contains(&kind) && !trusted {
            warn!(
                "rejecting seismic event line without trusted time: {} ({:.4} g)",
                kind, magnitude
            );
            self.log_system_event(
                clock,
                &SystemEvent::new(
                    "EVENT_REJECTED",
                    format!("seismic event rejected, wall clock untrusted: {}", kind),
                    magnitude,
                ),
            )?;
            return Ok(false);
        }

        let line = FlatEventLine {
            timestamp: if trusted { clock.now_wall() } else { clock.now_mono() / 1000 },
            kind,
            description,
            magnitude,
            ntp_valid: trusted,
        };
        let day = clock.now_mono() / 86_400_000;
        self.append_line(EVENTS_DIR, day, &serde_json::to_string(&line)?)?;
        Ok(true)
    }

    /// Append a system event line. System events are always written; the
    /// timestamp falls back to monotonic seconds when the wall clock is
    /// untrusted.
    pub fn log_system_event(&self, clock: &dyn Clock, event: &SystemEvent) -> Result<()> {
        let trusted = clock.trusted();
        let line = SystemEventLine {
            timestamp: if trusted { clock.now_wall() } else { clock.now_mono() / 1000 },
            ntp_valid: trusted,
            kind: &event.kind,
            description: &event.description,
            value: event.value,
        };
        let day = clock.now_mono() / 86_400_000;
        self.append_line(SYSTEM_DIR, day, &serde_json::to_string(&line)?)
    }

    /// Append a rolling sample summary line.
    pub fn log_sample_summary(&self, summary: &SampleSummary) -> Result<()> {
        let day = summary.ts_mono / 86_400_000;
        self.append_line(DATA_DIR, day, &serde_json::to_string(summary)?)
    }

    fn day_files(&self, dir: &str) -> Result<Vec<(u64, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(self.root.join(dir))? {
            let entry = entry?;
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(day) = stem.parse::<u64>() {
                files.push((day, path));
            }
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(files)
    }

    /// Read back the most recent seismic records with aggregate statistics.
    pub fn recent_seismic(&self, max: usize) -> Result<SeismicReport> {
        let mut events = Vec::new();
        let mut stats = SeismicStatistics::default();
        let mut richter_sum = 0.0;
        let mut richter_count = 0u64;

        'outer: for (_, path) in self.day_files(SEISMIC_DIR)? {
            let content = fs::read_to_string(&path)?;
            for line in content.lines() {
                if events.len() >= max {
                    break 'outer;
                }
                let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                    warn!("skipping unparseable record line in {:?}", path);
                    continue;
                };
                if let Some(class) = value["classification"]["type"].as_str() {
                    *stats.by_type.entry(class.to_string()).or_insert(0) += 1;
                }
                if let Some(richter) = value["measurements"]["richter"].as_f64() {
                    stats.min_richter =
                        Some(stats.min_richter.map_or(richter, |m: f64| m.min(richter)));
                    stats.max_richter =
                        Some(stats.max_richter.map_or(richter, |m: f64| m.max(richter)));
                    richter_sum += richter;
                    richter_count += 1;
                }
                events.push(value);
            }
        }
        if richter_count > 0 {
            stats.avg_richter = Some(richter_sum / richter_count as f64);
        }
        Ok(SeismicReport {
            total_count: events.len(),
            events,
            statistics: stats,
        })
    }

    /// Read back the most recent flat event lines.
    pub fn recent_events(&self, max: usize) -> Result<Vec<serde_json::Value>> {
        let mut events = Vec::new();
        'outer: for (_, path) in self.day_files(EVENTS_DIR)? {
            let content = fs::read_to_string(&path)?;
            for line in content.lines() {
                if events.len() >= max {
                    break 'outer;
                }
                if let Ok(value) = serde_json::from_str(line) {
                    events.push(value);
                }
            }
        }
        Ok(events)
    }

    /// Storage usage across all record directories.
    pub fn storage_info(&self) -> Result<StorageInfo> {
        let mut file_count = 0;
        let mut total_bytes = 0;
        for dir in [SEISMIC_DIR, EVENTS_DIR, SYSTEM_DIR, DATA_DIR] {
            for entry in fs::read_dir(self.root.join(dir))? {
                let metadata = entry?.metadata()?;
                if metadata.is_file() {
                    file_count += 1;
                    total_bytes += metadata.len();
                }
            }
        }
        Ok(StorageInfo {
            file_count,
            total_bytes,
        })
    }

    /// Run retention cleanup if the hourly interval has elapsed.
    pub fn cleanup(&mut self, clock: &dyn Clock) -> Result<usize> {
        let now = clock.now_mono();
        if now.saturating_sub(self.last_cleanup_mono) < CLEANUP_INTERVAL_MS {
            return Ok(0);
        }
        self.last_cleanup_mono = now;
        self.purge_older_than_retention(clock)
    }

    /// Delete per-day files older than the retention period. Seismic files
    /// are aged against the wall-clock day, the boot-keyed streams against
    /// the boot day.
    pub fn purge_older_than_retention(&self, clock: &dyn Clock) -> Result<usize> {
        let retention = u64::from(self.retention_days);
        let mut removed = 0;

        let wall_cutoff = (clock.now_wall() / 86_400).saturating_sub(retention);
        for (day, path) in self.day_files(SEISMIC_DIR)? {
            if day < wall_cutoff {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        let boot_cutoff = (clock.now_mono() / 86_400_000).saturating_sub(retention);
        for dir in [EVENTS_DIR, SYSTEM_DIR, DATA_DIR] {
            for (day, path) in self.day_files(dir)? {
                if day < boot_cutoff {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!("retention cleanup removed {} record files", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use crate::record::{
        make_event_id, AlgorithmInfo, ClassificationInfo, DetectionInfo, EventClass, Measurements,
        RecordMetadata, SensorExtremes,
    };

    fn record(ts_wall: u64, richter: f64) -> SeismicRecord {
        let class = EventClass::from_richter(richter);
        SeismicRecord {
            event_id: make_event_id(ts_wall, 0),
            detection: DetectionInfo {
                ts_wall,
                iso_wall: crate::clock::format_iso_utc(ts_wall),
                ntp_validated: true,
                boot_time_ms: 0,
            },
            classification: ClassificationInfo {
                class,
                intensity_level: class.level(),
                richter_range: class.richter_range().to_string(),
                confidence: 0.95,
            },
            measurements: Measurements {
                pga_g: 0.03,
                richter,
                local_magnitude: 1.0,
                duration_ms: 1200,
                peak_frequency_hz: 28.5,
                energy_joules: 1e12,
            },
            sensor_data: SensorExtremes {
                max_ax: 0.02,
                max_ay: 0.02,
                max_az: 0.01,
                vector_magnitude: 0.03,
                calibration_valid: true,
                calibration_age_hours: 1.0,
            },
            algorithm: AlgorithmInfo {
                method: "STA_LTA".to_string(),
                trigger_ratio: 3.1,
                sta_window: 25,
                lta_window: 2500,
                background_noise: 0.001,
            },
            metadata: RecordMetadata {
                source: "detector".to_string(),
                processing_version: crate::VERSION.to_string(),
                sample_rate_hz: 500,
                filter_applied: "median_spike_reject".to_string(),
                data_quality: "excellent".to_string(),
            },
        }
    }

    #[test]
    fn test_seismic_records_land_in_wall_day_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = DataLogger::open(dir.path(), 90).unwrap();

        let ts = 1_700_000_000;
        logger.append_seismic(&record(ts, 2.5)).unwrap();
        logger.append_seismic(&record(ts + 10, 4.2)).unwrap();

        let path = dir
            .path()
            .join("seismic")
            .join(format!("{}.json", ts / 86_400));
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_unvalidated_record_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let logger = DataLogger::open(dir.path(), 90).unwrap();
        let mut rec = record(1_700_000_000, 2.5);
        rec.detection.ntp_validated = false;
        assert!(logger.append_seismic(&rec).is_err());
    }

    #[test]
    fn test_seismic_flat_event_requires_trusted_time() {
        let dir = tempfile::tempdir().unwrap();
        let logger = DataLogger::open(dir.path(), 90).unwrap();
        let clock = FakeClock::new(0, false);

        let written = logger.log_event(&clock, "Minor", "detected", 0.03).unwrap();
        assert!(!written);
        // The rejection itself shows up in the system log.
        let system = dir.path().join("system").join("0.json");
        let content = fs::read_to_string(system).unwrap();
        assert!(content.contains("EVENT_REJECTED"));

        // Non-seismic events write regardless of clock trust.
        let written = logger
            .log_event(&clock, "SYSTEM_START", "boot complete", 0.0)
            .unwrap();
        assert!(written);
    }

    #[test]
    fn test_recent_seismic_report_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let logger = DataLogger::open(dir.path(), 90).unwrap();

        logger.append_seismic(&record(1_700_000_000, 2.0)).unwrap();
        logger.append_seismic(&record(1_700_000_100, 3.0)).unwrap();
        logger.append_seismic(&record(1_700_000_200, 4.0)).unwrap();

        let report = logger.recent_seismic(50).unwrap();
        assert_eq!(report.total_count, 3);
        assert_eq!(report.statistics.by_type.get("Minor"), Some(&2));
        assert_eq!(report.statistics.by_type.get("Light"), Some(&1));
        assert_eq!(report.statistics.min_richter, Some(2.0));
        assert_eq!(report.statistics.max_richter, Some(4.0));
        assert!((report.statistics.avg_richter.unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_recent_seismic_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let logger = DataLogger::open(dir.path(), 90).unwrap();
        for i in 0..10 {
            logger.append_seismic(&record(1_700_000_000 + i, 2.5)).unwrap();
        }
        let report = logger.recent_seismic(4).unwrap();
        assert_eq!(report.total_count, 4);
    }

    #[test]
    fn test_retention_purges_old_day_files() {
        let dir = tempfile::tempdir().unwrap();
        let logger = DataLogger::open(dir.path(), 7).unwrap();

        let now_wall = 1_700_000_000u64;
        let old_wall = now_wall - 10 * 86_400;
        logger.append_seismic(&record(old_wall, 2.5)).unwrap();
        logger.append_seismic(&record(now_wall, 2.5)).unwrap();

        let clock = FakeClock::new(now_wall, true);
        let removed = logger.purge_older_than_retention(&clock).unwrap();
        assert_eq!(removed, 1);

        let report = logger.recent_seismic(50).unwrap();
        assert_eq!(report.total_count, 1);
    }

    #[test]
    fn test_sample_summaries_append(){
        let dir = tempfile::tempdir().unwrap();
        let logger = DataLogger::open(dir.path(), 90).unwrap();
        let summary = SampleSummary {
            ts_mono: 5000,
            accel_x: 0.001,
            accel_y: 0.0,
            accel_z: -0.001,
            magnitude: 0.0015,
            max_magnitude: 0.002,
            samples_averaged: 10,
        };
        logger.log_sample_summary(&summary).unwrap();
        logger.log_sample_summary(&summary).unwrap();

        let content = fs::read_to_string(dir.path().join("data").join("0.json")).unwrap();
        assert_eq!(content.lines().count(), 2);
        let info = logger.storage_info().unwrap();
        assert_eq!(info.file_count, 1);
        assert!(info.total_bytes > 0);
    }
}
