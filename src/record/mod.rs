// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Typed schemas for everything that crosses an external boundary: the
//! durable seismic record, the push-protocol broadcast messages, and the
//! flat legacy event lines. Each format has exactly one serializer here.

use serde::{Deserialize, Serialize};

/// Event classification derived from the Richter estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventClass {
    /// Richter < 2.0
    Micro,
    /// Richter 2.0 - 4.0
    Minor,
    /// Richter 4.0 - 5.0
    Light,
    /// Richter 5.0 - 6.0
    Moderate,
    /// Richter 6.0 - 7.0
    Strong,
    /// Richter >= 7.0
    Major,
}

impl EventClass {
    /// Classify a Richter magnitude into one of the six event classes.
    pub fn from_richter(richter: f64) -> Self {
        if richter >= 7.0 {
            EventClass::Major
        } else if richter >= 6.0 {
            EventClass::Strong
        } else if richter >= 5.0 {
            EventClass::Moderate
        } else if richter >= 4.0 {
            EventClass::Light
        } else if richter >= 2.0 {
            EventClass::Minor
        } else {
            EventClass::Micro
        }
    }

    /// Intensity level 1 (Micro) through 6 (Major).
    pub fn level(&self) -> u8 {
        match self {
            EventClass::Micro => 1,
            EventClass::Minor => 2,
            EventClass::Light => 3,
            EventClass::Moderate => 4,
            EventClass::Strong => 5,
            EventClass::Major => 6,
        }
    }

    /// Human-readable Richter range for this class.
    pub fn richter_range(&self) -> &'static str {
        match self {
            EventClass::Micro => "<2.0",
            EventClass::Minor => "2.0-4.0",
            EventClass::Light => "4.0-5.0",
            EventClass::Moderate => "5.0-6.0",
            EventClass::Strong => "6.0-7.0",
            EventClass::Major => "≥7.0",
        }
    }

    /// Class name as used in record and broadcast payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::Micro => "Micro",
            EventClass::Minor => "Minor",
            EventClass::Light => "Light",
            EventClass::Moderate => "Moderate",
            EventClass::Strong => "Strong",
            EventClass::Major => "Major",
        }
    }
}

/// Detection timing section of a seismic record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionInfo {
    /// Validated wall-clock time of the detection, seconds since epoch
    pub ts_wall: u64,
    /// ISO-8601 rendering of `ts_wall`
    pub iso_wall: String,
    /// Always true for persisted records; untrusted-clock events are dropped
    pub ntp_validated: bool,
    /// Milliseconds since boot at emit time
    pub boot_time_ms: u64,
}

/// Classification section of a seismic record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationInfo {
    /// Event class derived from the Richter estimate
    #[serde(rename = "type")]
    pub class: EventClass,
    /// Intensity level 1-6
    pub intensity_level: u8,
    /// Richter range string for the class
    pub richter_range: String,
    /// Detection confidence
    pub confidence: f64,
}

/// Scalar measurements derived from the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurements {
    /// Peak ground acceleration in g
    pub pga_g: f64,
    /// Richter magnitude estimate
    pub richter: f64,
    /// Local magnitude (ML) approximation
    pub local_magnitude: f64,
    /// Event duration in milliseconds
    pub duration_ms: u64,
    /// Legacy peak-frequency heuristic in Hz; not a scientific output
    pub peak_frequency_hz: f64,
    /// Gutenberg-Richter radiated energy estimate in joules
    pub energy_joules: f64,
}

/// Per-axis extremes and calibration context at emit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorExtremes {
    /// Peak |X| acceleration during the event, in g
    pub max_ax: f64,
    /// Peak |Y| acceleration during the event, in g
    pub max_ay: f64,
    /// Peak |Z| acceleration during the event, in g
    pub max_az: f64,
    /// Peak vector magnitude during the event, in g
    pub vector_magnitude: f64,
    /// Whether the calibration was valid when the event was emitted
    pub calibration_valid: bool,
    /// Calibration age in hours at emit time (-1.0 if never calibrated)
    pub calibration_age_hours: f64,
}

/// Trigger algorithm context at emit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmInfo {
    /// Detection method identifier
    pub method: String,
    /// STA/LTA ratio at emit time
    pub trigger_ratio: f64,
    /// Short-term window length in samples
    pub sta_window: usize,
    /// Long-term window length in samples
    pub lta_window: usize,
    /// Background noise estimate in g
    pub background_noise: f64,
}

/// Provenance metadata for a seismic record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Producing path: "detector" or "simulation"
    pub source: String,
    /// Processing pipeline version
    pub processing_version: String,
    /// Configured sample rate in Hz
    pub sample_rate_hz: u32,
    /// Pre-trigger filtering applied to the sample stream
    pub filter_applied: String,
    /// "excellent" with a valid calibration, "good" otherwise
    pub data_quality: String,
}

/// The durable, scientifically-annotated event record.
///
/// Created by the event assembler at emit time; never mutated afterwards.
/// Ownership passes to the sink once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeismicRecord {
    /// Stable identifier derived from the detection wall time
    pub event_id: String,
    /// Detection timing
    pub detection: DetectionInfo,
    /// Classification
    pub classification: ClassificationInfo,
    /// Derived measurements
    pub measurements: Measurements,
    /// Sensor extremes and calibration context
    pub sensor_data: SensorExtremes,
    /// Trigger algorithm context
    pub algorithm: AlgorithmInfo,
    /// Provenance metadata
    pub metadata: RecordMetadata,
}

/// Build the stable event identifier: `seismic_<date>_<time>_<boot ms % 1000>`.
pub fn make_event_id(ts_wall: u64, boot_time_ms: u64) -> String {
    let stamp = chrono::DateTime::from_timestamp(ts_wall as i64, 0)
        .map(|dt| dt.format("%Y%m%d_%H%M%S").to_string())
        .unwrap_or_else(|| "00000000_000000".to_string());
    format!("seismic_{}_{:03}", stamp, boot_time_ms % 1000)
}

/// Rolling aggregate of the most recent raw samples, used for the
/// sensor-data broadcast and the ≤1 Hz persisted sample summary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SampleSummary {
    /// Monotonic ms of the newest sample in the window
    pub ts_mono: u64,
    /// Mean X acceleration over the window, in g
    pub accel_x: f64,
    /// Mean Y acceleration over the window, in g
    pub accel_y: f64,
    /// Mean Z acceleration over the window, in g
    pub accel_z: f64,
    /// Mean magnitude over the window, in g
    pub magnitude: f64,
    /// Peak magnitude over the window, in g
    pub max_magnitude: f64,
    /// Number of samples aggregated
    pub samples_averaged: u32,
}

/// Push-protocol sensor-data message.
#[derive(Debug, Clone, Serialize)]
pub struct SampleBroadcast {
    /// Message discriminator, always "sensor_data"
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Monotonic ms when the message was built
    pub timestamp: u64,
    /// Mean X acceleration in g
    pub accel_x: f64,
    /// Mean Y acceleration in g
    pub accel_y: f64,
    /// Mean Z acceleration in g
    pub accel_z: f64,
    /// Mean magnitude in g
    pub magnitude: f64,
    /// Peak magnitude in the averaging window, in g
    pub max_magnitude: f64,
    /// Monotonic ms of the newest aggregated sample
    pub sensor_timestamp: u64,
    /// Number of samples aggregated
    pub samples_averaged: u32,
    /// Whether a valid calibration is in force
    pub calibrated: bool,
    /// Total events detected since boot
    pub events_detected: u64,
}

impl SampleBroadcast {
    /// Build a broadcast message from a summary plus sampler state.
    pub fn new(summary: &SampleSummary, now_mono: u64, calibrated: bool, events_detected: u64) -> Self {
        Self {
            kind: "sensor_data",
            timestamp: now_mono,
            accel_x: summary.accel_x,
            accel_y: summary.accel_y,
            accel_z: summary.accel_z,
            magnitude: summary.magnitude,
            max_magnitude: summary.max_magnitude,
            sensor_timestamp: summary.ts_mono,
            samples_averaged: summary.samples_averaged,
            calibrated,
            events_detected,
        }
    }
}

/// Push-protocol seismic-event message.
#[derive(Debug, Clone, Serialize)]
pub struct EventBroadcast {
    /// Message discriminator, always "seismic_event"
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Event class name
    pub event_type: String,
    /// Peak ground acceleration in g
    pub magnitude: f64,
    /// Intensity level 1-6
    pub level: u8,
    /// Monotonic ms at broadcast time
    pub timestamp: u64,
    /// Validated wall-clock time in epoch seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntp_timestamp: Option<u64>,
}

impl EventBroadcast {
    /// Derive the compact broadcast message from a full record.
    pub fn from_record(record: &SeismicRecord, now_mono: u64) -> Self {
        Self {
            kind: "seismic_event",
            event_type: record.classification.class.as_str().to_string(),
            magnitude: record.measurements.pga_g,
            level: record.classification.intensity_level,
            timestamp: now_mono,
            ntp_timestamp: Some(record.detection.ts_wall),
        }
    }
}

/// Unstamped system event; the storage layer assigns the timestamp and the
/// wall-clock validity marker when the line is written.
#[derive(Debug, Clone)]
pub struct SystemEvent {
    /// Event kind, e.g. "SYSTEM_START", "EVENT_REJECTED"
    pub kind: String,
    /// Human-readable description
    pub description: String,
    /// Associated scalar value (magnitude, count, ...)
    pub value: f64,
}

impl SystemEvent {
    /// Convenience constructor.
    pub fn new(kind: &str, description: impl Into<String>, value: f64) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(EventClass::from_richter(-1.0), EventClass::Micro);
        assert_eq!(EventClass::from_richter(1.99), EventClass::Micro);
        assert_eq!(EventClass::from_richter(2.0), EventClass::Minor);
        assert_eq!(EventClass::from_richter(3.99), EventClass::Minor);
        assert_eq!(EventClass::from_richter(4.0), EventClass::Light);
        assert_eq!(EventClass::from_richter(5.0), EventClass::Moderate);
        assert_eq!(EventClass::from_richter(6.0), EventClass::Strong);
        assert_eq!(EventClass::from_richter(7.0), EventClass::Major);
        assert_eq!(EventClass::from_richter(9.5), EventClass::Major);
    }

    #[test]
    fn test_levels_and_ranges() {
        assert_eq!(EventClass::Micro.level(), 1);
        assert_eq!(EventClass::Major.level(), 6);
        assert_eq!(EventClass::Micro.richter_range(), "<2.0");
        assert_eq!(EventClass::Minor.richter_range(), "2.0-4.0");
        assert_eq!(EventClass::Major.richter_range(), "≥7.0");
    }

    #[test]
    fn test_event_id_format() {
        // 2023-11-14T22:13:20Z
        let id = make_event_id(1_700_000_000, 123_456_789);
        assert_eq!(id, "seismic_20231114_221320_789");
    }

    #[test]
    fn test_record_json_shape() {
        let record = SeismicRecord {
            event_id: make_event_id(1_700_000_000, 42),
            detection: DetectionInfo {
                ts_wall: 1_700_000_000,
                iso_wall: "2023-11-14T22:13:20Z".to_string(),
                ntp_validated: true,
                boot_time_ms: 42,
            },
            classification: ClassificationInfo {
                class: EventClass::Light,
                intensity_level: EventClass::Light.level(),
                richter_range: EventClass::Light.richter_range().to_string(),
                confidence: 0.95,
            },
            measurements: Measurements {
                pga_g: 1.02,
                richter: 4.0,
                local_magnitude: 3.1,
                duration_ms: 5000,
                peak_frequency_hz: 1.0,
                energy_joules: 6.3e17,
            },
            sensor_data: SensorExtremes {
                max_ax: 0.6,
                max_ay: 0.3,
                max_az: 0.1,
                vector_magnitude: 1.02,
                calibration_valid: true,
                calibration_age_hours: 0.5,
            },
            algorithm: AlgorithmInfo {
                method: "STA_LTA".to_string(),
                trigger_ratio: 3.2,
                sta_window: 25,
                lta_window: 2500,
                background_noise: 0.001,
            },
            metadata: RecordMetadata {
                source: "detector".to_string(),
                processing_version: "1.0.0".to_string(),
                sample_rate_hz: 500,
                filter_applied: "median_spike_reject".to_string(),
                data_quality: "excellent".to_string(),
            },
        };

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();

        assert_eq!(value["detection"]["ntp_validated"], true);
        assert!(value["detection"]["ts_wall"].as_u64().unwrap() >= 1_577_836_800);
        assert_eq!(value["classification"]["type"], "Light");
        assert_eq!(value["classification"]["intensity_level"], 3);
        assert_eq!(value["algorithm"]["method"], "STA_LTA");
        assert_eq!(value["algorithm"]["sta_window"], 25);
        assert_eq!(value["metadata"]["data_quality"], "excellent");
        assert!(value["measurements"]["duration_ms"].as_u64().unwrap() >= 100);
    }

    #[test]
    fn test_broadcast_message_shapes() {
        let summary = SampleSummary {
            ts_mono: 1000,
            accel_x: 0.001,
            accel_y: -0.002,
            accel_z: 0.0005,
            magnitude: 0.0023,
            max_magnitude: 0.004,
            samples_averaged: 10,
        };
        let msg = SampleBroadcast::new(&summary, 1010, true, 3);
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "sensor_data");
        assert_eq!(value["samples_averaged"], 10);
        assert_eq!(value["calibrated"], true);
        assert_eq!(value["events_detected"], 3);
    }
}
