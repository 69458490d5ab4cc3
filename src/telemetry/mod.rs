// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Runtime counters, periodic health snapshots, and the sampler watchdog.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Single-writer, many-reader runtime counters.
///
/// Each field has one writing component; reads are relaxed snapshots with
/// no cross-field consistency requirement.
#[derive(Debug, Default)]
pub struct Counters {
    /// Samples produced by the sampler since boot
    pub total_samples: AtomicU64,
    /// Events detected and emitted as records
    pub events_detected: AtomicU64,
    /// Samples rejected by the spike filter
    pub spikes_filtered: AtomicU64,
    /// Events dropped because the wall clock was not trusted
    pub events_rejected_no_time: AtomicU64,
    /// Transient sensor read failures
    pub sensor_read_errors: AtomicU64,
    last_magnitude_bits: AtomicU64,
}

impl Counters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the most recent calibrated magnitude.
    pub fn set_last_magnitude(&self, magnitude: f64) {
        self.last_magnitude_bits
            .store(magnitude.to_bits(), Ordering::Relaxed);
    }

    /// Most recent calibrated magnitude in g.
    pub fn last_magnitude(&self) -> f64 {
        f64::from_bits(self.last_magnitude_bits.load(Ordering::Relaxed))
    }

    /// Take a relaxed snapshot of all counters.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total_samples: self.total_samples.load(Ordering::Relaxed),
            events_detected: self.events_detected.load(Ordering::Relaxed),
            spikes_filtered: self.spikes_filtered.load(Ordering::Relaxed),
            events_rejected_no_time: self.events_rejected_no_time.load(Ordering::Relaxed),
            sensor_read_errors: self.sensor_read_errors.load(Ordering::Relaxed),
            last_magnitude: self.last_magnitude(),
        }
    }
}

/// Point-in-time view of [`Counters`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CountersSnapshot {
    /// Samples produced since boot
    pub total_samples: u64,
    /// Events detected since boot
    pub events_detected: u64,
    /// Spike-filtered samples since boot
    pub spikes_filtered: u64,
    /// Events rejected for lack of trusted time
    pub events_rejected_no_time: u64,
    /// Transient sensor read failures
    pub sensor_read_errors: u64,
    /// Most recent calibrated magnitude in g
    pub last_magnitude: f64,
}

/// Periodic status snapshot pushed to dashboards and the broker.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSample {
    /// Message discriminator, always "status"
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Monotonic ms when the snapshot was taken
    pub timestamp: u64,
    /// Seconds since boot
    pub uptime_secs: u64,
    /// Counter values
    #[serde(flatten)]
    pub counters: CountersSnapshot,
    /// Samples currently queued for the sink
    pub sample_queue_depth: usize,
    /// Samples dropped at the queue since boot
    pub samples_dropped: u64,
    /// Events currently queued for the sink
    pub event_queue_depth: usize,
    /// Events dropped at the queue since boot
    pub events_dropped: u64,
    /// Whether a calibration has ever succeeded
    pub calibrated: bool,
    /// Whether the current calibration is valid
    pub calibration_valid: bool,
    /// Whether the wall clock is trusted
    pub time_trusted: bool,
    /// Validated wall-clock time, present only while trusted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntp_timestamp: Option<u64>,
    /// Connected push clients
    pub connected_clients: usize,
    /// Whether real-time streaming is enabled
    pub streaming_enabled: bool,
    /// Whether the broker connection is up
    pub mqtt_connected: bool,
    /// Whether back-pressure degradation is active
    pub degraded: bool,
}

/// Sampler liveness watchdog.
///
/// Trips when the sample counter stops advancing for the configured
/// timeout. A trip is fatal: the engine shuts the process down so the
/// supervisor can restart it.
pub struct Watchdog {
    timeout: Duration,
    last_count: u64,
    last_progress: Instant,
}

impl Watchdog {
    /// Create a watchdog with the given stall timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_count: 0,
            last_progress: Instant::now(),
        }
    }

    /// Feed the current sample count. Returns false once the sampler has
    /// been stalled for longer than the timeout.
    pub fn check(&mut self, total_samples: u64) -> bool {
        if total_samples != self.last_count {
            self.last_count = total_samples;
            self.last_progress = Instant::now();
            return true;
        }
        self.last_progress.elapsed() < self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::new();
        counters.total_samples.fetch_add(10, Ordering::Relaxed);
        counters.spikes_filtered.fetch_add(2, Ordering::Relaxed);
        counters.set_last_magnitude(0.0042);

        let snap = counters.snapshot();
        assert_eq!(snap.total_samples, 10);
        assert_eq!(snap.spikes_filtered, 2);
        assert!((snap.last_magnitude - 0.0042).abs() < 1e-12);
        assert_eq!(snap.events_detected, 0);
    }

    #[test]
    fn test_watchdog_tracks_progress() {
        let mut wd = Watchdog::new(Duration::from_millis(50));
        assert!(wd.check(1));
        assert!(wd.check(2));
        // Progress keeps it alive even across the timeout boundary.
        std::thread::sleep(Duration::from_millis(30));
        assert!(wd.check(3));
        std::thread::sleep(Duration::from_millis(30));
        assert!(wd.check(4));
    }

    #[test]
    fn test_watchdog_trips_on_stall() {
        let mut wd = Watchdog::new(Duration::from_millis(20));
        assert!(wd.check(5));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!wd.check(5));
    }

    #[test]
    fn test_health_sample_serializes_flat_counters() {
        let health = HealthSample {
            kind: "status",
            timestamp: 1000,
            uptime_secs: 1,
            counters: CountersSnapshot {
                total_samples: 500,
                ..CountersSnapshot::default()
            },
            sample_queue_depth: 3,
            samples_dropped: 0,
            event_queue_depth: 0,
            events_dropped: 0,
            calibrated: true,
            calibration_valid: true,
            time_trusted: true,
            ntp_timestamp: Some(1_700_000_000),
            connected_clients: 1,
            streaming_enabled: true,
            mqtt_connected: false,
            degraded: false,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&health).unwrap()).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["total_samples"], 500);
        assert_eq!(value["ntp_timestamp"], 1_700_000_000u64);
    }
}
