// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Event assembler: turns sustained trigger intervals into seismic records.
//!
//! State machine over admitted samples:
//!
//! ```text
//!   IDLE ──── trigger ────► ACTIVE (accumulate extremes)
//!   ACTIVE ── trigger ────► ACTIVE
//!   ACTIVE ── no trigger ─► emit once duration >= MIN_EVENT_DURATION,
//!                           else keep waiting
//! ```
//!
//! Records are stamped with wall-clock time at emit, never at trigger
//! start. An untrusted wall clock drops the record at that point; the
//! detector keeps running and only a counter and a local log line remain.

use tracing::{info, warn};

use super::magnitude;
use crate::calibration::Calibration;
use crate::clock::Clock;
use crate::record::{
    make_event_id, AlgorithmInfo, ClassificationInfo, DetectionInfo, EventClass, Measurements,
    RecordMetadata, SeismicRecord, SensorExtremes,
};
use crate::sensor::Sample;

/// Confidence assigned to detector-produced events.
const DETECTION_CONFIDENCE: f64 = 0.95;

/// Detection method identifier carried in every record.
const METHOD: &str = "STA_LTA";

/// Pre-trigger filtering description carried in record metadata.
const FILTER_APPLIED: &str = "median_spike_reject";

/// Accumulator for the event currently being assembled.
///
/// Exists only between trigger start and emit; at most one at a time.
#[derive(Debug, Clone, Copy)]
pub struct ActiveEvent {
    /// Monotonic ms of the first triggered sample
    pub start_ts_mono: u64,
    /// Monotonic ms of the last accumulated sample
    pub last_ts_mono: u64,
    /// Peak magnitude so far, in g
    pub max_mag: f64,
    /// Magnitude sum for the mean, in g
    pub sum_mag: f64,
    /// Number of accumulated samples
    pub sample_count: u32,
    /// Peak |X| so far, in g
    pub max_ax: f64,
    /// Peak |Y| so far, in g
    pub max_ay: f64,
    /// Peak |Z| so far, in g
    pub max_az: f64,
}

impl ActiveEvent {
    fn start(sample: &Sample) -> Self {
        Self {
            start_ts_mono: sample.ts_mono,
            last_ts_mono: sample.ts_mono,
            max_mag: sample.magnitude,
            sum_mag: sample.magnitude,
            sample_count: 1,
            max_ax: sample.ax.abs(),
            max_ay: sample.ay.abs(),
            max_az: sample.az.abs(),
        }
    }

    fn accumulate(&mut self, sample: &Sample) {
        self.last_ts_mono = sample.ts_mono;
        self.max_mag = self.max_mag.max(sample.magnitude);
        self.sum_mag += sample.magnitude;
        self.sample_count += 1;
        self.max_ax = self.max_ax.max(sample.ax.abs());
        self.max_ay = self.max_ay.max(sample.ay.abs());
        self.max_az = self.max_az.max(sample.az.abs());
    }
}

/// Sampler-domain context needed to enrich a record at emit time.
pub struct EmitContext<'a> {
    /// Time source used for record identity
    pub clock: &'a dyn Clock,
    /// Calibration snapshot in force
    pub cal: &'a Calibration,
    /// STA/LTA ratio at emit time
    pub trigger_ratio: f64,
    /// Short-term window length in samples
    pub sta_window: usize,
    /// Long-term window length in samples
    pub lta_window: usize,
    /// Background noise estimate in g
    pub background_noise: f64,
    /// Configured sample rate in Hz
    pub sample_rate_hz: u32,
    /// Local magnitude calibration offset
    pub magnitude_offset: f64,
}

/// Outcome of feeding one admitted sample to the assembler.
#[derive(Debug)]
pub enum Emit {
    /// Nothing to report
    None,
    /// A completed, validated record
    Record(SeismicRecord),
    /// An event completed but the wall clock was not trusted
    RejectedNoTime {
        /// Classification the record would have carried
        class: EventClass,
        /// Peak magnitude in g
        magnitude: f64,
        /// Event duration in ms
        duration_ms: u64,
    },
}

/// The IDLE/ACTIVE event state machine.
pub struct EventAssembler {
    active: Option<ActiveEvent>,
    min_duration_ms: u64,
}

impl EventAssembler {
    /// Create an idle assembler.
    pub fn new(min_duration_ms: u64) -> Self {
        Self {
            active: None,
            min_duration_ms,
        }
    }

    /// Whether an event is currently being assembled.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Feed one admitted sample plus the current trigger decision.
    pub fn step(&mut self, sample: &Sample, triggered: bool, ctx: &EmitContext) -> Emit {
        if triggered {
            match self.active.as_mut() {
                None => {
                    let event = ActiveEvent::start(sample);
                    info!(
                        "seismic trigger: magnitude {:.4} g at {} ms",
                        sample.magnitude, sample.ts_mono
                    );
                    self.active = Some(event);
                }
                Some(event) => event.accumulate(sample),
            }
            return Emit::None;
        }

        let Some(event) = self.active else {
            return Emit::None;
        };
        let duration_ms = sample.ts_mono.saturating_sub(event.start_ts_mono);
        if duration_ms < self.min_duration_ms {
            // Too short to emit yet; hold the event open.
            return Emit::None;
        }
        self.active = None;
        self.finish(&event, duration_ms, "detector", ctx)
    }

    /// Drive the simulation path: a synthetic event at the target Richter
    /// magnitude flows through the same enrichment and validation as a
    /// detected one.
    pub fn simulate(&mut self, target_richter: f64, ctx: &EmitContext) -> Emit {
        let pga = magnitude::pga_from_richter(target_richter, ctx.magnitude_offset);
        let duration_ms = magnitude::synthetic_duration_ms(target_richter);
        info!(
            "simulating seismic event: Richter {:.2} -> PGA {:.6} g, {} ms",
            target_richter, pga, duration_ms
        );
        let now = ctx.clock.now_mono();
        let event = ActiveEvent {
            start_ts_mono: now.saturating_sub(duration_ms),
            last_ts_mono: now,
            max_mag: pga,
            sum_mag: pga * 10.0,
            sample_count: 10,
            max_ax: pga * 0.6,
            max_ay: pga * 0.3,
            max_az: pga * 0.1,
        };
        self.finish(&event, duration_ms, "simulation", ctx)
    }

    fn finish(
        &self,
        event: &ActiveEvent,
        duration_ms: u64,
        source: &str,
        ctx: &EmitContext,
    ) -> Emit {
        let richter = magnitude::richter(event.max_mag, ctx.magnitude_offset);
        let class = EventClass::from_richter(richter);
        let avg = event.sum_mag / event.sample_count.max(1) as f64;
        info!(
            "event ended: {} ms, max {:.4} g, avg {:.4} g, {} ({})",
            duration_ms,
            event.max_mag,
            avg,
            class.as_str(),
            source
        );

        if !ctx.clock.trusted() {
            warn!(
                "event rejected: wall clock not synchronized ({}, {:.4} g, {} ms)",
                class.as_str(),
                event.max_mag,
                duration_ms
            );
            return Emit::RejectedNoTime {
                class,
                magnitude: event.max_mag,
                duration_ms,
            };
        }

        let ts_wall = ctx.clock.now_wall();
        let boot_time_ms = ctx.clock.now_mono();
        let record = SeismicRecord {
            event_id: make_event_id(ts_wall, boot_time_ms),
            detection: DetectionInfo {
                ts_wall,
                iso_wall: ctx.clock.format_iso(ts_wall),
                ntp_validated: true,
                boot_time_ms,
            },
            classification: ClassificationInfo {
                class,
                intensity_level: class.level(),
                richter_range: class.richter_range().to_string(),
                confidence: DETECTION_CONFIDENCE,
            },
            measurements: Measurements {
                pga_g: event.max_mag,
                richter,
                local_magnitude: magnitude::local_magnitude(event.max_mag, ctx.magnitude_offset),
                duration_ms,
                peak_frequency_hz: magnitude::peak_frequency_hz(event.max_mag),
                energy_joules: magnitude::energy_joules(richter),
            },
            sensor_data: SensorExtremes {
                max_ax: event.max_ax,
                max_ay: event.max_ay,
                max_az: event.max_az,
                vector_magnitude: event.max_mag,
                calibration_valid: ctx.cal.valid,
                calibration_age_hours: ctx.cal.age_hours(boot_time_ms),
            },
            algorithm: AlgorithmInfo {
                method: METHOD.to_string(),
                trigger_ratio: ctx.trigger_ratio,
                sta_window: ctx.sta_window,
                lta_window: ctx.lta_window,
                background_noise: ctx.background_noise,
            },
            metadata: RecordMetadata {
                source: source.to_string(),
                processing_version: crate::VERSION.to_string(),
                sample_rate_hz: ctx.sample_rate_hz,
                filter_applied: FILTER_APPLIED.to_string(),
                data_quality: if ctx.cal.valid { "excellent" } else { "good" }.to_string(),
            },
        };
        Emit::Record(record)
    }
}
