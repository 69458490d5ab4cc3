// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Sensor calibration and baseline drift monitoring.
//!
//! Calibration runs *instead of* the sampling loop, never alongside it: the
//! sampler domain executes [`calibrate`] synchronously at boot and on
//! operator demand. The resulting [`Calibration`] snapshot is replaced
//! atomically; readers never observe a half-written calibration.
//!
//! Z-offset policy: the Z offset is the raw Z mean, so a calibrated Z axis
//! reads 0 g at rest. The offset itself is validated against the gravity
//! band, but gravity is never re-added downstream.

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::CalibrationConfig;
use crate::sensor::{RawFrame, Sensor};

/// Per-axis offsets plus the post-calibration noise baseline.
///
/// Owned by the calibration engine; every other component holds read-only
/// snapshots (the struct is `Copy` so a snapshot is a plain load).
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    /// X-axis offset in g
    pub offset_x: f64,
    /// Y-axis offset in g
    pub offset_y: f64,
    /// Z-axis offset in g (raw Z mean; calibrated Z rests at 0 g)
    pub offset_z: f64,
    /// Mean calibrated magnitude right after calibration, in g
    pub baseline_lta: f64,
    /// Monotonic ms when this calibration was produced
    pub created_at_mono: u64,
    /// Whether this calibration passed validation and has not drifted out
    pub valid: bool,
}

impl Calibration {
    /// The zero calibration used before the first successful run.
    pub fn none() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            offset_z: 0.0,
            baseline_lta: 0.0,
            created_at_mono: 0,
            valid: false,
        }
    }

    /// Apply the offsets to a raw frame, returning calibrated components in g.
    pub fn apply(&self, raw: &RawFrame) -> (f64, f64, f64) {
        (
            raw.ax - self.offset_x,
            raw.ay - self.offset_y,
            raw.az - self.offset_z,
        )
    }

    /// Age of this calibration in hours, or -1.0 if never calibrated.
    pub fn age_hours(&self, now_mono: u64) -> f64 {
        if self.created_at_mono == 0 && !self.valid {
            return -1.0;
        }
        now_mono.saturating_sub(self.created_at_mono) as f64 / 3_600_000.0
    }
}

/// Run the full calibration procedure against a stationary sensor.
///
/// Phases: stability check, offset acquisition, validation, drift advisory
/// against the previous calibration, and a post-calibration self test whose
/// mean magnitude becomes `baseline_lta`. Any rejection returns an error and
/// leaves the previous calibration in force at the caller.
pub fn calibrate(
    sensor: &mut dyn Sensor,
    clock: &dyn Clock,
    cfg: &CalibrationConfig,
    previous: Option<&Calibration>,
) -> Result<Calibration> {
    info!("Starting sensor calibration...");

    // Phase 1: stability check
    let stability = collect(sensor, cfg.stability_samples, cfg.stability_interval_ms)?;
    let (_, stddev) = axis_stats(&stability);
    if stddev.iter().any(|s| *s > cfg.max_stddev_g) {
        bail!(
            "sensor too unstable for calibration (stddev x={:.6} y={:.6} z={:.6} g, limit {:.3} g)",
            stddev[0],
            stddev[1],
            stddev[2],
            cfg.max_stddev_g
        );
    }

    // Phase 2: offset acquisition
    let frames = collect(sensor, cfg.acquisition_samples, cfg.acquisition_interval_ms)?;
    let (acq_mean, _) = axis_stats(&frames);
    let (offset_x, offset_y, offset_z) = (acq_mean[0], acq_mean[1], acq_mean[2]);
    let raw_z_mean = acq_mean[2];

    // Phase 3: validation
    if offset_x.abs() > cfg.max_xy_offset_g || offset_y.abs() > cfg.max_xy_offset_g {
        bail!(
            "unreasonable X/Y offsets (x={:.6} y={:.6} g, limit ±{:.2} g): sensor not level?",
            offset_x,
            offset_y,
            cfg.max_xy_offset_g
        );
    }
    if offset_z.abs() < cfg.min_z_g || offset_z.abs() > cfg.max_z_g {
        bail!(
            "Z offset {:.6} g outside gravity band [{:.1}, {:.1}] g",
            offset_z,
            cfg.min_z_g,
            cfg.max_z_g
        );
    }
    if raw_z_mean < cfg.min_z_g || raw_z_mean > cfg.max_z_g {
        bail!(
            "raw Z mean {:.6} g outside [{:.1}, {:.1}] g: gravity not aligned with Z",
            raw_z_mean,
            cfg.min_z_g,
            cfg.max_z_g
        );
    }

    // Phase 4: drift advisory against the previous calibration
    if let Some(prev) = previous {
        let dx = (offset_x - prev.offset_x).abs();
        let dy = (offset_y - prev.offset_y).abs();
        let dz = (offset_z - prev.offset_z).abs();
        if dx > cfg.max_offset_drift_g || dy > cfg.max_offset_drift_g || dz > cfg.max_offset_drift_g
        {
            warn!(
                "large calibration drift vs previous run (dx={:.4} dy={:.4} dz={:.4} g)",
                dx, dy, dz
            );
        }
    }

    // Phase 5: post-calibration self test
    let mut test_sum = 0.0;
    const TEST_SAMPLES: usize = 10;
    for frame in collect(sensor, TEST_SAMPLES, cfg.acquisition_interval_ms)? {
        let (x, y, z) = (
            frame.ax - offset_x,
            frame.ay - offset_y,
            frame.az - offset_z,
        );
        test_sum += (x * x + y * y + z * z).sqrt();
    }
    let baseline_lta = test_sum / TEST_SAMPLES as f64;
    if baseline_lta > cfg.max_test_magnitude_g {
        bail!(
            "post-calibration test magnitude {:.6} g exceeds {:.2} g",
            baseline_lta,
            cfg.max_test_magnitude_g
        );
    }

    let cal = Calibration {
        offset_x,
        offset_y,
        offset_z,
        baseline_lta,
        created_at_mono: clock.now_mono(),
        valid: true,
    };
    info!(
        "Calibration successful: offsets x={:.6} y={:.6} z={:.6} g, baseline {:.6} g",
        offset_x, offset_y, offset_z, baseline_lta
    );
    Ok(cal)
}

fn collect(sensor: &mut dyn Sensor, count: usize, interval_ms: u64) -> Result<Vec<RawFrame>> {
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        frames.push(sensor.read()?);
        if interval_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(interval_ms));
        }
    }
    Ok(frames)
}

fn axis_stats(frames: &[RawFrame]) -> ([f64; 3], [f64; 3]) {
    let n = frames.len().max(1) as f64;
    let mut mean = [0.0; 3];
    for f in frames {
        mean[0] += f.ax;
        mean[1] += f.ay;
        mean[2] += f.az;
    }
    for m in &mut mean {
        *m /= n;
    }
    let mut var = [0.0; 3];
    for f in frames {
        var[0] += (f.ax - mean[0]).powi(2);
        var[1] += (f.ay - mean[1]).powi(2);
        var[2] += (f.az - mean[2]).powi(2);
    }
    let stddev = [
        (var[0] / n).sqrt(),
        (var[1] / n).sqrt(),
        (var[2] / n).sqrt(),
    ];
    (mean, stddev)
}

/// Outcome of one baseline drift check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftStatus {
    /// Drift within the acceptable band
    Stable,
    /// Drift past the warning threshold
    Warning,
    /// Drift past the critical threshold; the calibration must be invalidated
    Critical,
}

/// Result of a drift check that was actually performed.
#[derive(Debug, Clone, Copy)]
pub struct DriftOutcome {
    /// Signed drift of the running LTA against the baseline, in percent
    pub drift_percent: f64,
    /// Severity classification of the drift
    pub status: DriftStatus,
    /// Whether the calibration has exceeded its advisory age
    pub aged: bool,
}

/// Periodic comparison of the running LTA against the post-calibration
/// baseline. Critical drift invalidates the calibration (the caller swaps
/// the snapshot); detection keeps running either way.
pub struct DriftMonitor {
    interval_ms: u64,
    warning_percent: f64,
    critical_percent: f64,
    max_age_ms: u64,
    last_check_mono: u64,
}

impl DriftMonitor {
    /// Build a monitor from configuration.
    pub fn new(cfg: &CalibrationConfig) -> Self {
        Self {
            interval_ms: cfg.drift_check_interval_secs * 1000,
            warning_percent: cfg.warning_drift_percent,
            critical_percent: cfg.critical_drift_percent,
            max_age_ms: (cfg.max_age_hours * 3_600_000.0) as u64,
            last_check_mono: 0,
        }
    }

    /// Run a check if the interval has elapsed. Returns `None` when the
    /// check was skipped (not due yet, invalid calibration, or no LTA).
    pub fn check(
        &mut self,
        now_mono: u64,
        current_lta: Option<f64>,
        cal: &Calibration,
    ) -> Option<DriftOutcome> {
        if now_mono.saturating_sub(self.last_check_mono) < self.interval_ms {
            return None;
        }
        self.last_check_mono = now_mono;

        if !cal.valid || cal.baseline_lta <= 0.0 {
            return None;
        }
        let lta = current_lta?;
        if lta.is_nan() || lta < 0.0 {
            warn!("invalid LTA value during drift check; invalidating calibration");
            return Some(DriftOutcome {
                drift_percent: f64::NAN,
                status: DriftStatus::Critical,
                aged: false,
            });
        }

        let drift_percent = (lta - cal.baseline_lta) / cal.baseline_lta * 100.0;
        let status = if drift_percent.abs() > self.critical_percent {
            DriftStatus::Critical
        } else if drift_percent.abs() > self.warning_percent {
            DriftStatus::Warning
        } else {
            DriftStatus::Stable
        };
        let aged = now_mono.saturating_sub(cal.created_at_mono) > self.max_age_ms;

        match status {
            DriftStatus::Critical => warn!(
                "critical calibration drift: {:.1}% (baseline {:.6} g, current {:.6} g)",
                drift_percent, cal.baseline_lta, lta
            ),
            DriftStatus::Warning => warn!(
                "calibration drift warning: {:.1}% (baseline {:.6} g)",
                drift_percent, cal.baseline_lta
            ),
            DriftStatus::Stable => {}
        }
        if aged {
            info!(
                "calibration is {:.1} h old; consider recalibrating",
                cal.age_hours(now_mono)
            );
        }

        Some(DriftOutcome {
            drift_percent,
            status,
            aged,
        })
    }
}
