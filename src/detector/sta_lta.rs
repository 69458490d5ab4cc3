// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! STA/LTA trigger core.
//!
//! Two fixed-capacity ring buffers hold the short- and long-term magnitude
//! windows. Sums are maintained incrementally on every admitted sample —
//! never recomputed from scratch on the hot path — so each update is O(1)
//! regardless of window size.

use crate::config::DetectorConfig;

/// Sliding short/long-term average state.
pub struct StaLta {
    sta_buf: Vec<f64>,
    lta_buf: Vec<f64>,
    sta_idx: usize,
    lta_idx: usize,
    sta_sum: f64,
    lta_sum: f64,
    sta_full: bool,
    lta_full: bool,
    trigger_ratio: f64,
}

impl StaLta {
    /// Create a detector with the given window lengths and trigger ratio.
    pub fn new(sta_window: usize, lta_window: usize, trigger_ratio: f64) -> Self {
        Self {
            sta_buf: vec![0.0; sta_window.max(1)],
            lta_buf: vec![0.0; lta_window.max(1)],
            sta_idx: 0,
            lta_idx: 0,
            sta_sum: 0.0,
            lta_sum: 0.0,
            sta_full: false,
            lta_full: false,
            trigger_ratio,
        }
    }

    /// Admit one magnitude into both windows.
    pub fn update(&mut self, magnitude: f64) {
        self.sta_sum -= self.sta_buf[self.sta_idx];
        self.sta_buf[self.sta_idx] = magnitude;
        self.sta_sum += magnitude;
        self.sta_idx = (self.sta_idx + 1) % self.sta_buf.len();
        if self.sta_idx == 0 {
            self.sta_full = true;
        }

        self.lta_sum -= self.lta_buf[self.lta_idx];
        self.lta_buf[self.lta_idx] = magnitude;
        self.lta_sum += magnitude;
        self.lta_idx = (self.lta_idx + 1) % self.lta_buf.len();
        if self.lta_idx == 0 {
            self.lta_full = true;
        }
    }

    /// Short-term average, available once the STA window has filled.
    pub fn sta(&self) -> Option<f64> {
        self.sta_full.then(|| self.sta_sum / self.sta_buf.len() as f64)
    }

    /// Long-term average, available once the LTA window has filled.
    pub fn lta(&self) -> Option<f64> {
        self.lta_full.then(|| self.lta_sum / self.lta_buf.len() as f64)
    }

    /// Current STA/LTA ratio, or `None` before warm-up or with a zero LTA.
    pub fn ratio(&self) -> Option<f64> {
        let sta = self.sta()?;
        let lta = self.lta()?;
        if self.lta_sum == 0.0 {
            return None;
        }
        Some(sta / lta)
    }

    /// Whether the trigger condition currently holds.
    pub fn triggered(&self) -> bool {
        matches!(self.ratio(), Some(r) if r > self.trigger_ratio)
    }

    /// Window lengths as (sta, lta) sample counts.
    pub fn windows(&self) -> (usize, usize) {
        (self.sta_buf.len(), self.lta_buf.len())
    }

    #[cfg(test)]
    fn sums_match_buffers(&self) -> bool {
        let sta: f64 = self.sta_buf.iter().sum();
        let lta: f64 = self.lta_buf.iter().sum();
        (sta - self.sta_sum).abs() < 1e-9 && (lta - self.lta_sum).abs() < 1e-9
    }
}

/// Noise-adaptive detection thresholds.
///
/// Every update interval the background noise (the current LTA, floored at
/// 1 mg) scales the three base thresholds by `1 + noise/micro_base`,
/// clamped to [0.5x, 3x] of each base. Disabled mode always reports the
/// bases.
pub struct AdaptiveThresholds {
    base_micro: f64,
    base_light: f64,
    base_strong: f64,
    micro: f64,
    light: f64,
    strong: f64,
    background_noise: f64,
    enabled: bool,
    update_interval_ms: u64,
    last_update_mono: u64,
}

/// Noise floor applied to the LTA before threshold adaptation, in g.
const NOISE_FLOOR_G: f64 = 0.001;

impl AdaptiveThresholds {
    /// Build thresholds from detector configuration.
    pub fn new(cfg: &DetectorConfig) -> Self {
        Self {
            base_micro: cfg.threshold_micro,
            base_light: cfg.threshold_light,
            base_strong: cfg.threshold_strong,
            micro: cfg.threshold_micro,
            light: cfg.threshold_light,
            strong: cfg.threshold_strong,
            background_noise: NOISE_FLOOR_G,
            enabled: cfg.adaptive_thresholds,
            update_interval_ms: cfg.adaptive_update_interval_ms,
            last_update_mono: 0,
        }
    }

    /// Recompute thresholds if the update interval has elapsed and the LTA
    /// window is available.
    pub fn update(&mut self, now_mono: u64, lta: Option<f64>) {
        if !self.enabled {
            return;
        }
        if now_mono.saturating_sub(self.last_update_mono) < self.update_interval_ms {
            return;
        }
        let Some(lta) = lta else {
            return;
        };
        self.last_update_mono = now_mono;

        let noise = if lta.is_nan() { NOISE_FLOOR_G } else { lta.max(NOISE_FLOOR_G) };
        self.background_noise = noise;

        let factor = (1.0 + noise / self.base_micro).clamp(0.5, 3.0);
        self.micro = Self::adapt(self.base_micro, factor);
        self.light = Self::adapt(self.base_light, factor);
        self.strong = Self::adapt(self.base_strong, factor);
    }

    fn adapt(base: f64, factor: f64) -> f64 {
        let value = base * factor;
        if value.is_nan() || value <= 0.0 {
            return base;
        }
        value.clamp(base * 0.5, base * 3.0)
    }

    /// Active micro threshold in g.
    pub fn micro(&self) -> f64 {
        if self.enabled {
            self.micro
        } else {
            self.base_micro
        }
    }

    /// Active light threshold in g.
    pub fn light(&self) -> f64 {
        if self.enabled {
            self.light
        } else {
            self.base_light
        }
    }

    /// Active strong threshold in g.
    pub fn strong(&self) -> f64 {
        if self.enabled {
            self.strong
        } else {
            self.base_strong
        }
    }

    /// Last background noise estimate in g.
    pub fn background_noise(&self) -> f64 {
        self.background_noise
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_detector() -> StaLta {
        StaLta::new(5, 100, 2.5)
    }

    #[test]
    fn test_not_triggered_before_warm_up() {
        let mut d = small_detector();
        for _ in 0..99 {
            d.update(1.0);
        }
        // LTA window not yet full.
        assert!(d.lta().is_none());
        assert!(!d.triggered());
    }

    #[test]
    fn test_zero_lta_never_triggers() {
        let mut d = small_detector();
        for _ in 0..150 {
            d.update(0.0);
        }
        assert!(d.ratio().is_none());
        assert!(!d.triggered());
    }

    #[test]
    fn test_windowed_sums_track_buffers() {
        // Windowed-sum fidelity: the incremental sums equal the buffer sums
        // at every step of an arbitrary stream.
        let mut d = small_detector();
        let mut value = 0.013;
        for i in 0..500 {
            value = (value * 1.7 + i as f64 * 0.001) % 0.05;
            d.update(value);
            assert!(d.sums_match_buffers(), "sum drift at step {}", i);
        }
    }

    #[test]
    fn test_step_increase_triggers_exactly_once() {
        // A steady level held past the LTA window, then quadrupled past the
        // STA window, must raise the trigger exactly one interval.
        let mut d = small_detector();
        for _ in 0..100 {
            d.update(0.001);
        }
        assert!(!d.triggered());

        let mut rising_edges = 0;
        let mut was_triggered = false;
        for _ in 0..200 {
            d.update(0.004);
            let now = d.triggered();
            if now && !was_triggered {
                rising_edges += 1;
            }
            was_triggered = now;
        }
        assert_eq!(rising_edges, 1);
        // Once the LTA catches up the ratio relaxes back below the trigger.
        assert!(!d.triggered());
    }

    #[test]
    fn test_ratio_for_known_stream() {
        let mut d = StaLta::new(2, 4, 2.5);
        for m in [0.001, 0.001, 0.001, 0.001] {
            d.update(m);
        }
        // sta = lta = 0.001 -> ratio 1
        assert!((d.ratio().unwrap() - 1.0).abs() < 1e-9);
        d.update(0.004);
        d.update(0.004);
        // sta = 0.004, lta = (0.001+0.001+0.004+0.004)/4 = 0.0025
        assert!((d.ratio().unwrap() - 1.6).abs() < 1e-9);
    }

    fn adaptive_config() -> DetectorConfig {
        DetectorConfig::default()
    }

    #[test]
    fn test_adaptive_thresholds_scale_with_noise() {
        let mut t = AdaptiveThresholds::new(&adaptive_config());
        assert!((t.micro() - 0.001).abs() < 1e-12);

        // Noise at 2 mg: factor = 1 + 0.002/0.001 = 3 (at the clamp).
        t.update(30_000, Some(0.002));
        assert!((t.micro() - 0.003).abs() < 1e-12);
        assert!((t.light() - 0.015).abs() < 1e-12);
        assert!((t.strong() - 0.06).abs() < 1e-12);
        assert!((t.background_noise() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_adaptive_thresholds_floor_quiet_noise() {
        let mut t = AdaptiveThresholds::new(&adaptive_config());
        // Quieter than the floor: noise clamps to 1 mg, factor 2.
        t.update(30_000, Some(0.00001));
        assert!((t.background_noise() - 0.001).abs() < 1e-12);
        assert!((t.micro() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_adaptive_thresholds_respect_interval() {
        let mut t = AdaptiveThresholds::new(&adaptive_config());
        t.update(30_000, Some(0.002));
        let micro = t.micro();
        // Too soon: no change even with different noise.
        t.update(40_000, Some(0.0001));
        assert!((t.micro() - micro).abs() < 1e-12);
        // Due again: re-adapts.
        t.update(60_000, Some(0.0001));
        assert!((t.micro() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_disabled_thresholds_stay_at_base() {
        let cfg = DetectorConfig {
            adaptive_thresholds: false,
            ..DetectorConfig::default()
        };
        let mut t = AdaptiveThresholds::new(&cfg);
        t.update(30_000, Some(0.01));
        assert!((t.micro() - 0.001).abs() < 1e-12);
        assert!((t.strong() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_nan_lta_falls_back_to_base() {
        let mut t = AdaptiveThresholds::new(&adaptive_config());
        t.update(30_000, Some(f64::NAN));
        // NaN noise is replaced by the floor; thresholds stay finite.
        assert!(t.micro().is_finite());
        assert!(t.micro() > 0.0);
    }
}
