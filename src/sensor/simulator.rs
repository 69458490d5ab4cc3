// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Simulated accelerometer for demo mode and testing.

use anyhow::Result;
use rand::prelude::*;
use rand_distr::Normal;

use super::{RawFrame, Sensor};

/// Simulates a level, stationary MPU6050 with Gaussian sensor noise and
/// occasional shake episodes.
pub struct SensorSimulator {
    rng: rand::rngs::StdRng,
    noise: Normal<f64>,

    // Fixed mounting bias so calibration has something to remove
    bias_x: f64,
    bias_y: f64,

    // Shake episode state
    shake_probability: f64,
    shake_remaining: u32,
    shake_amplitude: f64,
}

impl SensorSimulator {
    /// Create a simulator with the default noise floor (~0.4 mg RMS).
    pub fn new() -> Self {
        Self::with_seed(rand::rngs::StdRng::from_entropy())
    }

    fn with_seed(rng: rand::rngs::StdRng) -> Self {
        Self {
            rng,
            noise: Normal::new(0.0, 0.0004).expect("valid sigma"),
            bias_x: 0.012,
            bias_y: -0.008,
            shake_probability: 0.0,
            shake_remaining: 0,
            shake_amplitude: 0.0,
        }
    }

    /// Deterministic simulator for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_seed(rand::rngs::StdRng::seed_from_u64(seed))
    }

    /// Enable random shake episodes: per-sample start probability and
    /// peak amplitude in g. Each episode lasts a few hundred samples.
    pub fn with_shakes(mut self, probability: f64, amplitude_g: f64) -> Self {
        self.shake_probability = probability;
        self.shake_amplitude = amplitude_g;
        self
    }
}

impl Default for SensorSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for SensorSimulator {
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame> {
        if self.shake_remaining == 0 && self.rng.gen::<f64>() < self.shake_probability {
            self.shake_remaining = self.rng.gen_range(300..800);
        }

        let mut frame = RawFrame {
            ax: self.bias_x + self.noise.sample(&mut self.rng),
            ay: self.bias_y + self.noise.sample(&mut self.rng),
            az: 1.0 + self.noise.sample(&mut self.rng),
        };

        if self.shake_remaining > 0 {
            self.shake_remaining -= 1;
            let a = self.shake_amplitude * self.rng.gen_range(0.5..1.0);
            frame.ax += a * 0.6 * self.rng.gen_range(-1.0..1.0);
            frame.ay += a * 0.3 * self.rng.gen_range(-1.0..1.0);
            frame.az += a * 0.1 * self.rng.gen_range(-1.0..1.0);
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_simulator_reads_near_gravity() {
        let mut sim = SensorSimulator::seeded(7);
        sim.begin().unwrap();
        for _ in 0..100 {
            let f = sim.read().unwrap();
            assert!((f.magnitude() - 1.0).abs() < 0.1);
            assert!(f.ax.abs() < 0.1);
            assert!(f.ay.abs() < 0.1);
        }
    }

    #[test]
    fn test_seeded_simulator_is_deterministic() {
        let mut a = SensorSimulator::seeded(42);
        let mut b = SensorSimulator::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.read().unwrap(), b.read().unwrap());
        }
    }
}
