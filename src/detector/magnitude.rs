// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Single-station magnitude model.
//!
//! Scalar conversions between peak ground acceleration and magnitude
//! proxies. These are deliberately simple approximations appropriate for a
//! single uncorrected MEMS station, not network-grade seismology.

/// mm/s² per g.
const MM_S2_PER_G: f64 = 9806.65;

/// Richter magnitude proxy from peak ground acceleration.
///
/// `M = log10(PGA[mm/s²]) - offset`, clamped to [-2, 10].
pub fn richter(pga_g: f64, offset: f64) -> f64 {
    if pga_g <= 0.0 {
        return -2.0;
    }
    ((pga_g * MM_S2_PER_G).log10() - offset).clamp(-2.0, 10.0)
}

/// Local magnitude (ML) approximation for a single station.
///
/// Converts acceleration to a velocity amplitude assuming a ~5 Hz dominant
/// frequency, then applies the single-station ML formula without a distance
/// correction. Clamped to [-3, 8].
pub fn local_magnitude(pga_g: f64, offset: f64) -> f64 {
    if pga_g <= 0.0 {
        return -3.0;
    }
    let velocity = pga_g / (2.0 * std::f64::consts::PI * 5.0);
    ((velocity * 1e6).log10() - 2.0 - offset).clamp(-3.0, 8.0)
}

/// Gutenberg-Richter radiated energy: `log10(E) = 11.8 + 1.5 M`, in joules.
/// Returns 0 for magnitudes below the model's validity floor.
pub fn energy_joules(richter: f64) -> f64 {
    if richter < -2.0 {
        return 0.0;
    }
    10f64.powf(11.8 + 1.5 * richter).clamp(1.0, 1e20)
}

/// Legacy peak-frequency heuristic: `30 - 50 * PGA`, clamped to [1, 30] Hz.
///
/// Kept only for record compatibility; the relationship is not
/// dimensionally defensible and must not be treated as a measurement.
pub fn peak_frequency_hz(pga_g: f64) -> f64 {
    (30.0 - pga_g * 50.0).clamp(1.0, 30.0)
}

/// Inverse of [`richter`]: PGA in g for a target magnitude, clamped to
/// [1e-4, 10] g. Used by the simulation path.
pub fn pga_from_richter(richter: f64, offset: f64) -> f64 {
    let r = richter.clamp(-2.0, 10.0);
    (10f64.powf(r + offset) / MM_S2_PER_G).clamp(1e-4, 10.0)
}

/// Empirical event duration for a simulated magnitude, in milliseconds.
///
/// Piecewise linear in Richter magnitude, clamped to [100 ms, 300 s].
pub fn synthetic_duration_ms(richter: f64) -> u64 {
    let ms = if richter < 2.0 {
        100.0 + richter * 200.0
    } else if richter < 4.0 {
        1000.0 + (richter - 2.0) * 2000.0
    } else if richter < 6.0 {
        5000.0 + (richter - 4.0) * 12500.0
    } else if richter < 7.0 {
        30000.0 + (richter - 6.0) * 90000.0
    } else {
        120000.0 + (richter - 7.0) * 180000.0
    };
    (ms as u64).clamp(100, 300_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_richter_reference_points() {
        // 1 g -> log10(9806.65) = 3.99
        assert!((richter(1.0, 0.0) - 3.9915).abs() < 1e-3);
        // Tiny accelerations clamp at the floor.
        assert!((richter(1e-9, 0.0) + 2.0).abs() < 1e-9);
        assert_eq!(richter(0.0, 0.0), -2.0);
        // Huge accelerations clamp at the ceiling.
        assert_eq!(richter(1e8, 0.0), 10.0);
    }

    #[test]
    fn test_richter_pga_round_trip() {
        // richter(pga_from_richter(R)) == R within 1e-3 over [0, 8].
        let mut r = 0.0;
        while r <= 8.0 {
            let pga = pga_from_richter(r, 0.0);
            assert!(
                (richter(pga, 0.0) - r).abs() < 1e-3,
                "round trip failed at R={}",
                r
            );
            r += 0.25;
        }
    }

    #[test]
    fn test_round_trip_respects_offset() {
        let pga = pga_from_richter(4.0, 1.5);
        assert!((richter(pga, 1.5) - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_energy_scaling() {
        // One magnitude step is a factor of 10^1.5 in energy.
        let e4 = energy_joules(4.0);
        let e5 = energy_joules(5.0);
        assert!((e5 / e4 - 10f64.powf(1.5)).abs() < 1e-6 * e5 / e4);
        assert_eq!(energy_joules(-3.0), 0.0);
        assert_eq!(energy_joules(9.0), 1e20);
    }

    #[test]
    fn test_peak_frequency_clamps() {
        assert!((peak_frequency_hz(0.0) - 30.0).abs() < 1e-9);
        assert!((peak_frequency_hz(0.1) - 25.0).abs() < 1e-9);
        assert!((peak_frequency_hz(1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_synthetic_duration_table() {
        assert_eq!(synthetic_duration_ms(0.0), 100);
        assert_eq!(synthetic_duration_ms(1.0), 300);
        assert_eq!(synthetic_duration_ms(2.0), 1000);
        assert_eq!(synthetic_duration_ms(3.0), 3000);
        assert_eq!(synthetic_duration_ms(4.0), 5000);
        assert_eq!(synthetic_duration_ms(5.0), 17_500);
        assert_eq!(synthetic_duration_ms(6.0), 30_000);
        assert_eq!(synthetic_duration_ms(7.0), 120_000);
        assert_eq!(synthetic_duration_ms(8.0), 300_000);
        assert_eq!(synthetic_duration_ms(12.0), 300_000);
    }

    #[test]
    fn test_local_magnitude_monotonic() {
        let a = local_magnitude(0.01, 0.0);
        let b = local_magnitude(0.1, 0.0);
        let c = local_magnitude(1.0, 0.0);
        assert!(a < b && b < c);
        assert_eq!(local_magnitude(0.0, 0.0), -3.0);
    }
}
