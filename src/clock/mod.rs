// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Boot-relative monotonic time and validated wall-clock time.
//!
//! Event identity depends on wall-clock time being synchronized against an
//! external reference. No other component reads the wall clock directly;
//! everything goes through [`Clock`] so that the trust predicate is applied
//! in exactly one place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Earliest wall-clock value accepted as plausible (2020-01-01T00:00:00Z).
/// Anything below this is a cold RTC or an unset host clock.
pub const WALL_CLOCK_EPOCH_FLOOR: u64 = 1_577_836_800;

/// Time source used for event identity and record stamping.
pub trait Clock: Send + Sync {
    /// Milliseconds since boot (monotonic, never goes backwards).
    fn now_mono(&self) -> u64;

    /// Seconds since the Unix epoch.
    fn now_wall(&self) -> u64;

    /// Whether the wall clock may be used for event identity.
    fn trusted(&self) -> bool;

    /// Format a wall-clock timestamp as ISO-8601 UTC.
    fn format_iso(&self, ts_wall: u64) -> String {
        format_iso_utc(ts_wall)
    }
}

/// Format an epoch-seconds timestamp as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_iso_utc(ts_wall: u64) -> String {
    chrono::DateTime::from_timestamp(ts_wall as i64, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}

/// Production clock backed by the host monotonic and wall clocks.
///
/// Sync events are recorded through [`SystemClock::record_sync`] by the
/// external synchronization task. A wall-clock value is trusted only while
/// the last sync is younger than twice the sync interval AND the reported
/// time is past [`WALL_CLOCK_EPOCH_FLOOR`].
pub struct SystemClock {
    boot: Instant,
    sync_interval_ms: u64,
    /// Monotonic ms of the last successful sync; `u64::MAX` = never synced.
    last_sync_mono: AtomicU64,
}

impl SystemClock {
    /// Create a clock with the given sync interval.
    pub fn new(sync_interval: Duration) -> Self {
        Self {
            boot: Instant::now(),
            sync_interval_ms: sync_interval.as_millis() as u64,
            last_sync_mono: AtomicU64::new(u64::MAX),
        }
    }

    /// Record a successful external synchronization at the current instant.
    pub fn record_sync(&self) {
        self.last_sync_mono.store(self.now_mono(), Ordering::Relaxed);
    }

    /// Monotonic ms of the last successful sync, if any.
    pub fn last_sync(&self) -> Option<u64> {
        match self.last_sync_mono.load(Ordering::Relaxed) {
            u64::MAX => None,
            v => Some(v),
        }
    }
}

impl Clock for SystemClock {
    fn now_mono(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    fn now_wall(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn trusted(&self) -> bool {
        let last = self.last_sync_mono.load(Ordering::Relaxed);
        if last == u64::MAX {
            return false;
        }
        let fresh = self.now_mono().saturating_sub(last) < self.sync_interval_ms * 2;
        fresh && self.now_wall() > WALL_CLOCK_EPOCH_FLOOR
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Manually driven clock for deterministic tests.
    pub struct FakeClock {
        pub mono: AtomicU64,
        pub wall: AtomicU64,
        pub trusted: AtomicBool,
    }

    impl FakeClock {
        pub fn new(wall: u64, trusted: bool) -> Self {
            Self {
                mono: AtomicU64::new(0),
                wall: AtomicU64::new(wall),
                trusted: AtomicBool::new(trusted),
            }
        }

        pub fn advance(&self, ms: u64) {
            self.mono.fetch_add(ms, Ordering::Relaxed);
        }

        pub fn set_trusted(&self, v: bool) {
            self.trusted.store(v, Ordering::Relaxed);
        }
    }

    impl Clock for FakeClock {
        fn now_mono(&self) -> u64 {
            self.mono.load(Ordering::Relaxed)
        }

        fn now_wall(&self) -> u64 {
            self.wall.load(Ordering::Relaxed)
        }

        fn trusted(&self) -> bool {
            self.trusted.load(Ordering::Relaxed)
        }
    }
}
