// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Sink domain: the single consumer of both pipeline queues.
//!
//! Drains samples and events with a short dequeue timeout, maintains the
//! rolling sensor aggregate, and fans out to persistence, the broker, and
//! the push server. The sink may block briefly on I/O; it must never make
//! the sampler wait, which is why everything reaches it through the
//! bounded queues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::calibration::Calibration;
use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::pipeline::{Consumer, DropRateMonitor, Producer, SinkEvent, DEQUEUE_TIMEOUT};
use crate::record::{EventBroadcast, SampleBroadcast, SampleSummary, SeismicRecord, SystemEvent};
use crate::sensor::Sample;
use crate::storage::DataLogger;
use crate::streaming::{MqttClient, WsServer};
use crate::telemetry::Counters;

/// Samples aggregated per broadcast message.
const AGGREGATE_WINDOW: usize = 10;

/// Base broadcast interval in ms (10 Hz).
const BROADCAST_BASE_MS: u64 = 100;
/// Broadcast interval with more than three clients (6.7 Hz).
const BROADCAST_BUSY_MS: u64 = 150;
/// Broadcast interval under back-pressure degradation (5 Hz).
const BROADCAST_DEGRADED_MS: u64 = 200;

/// Drop-rate window and threshold for the back-pressure signal.
const DROP_WINDOW_MS: u64 = 10_000;
const DROP_THRESHOLD_PERCENT: f64 = 1.0;

/// Queue drain deadline at shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(1);

/// Sliding window over the most recent raw samples.
pub struct SampleAggregator {
    window: VecDeque<Sample>,
}

impl SampleAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(AGGREGATE_WINDOW),
        }
    }

    /// Push a sample, evicting the oldest once the window is full.
    pub fn push(&mut self, sample: Sample) {
        if self.window.len() == AGGREGATE_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }

    /// Aggregate the current window, if any samples have arrived.
    pub fn summary(&self) -> Option<SampleSummary> {
        let last = self.window.back()?;
        let n = self.window.len() as f64;
        let mut sum = (0.0, 0.0, 0.0, 0.0);
        let mut max_magnitude = 0.0f64;
        for s in &self.window {
            sum.0 += s.ax;
            sum.1 += s.ay;
            sum.2 += s.az;
            sum.3 += s.magnitude;
            max_magnitude = max_magnitude.max(s.magnitude);
        }
        Some(SampleSummary {
            ts_mono: last.ts_mono,
            accel_x: sum.0 / n,
            accel_y: sum.1 / n,
            accel_z: sum.2 / n,
            magnitude: sum.3 / n,
            max_magnitude,
            samples_averaged: self.window.len() as u32,
        })
    }
}

impl Default for SampleAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn broadcast_interval_ms(clients: usize, degraded: bool) -> u64 {
    if degraded {
        BROADCAST_DEGRADED_MS
    } else if clients > 3 {
        BROADCAST_BUSY_MS
    } else {
        BROADCAST_BASE_MS
    }
}

fn flat_description(record: &SeismicRecord) -> String {
    format!(
        "PGA={:.6}g, Est.Richter={:.2}, Local.Mag={:.2}, Duration={}ms",
        record.measurements.pga_g,
        record.measurements.richter,
        record.measurements.local_magnitude,
        record.measurements.duration_ms
    )
}

/// The sink consumer task state.
pub struct Sink {
    storage: Option<DataLogger>,
    mqtt: Option<Arc<MqttClient>>,
    ws: Option<Arc<WsServer>>,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
    calibration: Arc<RwLock<Calibration>>,
    sample_stats: Producer<Sample>,
    degraded: Arc<AtomicBool>,
    latest_summary: Arc<Mutex<Option<SampleSummary>>>,

    aggregator: SampleAggregator,
    drop_monitor: DropRateMonitor,
    last_broadcast_mono: u64,
    last_persist_mono: u64,
    sample_log_interval_ms: u64,
}

impl Sink {
    /// Assemble the sink from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Option<DataLogger>,
        mqtt: Option<Arc<MqttClient>>,
        ws: Option<Arc<WsServer>>,
        clock: Arc<dyn Clock>,
        counters: Arc<Counters>,
        calibration: Arc<RwLock<Calibration>>,
        sample_stats: Producer<Sample>,
        degraded: Arc<AtomicBool>,
        latest_summary: Arc<Mutex<Option<SampleSummary>>>,
        storage_cfg: &StorageConfig,
    ) -> Self {
        Self {
            storage,
            mqtt,
            ws,
            clock,
            counters,
            calibration,
            sample_stats,
            degraded,
            latest_summary,
            aggregator: SampleAggregator::new(),
            drop_monitor: DropRateMonitor::new(DROP_WINDOW_MS, DROP_THRESHOLD_PERCENT),
            last_broadcast_mono: 0,
            last_persist_mono: 0,
            sample_log_interval_ms: storage_cfg.sample_log_interval_ms,
        }
    }

    /// Run until shutdown, then drain both queues with a deadline.
    pub async fn run(
        mut self,
        mut samples: Consumer<Sample>,
        mut events: Consumer<SinkEvent>,
        shutdown: watch::Receiver<bool>,
    ) {
        info!("sink started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Some(sample) = samples.poll(DEQUEUE_TIMEOUT).await {
                self.handle_sample(sample);
            }
            if let Some(event) = events.poll(DEQUEUE_TIMEOUT).await {
                self.handle_event(event).await;
            }
            self.tick().await;
        }

        // Drain what is already queued, bounded by the deadline.
        let deadline = Instant::now() + DRAIN_DEADLINE;
        while Instant::now() < deadline {
            let mut idle = true;
            if let Some(sample) = samples.try_recv() {
                self.handle_sample(sample);
                idle = false;
            }
            if let Some(event) = events.try_recv() {
                self.handle_event(event).await;
                idle = false;
            }
            if idle {
                break;
            }
        }
        info!("sink stopped");
    }

    fn handle_sample(&mut self, sample: Sample) {
        self.aggregator.push(sample);
        let Some(summary) = self.aggregator.summary() else {
            return;
        };
        *self.latest_summary.lock().unwrap() = Some(summary);

        // Persisted sample summaries are rate-limited to ~1 Hz.
        if let Some(storage) = &self.storage {
            if sample.ts_mono.saturating_sub(self.last_persist_mono) >= self.sample_log_interval_ms
            {
                self.last_persist_mono = sample.ts_mono;
                if let Err(e) = storage.log_sample_summary(&summary) {
                    warn!("sample summary persist failed: {}", e);
                }
            }
        }
    }

    async fn handle_event(&mut self, event: SinkEvent) {
        match event {
            SinkEvent::Seismic(record) => self.handle_seismic(record).await,
            SinkEvent::System(event) => self.handle_system(event).await,
        }
    }

    async fn handle_seismic(&mut self, record: SeismicRecord) {
        info!(
            "sink forwarding event {} ({}, Richter {:.2})",
            record.event_id,
            record.classification.class.as_str(),
            record.measurements.richter
        );

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.append_seismic(&record) {
                warn!("seismic record persist failed: {}", e);
            }
            let description = flat_description(&record);
            if let Err(e) = storage.log_event(
                self.clock.as_ref(),
                record.classification.class.as_str(),
                &description,
                record.measurements.pga_g,
            ) {
                warn!("flat event persist failed: {}", e);
            }
        }

        if let Some(mqtt) = &self.mqtt {
            if let Err(e) = mqtt.publish_event(&record).await {
                warn!("event publish failed: {}", e);
            }
        }

        if let Some(ws) = &self.ws {
            let broadcast = EventBroadcast::from_record(&record, self.clock.now_mono());
            if let Err(e) = ws.broadcast_event(&broadcast) {
                warn!("event broadcast failed: {}", e);
            }
        }
    }

    async fn handle_system(&mut self, event: SystemEvent) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.log_system_event(self.clock.as_ref(), &event) {
                warn!("system event persist failed: {}", e);
            }
        }
        // Calibration outcomes are announced on the status topic so the
        // operator sees the result of a `calibrate` command.
        if let Some(mqtt) = &self.mqtt {
            let status = match event.kind.as_str() {
                "CALIBRATION_OK" => Some(serde_json::json!({
                    "status": "calibrated",
                    "message": event.description,
                })),
                "CALIBRATION_FAILED" => Some(serde_json::json!({
                    "status": "error",
                    "message": event.description,
                })),
                _ => None,
            };
            if let Some(status) = status {
                if let Err(e) = mqtt.publish_status(&status).await {
                    warn!("status publish failed: {}", e);
                }
            }
        }
    }

    async fn tick(&mut self) {
        let now = self.clock.now_mono();

        // Back-pressure: sample drops above threshold reduce the broadcast
        // cadence until a clean window passes.
        if let Some(rate) = self.drop_monitor.tick(
            now,
            self.sample_stats.offered(),
            self.sample_stats.dropped(),
        ) {
            let was_degraded = self.degraded.swap(rate.exceeded, Ordering::Relaxed);
            if rate.exceeded && !was_degraded {
                warn!(
                    "sample queue dropping {:.2}% over the last {}s; reducing broadcast rate",
                    rate.percent,
                    DROP_WINDOW_MS / 1000
                );
                if let Some(storage) = &self.storage {
                    let _ = storage.log_system_event(
                        self.clock.as_ref(),
                        &SystemEvent::new(
                            "BACKPRESSURE",
                            format!("sample queue drop rate {:.2}%", rate.percent),
                            rate.percent,
                        ),
                    );
                }
            } else if !rate.exceeded && was_degraded {
                info!("sample queue drop rate recovered");
            }
        }

        // Adaptive broadcast cadence.
        if let Some(ws) = &self.ws {
            let interval = broadcast_interval_ms(
                ws.client_count(),
                self.degraded.load(Ordering::Relaxed),
            );
            if now.saturating_sub(self.last_broadcast_mono) >= interval {
                let summary = *self.latest_summary.lock().unwrap();
                if let Some(summary) = summary {
                    self.last_broadcast_mono = now;
                    let calibrated = self.calibration.read().unwrap().valid;
                    let events = self.counters.events_detected.load(Ordering::Relaxed);
                    let msg = SampleBroadcast::new(&summary, now, calibrated, events);
                    if let Err(e) = ws.broadcast_sample(&msg) {
                        debug!("sample broadcast failed: {}", e);
                    }
                }
            }
        }

        // Hourly retention pass (gated inside the store).
        if let Some(storage) = &mut self.storage {
            if let Err(e) = storage.cleanup(self.clock.as_ref()) {
                warn!("retention cleanup failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts_mono: u64, magnitude: f64) -> Sample {
        Sample {
            ts_mono,
            ax: magnitude,
            ay: 0.0,
            az: 0.0,
            magnitude,
        }
    }

    #[test]
    fn test_aggregator_empty_has_no_summary() {
        let agg = SampleAggregator::new();
        assert!(agg.summary().is_none());
    }

    #[test]
    fn test_aggregator_means_and_max() {
        let mut agg = SampleAggregator::new();
        agg.push(sample(1, 0.01));
        agg.push(sample(2, 0.03));
        let summary = agg.summary().unwrap();
        assert_eq!(summary.samples_averaged, 2);
        assert_eq!(summary.ts_mono, 2);
        assert!((summary.magnitude - 0.02).abs() < 1e-12);
        assert!((summary.max_magnitude - 0.03).abs() < 1e-12);
        assert!((summary.accel_x - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_aggregator_window_slides() {
        let mut agg = SampleAggregator::new();
        for i in 0..15u64 {
            agg.push(sample(i, 1.0));
        }
        let summary = agg.summary().unwrap();
        assert_eq!(summary.samples_averaged, AGGREGATE_WINDOW as u32);
        assert_eq!(summary.ts_mono, 14);
    }

    #[test]
    fn test_broadcast_interval_adaptation() {
        assert_eq!(broadcast_interval_ms(1, false), 100);
        assert_eq!(broadcast_interval_ms(4, false), 150);
        // Degradation wins over client count.
        assert_eq!(broadcast_interval_ms(1, true), 200);
        assert_eq!(broadcast_interval_ms(10, true), 200);
    }
}
