// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Startup orchestration and the two execution domains.
//!
//! The engine constructs every component explicitly and injects references;
//! nothing is looked up through globals. The sampler runs on a dedicated OS
//! thread with a fixed period and no blocking I/O; the sink and all network
//! adapters run as tokio tasks. The bounded pipeline queues are the only
//! mutable channel between the two domains.

use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::calibration::{self, Calibration, DriftMonitor, DriftStatus};
use crate::clock::{Clock, SystemClock, WALL_CLOCK_EPOCH_FLOOR};
use crate::config::{CalibrationConfig, Config};
use crate::detector::{Detector, Emit};
use crate::pipeline::{self, Producer, SinkEvent, EVENT_QUEUE_CAPACITY, SAMPLE_QUEUE_CAPACITY};
use crate::record::{SampleSummary, SystemEvent};
use crate::sensor::{Sample, Sensor, SensorSimulator};
use crate::sink::Sink;
use crate::storage::DataLogger;
use crate::streaming::{BrokerCommand, MqttClient, WsServer};
use crate::telemetry::{Counters, HealthSample, Watchdog};

/// Everything the health snapshot needs, shared by the telemetry and
/// command tasks.
struct HealthContext {
    clock: Arc<SystemClock>,
    counters: Arc<Counters>,
    calibration: Arc<RwLock<Calibration>>,
    sample_stats: Producer<Sample>,
    event_stats: Producer<SinkEvent>,
    ws: Option<Arc<WsServer>>,
    mqtt: Option<Arc<MqttClient>>,
    degraded: Arc<AtomicBool>,
}

impl HealthContext {
    fn sample(&self) -> HealthSample {
        let cal = *self.calibration.read().unwrap();
        let trusted = self.clock.trusted();
        HealthSample {
            kind: "status",
            timestamp: self.clock.now_mono(),
            uptime_secs: self.clock.now_mono() / 1000,
            counters: self.counters.snapshot(),
            sample_queue_depth: self.sample_stats.depth(),
            samples_dropped: self.sample_stats.dropped(),
            event_queue_depth: self.event_stats.depth(),
            events_dropped: self.event_stats.dropped(),
            calibrated: cal.created_at_mono > 0,
            calibration_valid: cal.valid,
            time_trusted: trusted,
            ntp_timestamp: trusted.then(|| self.clock.now_wall()),
            connected_clients: self.ws.as_ref().map(|w| w.client_count()).unwrap_or(0),
            streaming_enabled: self
                .ws
                .as_ref()
                .map(|w| w.streaming_enabled())
                .unwrap_or(false),
            mqtt_connected: self.mqtt.as_ref().map(|m| m.is_connected()).unwrap_or(false),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// Startup orchestrator for a seismograph station.
pub struct Engine;

impl Engine {
    /// Bring up the full stack with the sensor selected by configuration
    /// and run until shutdown.
    pub async fn run(config: Config) -> Result<()> {
        if !config.demo_mode {
            bail!(
                "no hardware register bus is wired on this build; \
                 run with --demo or embed via Engine::run_with_sensor"
            );
        }
        let sensor = Box::new(SensorSimulator::new().with_shakes(0.0002, 0.03));
        Self::run_with_sensor(config, sensor).await
    }

    /// Bring up the full stack around a caller-provided sensor.
    pub async fn run_with_sensor(config: Config, mut sensor: Box<dyn Sensor>) -> Result<()> {
        info!("Starting {} v{}...", crate::NAME, crate::VERSION);

        let clock = Arc::new(SystemClock::new(Duration::from_secs(
            config.telemetry.sync_interval_secs,
        )));
        let counters = Arc::new(Counters::new());
        let calibration = Arc::new(RwLock::new(Calibration::none()));
        let degraded = Arc::new(AtomicBool::new(false));
        let latest_summary: Arc<Mutex<Option<SampleSummary>>> = Arc::new(Mutex::new(None));
        let debug_mode = Arc::new(AtomicBool::new(false));

        // Sensor hard failure at boot is fatal; detection never starts.
        sensor
            .begin()
            .context("sensor initialization failed, refusing to start detection")?;

        let storage = if config.storage.enabled {
            let logger = DataLogger::open(&config.data_dir, config.storage.retention_days)?;
            logger.log_system_event(
                clock.as_ref(),
                &SystemEvent::new("SYSTEM_START", "station starting", 0.0),
            )?;
            Some(logger)
        } else {
            None
        };

        // Pipeline queues: the only cross-domain mutable channel.
        let (sample_tx, sample_rx) = pipeline::channel::<Sample>(SAMPLE_QUEUE_CAPACITY);
        let (event_tx, event_rx) = pipeline::channel::<SinkEvent>(EVENT_QUEUE_CAPACITY);

        // Command plumbing and streaming adapters.
        let (command_tx, mut command_rx) = mpsc::channel::<BrokerCommand>(8);
        let mqtt = if config.streaming.mqtt_enabled {
            Some(Arc::new(MqttClient::new(
                &config.streaming,
                &config.station_id,
                command_tx.clone(),
            )?))
        } else {
            None
        };
        let ws = if config.streaming.websocket_enabled {
            let server = Arc::new(WsServer::new(
                config.streaming.websocket_port,
                config.streaming.websocket_max_clients,
            ));
            server.start().await?;
            Some(server)
        } else {
            None
        };

        // Shutdown plumbing: an atomic flag for the sampler thread, a watch
        // channel for the async tasks.
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fatal = Arc::new(AtomicBool::new(false));

        // Wall-clock sync task: validates the host clock (which the OS
        // disciplines via NTP) and records the sync event on the Clock.
        {
            let clock = clock.clone();
            let mut shutdown = shutdown_rx.clone();
            let interval = Duration::from_secs(config.telemetry.sync_interval_secs.max(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if clock.now_wall() > WALL_CLOCK_EPOCH_FLOOR {
                                clock.record_sync();
                                debug!("wall clock validated and sync recorded");
                            } else {
                                warn!("host wall clock implausible; event records stay disabled");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            });
        }

        // Sink domain.
        let sink = Sink::new(
            storage,
            mqtt.clone(),
            ws.clone(),
            clock.clone(),
            counters.clone(),
            calibration.clone(),
            sample_tx.clone(),
            degraded.clone(),
            latest_summary.clone(),
            &config.storage,
        );
        let sink_handle = tokio::spawn(sink.run(sample_rx, event_rx, shutdown_rx.clone()));

        // Sampler domain: dedicated thread, boot calibration first.
        let calibrate_req = Arc::new(AtomicBool::new(true));
        let sampler_handle = {
            let handles = SamplerHandles {
                sensor,
                clock: clock.clone(),
                calibration: calibration.clone(),
                detector: Detector::new(&config.detector, config.sampling.rate_hz, counters.clone()),
                drift: DriftMonitor::new(&config.calibration),
                sample_tx: sample_tx.clone(),
                event_tx: event_tx.clone(),
                shutdown: shutdown_flag.clone(),
                calibrate_req: calibrate_req.clone(),
                counters: counters.clone(),
                cal_cfg: config.calibration.clone(),
                debug_mode: debug_mode.clone(),
                period: config.sampling.period(),
            };
            std::thread::Builder::new()
                .name("sampler".to_string())
                .spawn(move || run_sampler(handles))
                .context("spawning sampler thread")?
        };

        let health = Arc::new(HealthContext {
            clock: clock.clone(),
            counters: counters.clone(),
            calibration: calibration.clone(),
            sample_stats: sample_tx.clone(),
            event_stats: event_tx.clone(),
            ws: ws.clone(),
            mqtt: mqtt.clone(),
            degraded: degraded.clone(),
        });

        // Telemetry task: health snapshots, scheduled broker publishes,
        // sampler watchdog.
        {
            let health = health.clone();
            let clock = clock.clone();
            let latest_summary = latest_summary.clone();
            let station_id = config.station_id.clone();
            let debug_mode = debug_mode.clone();
            let fatal = fatal.clone();
            let shutdown_tx = shutdown_tx.clone();
            let mut shutdown = shutdown_rx.clone();
            let health_interval = Duration::from_secs(config.telemetry.health_interval_secs.max(1));
            let status_interval_ms = config.streaming.mqtt_status_interval_secs * 1000;
            let heartbeat_interval_ms = config.streaming.mqtt_heartbeat_interval_secs * 1000;
            let data_interval_ms = config.streaming.mqtt_data_interval_secs * 1000;
            let mut watchdog = Watchdog::new(Duration::from_secs(
                config.telemetry.watchdog_timeout_secs,
            ));

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(health_interval);
                let mut last_status = 0u64;
                let mut last_heartbeat = 0u64;
                let mut last_data = 0u64;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.changed() => break,
                    }
                    let snapshot = health.sample();
                    if debug_mode.load(Ordering::Relaxed) {
                        debug!(
                            "health: {} samples, {} events, {} spikes, queues {}/{}",
                            snapshot.counters.total_samples,
                            snapshot.counters.events_detected,
                            snapshot.counters.spikes_filtered,
                            snapshot.sample_queue_depth,
                            snapshot.event_queue_depth
                        );
                    }

                    if !watchdog.check(snapshot.counters.total_samples) {
                        error!("sampler watchdog tripped: no progress, forcing restart");
                        health.event_stats.offer(SinkEvent::System(SystemEvent::new(
                            "WATCHDOG_TRIPPED",
                            "sampler made no progress within the watchdog timeout",
                            snapshot.counters.total_samples as f64,
                        )));
                        fatal.store(true, Ordering::Relaxed);
                        let _ = shutdown_tx.send(true);
                        break;
                    }

                    if snapshot.event_queue_depth * 5 >= EVENT_QUEUE_CAPACITY * 4 {
                        warn!(
                            "event queue nearly full ({}/{})",
                            snapshot.event_queue_depth, EVENT_QUEUE_CAPACITY
                        );
                    }

                    if let Some(ws) = &health.ws {
                        let _ = ws.broadcast_status(&snapshot).await;
                    }

                    let now = clock.now_mono();
                    if let Some(mqtt) = &health.mqtt {
                        if now.saturating_sub(last_status) >= status_interval_ms {
                            last_status = now;
                            if let Err(e) = mqtt.publish_status(&snapshot).await {
                                warn!("status publish failed: {}", e);
                            }
                        }
                        if now.saturating_sub(last_heartbeat) >= heartbeat_interval_ms {
                            last_heartbeat = now;
                            let heartbeat = serde_json::json!({
                                "status": "online",
                                "station": station_id,
                                "uptime_secs": snapshot.uptime_secs,
                                "events_detected": snapshot.counters.events_detected,
                                "time_trusted": snapshot.time_trusted,
                            });
                            let _ = mqtt.publish_status(&heartbeat).await;
                        }
                        if now.saturating_sub(last_data) >= data_interval_ms {
                            last_data = now;
                            let summary = *latest_summary.lock().unwrap();
                            if let Some(summary) = summary {
                                let data = serde_json::json!({
                                    "station": station_id,
                                    "timestamp": snapshot.ntp_timestamp,
                                    "accel_x": summary.accel_x,
                                    "accel_y": summary.accel_y,
                                    "accel_z": summary.accel_z,
                                    "magnitude": summary.magnitude,
                                    "max_magnitude": summary.max_magnitude,
                                    "ntp_valid": snapshot.time_trusted,
                                });
                                let _ = mqtt.publish_data(&data).await;
                            }
                        }
                    }
                }
            });
        }

        // Broker command handler.
        {
            let health = health.clone();
            let calibrate_req = calibrate_req.clone();
            let debug_mode = debug_mode.clone();
            let shutdown_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                while let Some(command) = command_rx.recv().await {
                    match command {
                        BrokerCommand::Restart => {
                            info!("restart requested via broker");
                            if let Some(mqtt) = &health.mqtt {
                                let _ = mqtt
                                    .publish_status(&serde_json::json!({
                                        "status": "restarting",
                                        "message": "restart command received",
                                    }))
                                    .await;
                            }
                            let _ = shutdown_tx.send(true);
                        }
                        BrokerCommand::Calibrate => {
                            info!("calibration requested via broker");
                            calibrate_req.store(true, Ordering::Relaxed);
                            if let Some(mqtt) = &health.mqtt {
                                let _ = mqtt
                                    .publish_status(&serde_json::json!({
                                        "status": "calibrating",
                                        "message": "calibration started",
                                    }))
                                    .await;
                            }
                        }
                        BrokerCommand::Debug => {
                            let was = debug_mode.fetch_xor(true, Ordering::Relaxed);
                            let state = if was { "disabled" } else { "enabled" };
                            info!("debug mode {} via broker", state);
                            if let Some(mqtt) = &health.mqtt {
                                let _ = mqtt
                                    .publish_status(&serde_json::json!({
                                        "status": "debug",
                                        "message": format!("debug mode {}", state),
                                    }))
                                    .await;
                            }
                        }
                        BrokerCommand::Status => {
                            let snapshot = health.sample();
                            if let Some(mqtt) = &health.mqtt {
                                let _ = mqtt.publish_status(&snapshot).await;
                            }
                            if let Some(ws) = &health.ws {
                                let _ = ws.broadcast_status(&snapshot).await;
                            }
                        }
                    }
                }
            });
        }

        info!("{} running; press Ctrl+C to shut down", crate::NAME);

        // Wait for an external signal or an internal shutdown request.
        let mut shutdown_watch = shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
            _ = shutdown_watch.changed() => info!("internal shutdown requested"),
        }

        // Cooperative teardown: sampler finishes its period, sink drains
        // with a deadline, tasks observe the watch channel.
        shutdown_flag.store(true, Ordering::Relaxed);
        let _ = shutdown_tx.send(true);

        tokio::task::spawn_blocking(move || {
            if sampler_handle.join().is_err() {
                error!("sampler thread panicked");
            }
        })
        .await
        .ok();

        if tokio::time::timeout(Duration::from_secs(2), sink_handle)
            .await
            .is_err()
        {
            warn!("sink did not drain before the deadline");
        }

        if fatal.load(Ordering::Relaxed) {
            bail!("sampler watchdog tripped");
        }
        info!("{} shutdown complete", crate::NAME);
        Ok(())
    }
}

struct SamplerHandles {
    sensor: Box<dyn Sensor>,
    clock: Arc<SystemClock>,
    calibration: Arc<RwLock<Calibration>>,
    detector: Detector,
    drift: DriftMonitor,
    sample_tx: Producer<Sample>,
    event_tx: Producer<SinkEvent>,
    shutdown: Arc<AtomicBool>,
    calibrate_req: Arc<AtomicBool>,
    counters: Arc<Counters>,
    cal_cfg: CalibrationConfig,
    debug_mode: Arc<AtomicBool>,
    period: Duration,
}

/// The sampler loop: sensor -> calibration offsets -> detector -> queues.
///
/// Runs at a fixed period with drift-free pacing. No blocking I/O, no
/// allocation per sample; the only out-edges are non-blocking enqueues.
/// Calibration is a distinct mode of this loop, never concurrent with it.
fn run_sampler(mut h: SamplerHandles) {
    info!("sampler started ({} ms period)", h.period.as_millis());
    let mut last_sample = Sample::default();
    let mut next_deadline = Instant::now();

    loop {
        if h.shutdown.load(Ordering::Relaxed) {
            break;
        }

        // Calibration suspends sampling by construction.
        if h.calibrate_req.swap(false, Ordering::Relaxed) {
            run_calibration(&mut h);
            next_deadline = Instant::now();
            continue;
        }

        let ts_mono = h.clock.now_mono();
        let cal = *h.calibration.read().unwrap();
        let sample = match h.sensor.read() {
            Ok(frame) => {
                let (ax, ay, az) = cal.apply(&frame);
                let magnitude = (ax * ax + ay * ay + az * az).sqrt();
                Sample { ts_mono, ax, ay, az, magnitude }
            }
            Err(e) => {
                // Transient read failure: keep the previous components,
                // zero the magnitude, advance time so pacing holds.
                h.counters.sensor_read_errors.fetch_add(1, Ordering::Relaxed);
                if h.debug_mode.load(Ordering::Relaxed) {
                    debug!("sensor read failed: {}", e);
                }
                Sample { ts_mono, magnitude: 0.0, ..last_sample }
            }
        };
        last_sample = sample;

        h.counters.total_samples.fetch_add(1, Ordering::Relaxed);
        h.counters.set_last_magnitude(sample.magnitude);
        h.sample_tx.offer(sample);

        if let Some(outcome) = h.drift.check(ts_mono, h.detector.current_lta(), &cal) {
            match outcome.status {
                DriftStatus::Critical => {
                    h.calibration.write().unwrap().valid = false;
                    h.event_tx.offer(SinkEvent::System(SystemEvent::new(
                        "CALIBRATION_DRIFT_CRITICAL",
                        format!("baseline drift {:.1}%, calibration invalidated", outcome.drift_percent),
                        outcome.drift_percent,
                    )));
                }
                DriftStatus::Warning => {
                    h.event_tx.offer(SinkEvent::System(SystemEvent::new(
                        "CALIBRATION_DRIFT_WARNING",
                        format!("baseline drift {:.1}%", outcome.drift_percent),
                        outcome.drift_percent,
                    )));
                }
                DriftStatus::Stable => {}
            }
        }

        match h.detector.process(&sample, &cal, h.clock.as_ref()) {
            Emit::Record(record) => {
                if !h.event_tx.offer(SinkEvent::Seismic(record)) {
                    // Event drops are always warnings: the sink cannot keep
                    // up with a very active period.
                    warn!("event queue full, seismic record dropped");
                }
            }
            Emit::RejectedNoTime {
                class,
                magnitude,
                duration_ms,
            } => {
                h.event_tx.offer(SinkEvent::System(SystemEvent::new(
                    "EVENT_REJECTED",
                    format!(
                        "{} event dropped, wall clock untrusted ({} ms)",
                        class.as_str(),
                        duration_ms
                    ),
                    magnitude,
                )));
            }
            Emit::None => {}
        }

        // Drift-free pacing: long iterations shorten the next sleep.
        next_deadline += h.period;
        let now = Instant::now();
        if next_deadline > now {
            std::thread::sleep(next_deadline - now);
        } else {
            next_deadline = now;
        }
    }
    info!("sampler stopped");
}

fn run_calibration(h: &mut SamplerHandles) {
    let previous = *h.calibration.read().unwrap();
    let prev_ref = (previous.created_at_mono > 0).then_some(&previous);

    match calibration::calibrate(h.sensor.as_mut(), h.clock.as_ref(), &h.cal_cfg, prev_ref) {
        Ok(cal) => {
            *h.calibration.write().unwrap() = cal;
            h.event_tx.offer(SinkEvent::System(SystemEvent::new(
                "CALIBRATION_OK",
                format!(
                    "offsets x={:.6} y={:.6} z={:.6} g, baseline {:.6} g",
                    cal.offset_x, cal.offset_y, cal.offset_z, cal.baseline_lta
                ),
                cal.baseline_lta,
            )));
        }
        Err(e) => {
            // The previous calibration (possibly none) stays in force.
            warn!("calibration failed: {}; previous calibration kept", e);
            h.event_tx.offer(SinkEvent::System(SystemEvent::new(
                "CALIBRATION_FAILED",
                format!("{}", e),
                0.0,
            )));
        }
    }
}
