// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! QuakeWatch - Networked Digital Seismograph
//!
//! A Rust seismograph node built around a tri-axial MEMS accelerometer:
//! - 500 Hz sampling with per-axis calibration and impulse rejection
//! - STA/LTA event trigger with noise-adaptive thresholds
//! - Richter-based event classification and scientific event records
//! - Dual-domain pipeline isolating the real-time sampler from all I/O
//! - MQTT publishing and WebSocket push streaming for live dashboards
//! - Per-day JSON-lines persistence with retention cleanup
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Sampler domain (thread)                 │
//! │  ┌────────┐  ┌───────────┐  ┌───────┐  ┌─────────┐  ┌─────┐ │
//! │  │ Sensor │→ │ Calibrate │→ │ Spike │→ │ STA/LTA │→ │Event│ │
//! │  │ Driver │  │  Offsets  │  │Filter │  │ Trigger │  │Asm. │ │
//! │  └────────┘  └───────────┘  └───────┘  └─────────┘  └─────┘ │
//! │        │ sample queue                       │ event queue   │
//! └────────┼────────────────────────────────────┼───────────────┘
//!          ▼                                    ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Sink domain (tokio)                    │
//! │  ┌───────────┐   ┌──────────────┐   ┌────────────────────┐   │
//! │  │ Persist   │   │ MQTT Broker  │   │ WebSocket Push     │   │
//! │  │ (JSONL)   │   │ (rumqttc)    │   │ (adaptive rates)   │   │
//! │  └───────────┘   └──────────────┘   └────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod calibration;
pub mod clock;
pub mod config;
pub mod core;
pub mod detector;
pub mod pipeline;
pub mod record;
pub mod sensor;
pub mod sink;
pub mod storage;
pub mod streaming;
pub mod telemetry;

// Re-exports for convenience
pub use calibration::Calibration;
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use crate::core::Engine;
pub use detector::Detector;
pub use record::{EventClass, SeismicRecord};
pub use sensor::{Sample, Sensor};
pub use storage::DataLogger;
pub use telemetry::Counters;

/// QuakeWatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// QuakeWatch name
pub const NAME: &str = "QuakeWatch";
