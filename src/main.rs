// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! QuakeWatch - Networked Digital Seismograph
//!
//! Samples a tri-axial accelerometer at 500 Hz, detects seismic events in
//! real time with an STA/LTA trigger, persists scientifically-annotated
//! event records, and streams live data to MQTT and WebSocket clients.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use quakewatch::{Config, Engine, VERSION};

/// QuakeWatch - Networked Digital Seismograph
#[derive(Parser, Debug)]
#[command(name = "quakewatch")]
#[command(author = "QuakeWatch Project")]
#[command(version = VERSION)]
#[command(about = "STA/LTA seismic event detection with MQTT and WebSocket streaming")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with a simulated accelerometer
    #[arg(long)]
    demo: bool,

    /// WebSocket server port
    #[arg(long)]
    ws_port: Option<u16>,

    /// MQTT broker address (enables MQTT)
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// Data output directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("QuakeWatch v{} - Networked Digital Seismograph", VERSION);

    // Load or create configuration, then apply command line overrides.
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    if args.demo {
        config.demo_mode = true;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(port) = args.ws_port {
        config.streaming.websocket_port = port;
    }
    if let Some(broker) = args.mqtt_broker {
        config.streaming.mqtt_enabled = true;
        config.streaming.mqtt_broker = broker;
    }

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(Engine::run(config))
}
