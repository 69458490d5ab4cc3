// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! MPU6050 accelerometer driver.
//!
//! The device reports acceleration as signed 16-bit register values; at the
//! ±2 g range one g is 16384 LSB. The bus transport (I2C, SPI bridge, test
//! fake) lives behind [`RegisterBus`] so the conversion and lifecycle logic
//! stay host-testable.

use anyhow::{bail, Result};
use tracing::info;

use super::{RawFrame, Sensor};

/// LSB per g at the ±2 g full-scale range.
pub const MPU6050_ACCEL_SCALE: f64 = 16384.0;

/// Register-level access to an MPU6050.
pub trait RegisterBus: Send {
    /// Probe the device (WHO_AM_I handshake). False means not responding.
    fn probe(&mut self) -> bool;

    /// Read the three accelerometer output registers as raw counts.
    fn read_accel(&mut self) -> Result<(i16, i16, i16)>;
}

/// MPU6050 tri-axial accelerometer.
pub struct Mpu6050Sensor<B: RegisterBus> {
    bus: B,
    initialized: bool,
}

impl<B: RegisterBus> Mpu6050Sensor<B> {
    /// Wrap a register bus. The device is not touched until [`Sensor::begin`].
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            initialized: false,
        }
    }
}

impl<B: RegisterBus> Sensor for Mpu6050Sensor<B> {
    fn begin(&mut self) -> Result<()> {
        info!("Initializing MPU6050...");
        if !self.bus.probe() {
            bail!("MPU6050 connection failed");
        }
        self.initialized = true;
        info!("MPU6050 found");
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame> {
        if !self.initialized {
            bail!("MPU6050 not initialized");
        }
        let (ax, ay, az) = self.bus.read_accel()?;
        Ok(RawFrame {
            ax: f64::from(ax) / MPU6050_ACCEL_SCALE,
            ay: f64::from(ay) / MPU6050_ACCEL_SCALE,
            az: f64::from(az) / MPU6050_ACCEL_SCALE,
        })
    }
}
