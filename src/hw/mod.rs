// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Hardware Access
//!
//! This module contains the bus layer that the device drivers in `drivers` sit on.
//!
//! ## Modules
//!
//! - [`i2c`] - Bus channel with selection caching and a peripheral registry, plus the Linux
//!   `i2c-dev` transport.
//! - [`sim`] - In-memory transport emulating a PCA9685 and an AS5600.

pub mod i2c;
pub mod sim;

pub use i2c::{BusChannel, I2cTransport, LinuxI2c, SharedBus};
pub use sim::SimBus;
