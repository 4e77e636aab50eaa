// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # hexarm
//!
//! This crate drives a six-joint hobby servo arm from a Linux host, written in Rust, targeting a
//! Raspberry Pi class board with a PCA9685 PWM controller on I2C.
//!
//! ## Crate Structure
//!
//! | Module | Purpose |
//! | ------ | -------- |
//! | [`hw`] | I2C bus channel, Linux `i2c-dev` transport and a simulated bus |
//! | [`drivers`] | Device-level drivers (PCA9685, AS5600) |
//! | [`motors`] | Servo joints with velocity-ramped motion |
//! | [`control`] | Inverse kinematics and the arm controller |
//! | [`config`] | Calibration constants and TOML configuration |
//! | [`calibration`] | Pulse-width sweeps against the AS5600 encoder |
//!
//! ## Getting Started
//!
//! Build docs:
//!
//! ```bash
//! cargo doc --no-deps --open
//! ```
//!
//! Run the demo sequence without hardware:
//!
//! ```bash
//! cargo run --release -- --simulate -v
//! ```
//!
//! ## License
//!
//! Licensed under the **MIT License**.
//! See the `LICENSE` file in the repository root for full terms.
//!
//! © 2025–2026 Christopher Liu

pub mod calibration;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod hw;
pub mod motors;

pub use config::{ArmConfig, JointConfig};
pub use control::ArmController;
pub use error::{Error, Result};
