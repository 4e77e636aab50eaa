// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Device-Specific Drivers
//!
//! This module contains device-specific drivers that sit above the `hw/` bus layer and below the
//! joint and arm logic.
//!
//! ## Existing drivers
//!
//! - [`pca9685`] – NXP PCA9685 16-channel 12-bit PWM controller
//! - [`as5600`] – ams AS5600 magnetic rotary encoder (calibration only)

pub mod as5600;
pub mod pca9685;

pub use as5600::As5600;
pub use pca9685::{Pca9685, SharedPwm};
