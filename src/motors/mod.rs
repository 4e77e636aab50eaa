// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Actuator Abstractions
//!
//! This module contains motor-level wrappers that sit above device-level drivers in `drivers`.
//!
//! ## Modules
//!
//! - [`joint`] - Servo joint on one PCA9685 channel with a velocity-ramped motion engine.

pub mod joint;

pub use joint::{Direction, Joint, Motion};
