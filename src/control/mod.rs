// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Control Algorithms
//!
//! This module turns Cartesian targets into joint motion.
//!
//! ## Modules
//!
//! - [`ik`] - Geometric inverse (and forward) kinematics for the six-joint arm.
//! - [`arm`] - Arm controller owning the bus, the PWM controller and the joints.

pub mod arm;
pub mod ik;

pub use arm::ArmController;
pub use ik::{LinkGeometry, Orientation, Position};
