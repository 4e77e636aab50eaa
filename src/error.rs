// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Error taxonomy shared by every layer of the arm stack.
//!
//! Nothing in the crate retries on its own: a failed bus transaction is terminal for the call that
//! issued it and surfaces here.

use std::io;
use std::path::PathBuf;

/// Errors produced by the bus, the device drivers, the joints and the arm controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bus device node could not be opened.
    #[error("cannot open I2C bus {}: {source}", path.display())]
    BusUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A transaction targeted an address that never answered a registration ping.
    #[error("peripheral 0x{0:02X} is not registered on the bus")]
    PeripheralNotRegistered(u8),

    /// The transport moved fewer bytes than requested.
    #[error("short transfer with 0x{addr:02X}: expected {expected} bytes, got {actual}")]
    TransferFailed {
        addr: u8,
        expected: usize,
        actual: usize,
    },

    /// Raw transport failure (address select, read or write).
    #[error("I2C transport error: {0}")]
    Io(#[from] io::Error),

    #[error("prescaler {0} outside 3..=255")]
    InvalidPrescaler(u8),

    #[error("PWM frequency {0} Hz cannot be reached with a prescaler in 3..=255")]
    InvalidFrequency(f32),

    #[error("PWM channel {0} outside 0..=15")]
    InvalidChannel(u8),

    #[error("tick count {0} outside 0..=4095")]
    InvalidTicks(u16),

    #[error("duty cycle {0}% outside 0..=100")]
    InvalidDuty(f32),

    /// Requested joint angle outside `[0, max]`.
    #[error("angle {angle}° outside joint {joint} range [0, {max}]")]
    InvalidAngle { joint: usize, angle: f32, max: f32 },

    #[error("joint {0} does not exist (expected 1..=6)")]
    InvalidJoint(usize),

    /// A ramp is still running on the joint.
    #[error("joint {0} is still ramping")]
    JointBusy(usize),

    /// Position was requested before orientation or the other way around.
    #[error("{0} must be set before the end effector can move")]
    PrerequisiteMissing(&'static str),

    /// Wrist center lies outside the reach of links A2 and A3.
    #[error("target unreachable (cos theta3 = {cos_theta3})")]
    TargetUnreachable { cos_theta3: f64 },

    #[error("configuration error: {0}")]
    Config(String),

    /// A ramp thread panicked before reporting its result.
    #[error("motion thread panicked")]
    MotionPanicked,
}

/// Result type for arm operations.
pub type Result<T> = std::result::Result<T, Error>;
