// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Geometric inverse kinematics for the 6-DOF arm.
//!
//! The arm is treated as a spherical wrist on top of a planar two-link arm:
//!
//! 1. The desired end-effector frame is built from pitch and yaw. Roll is not part of the frame.
//! 2. The wrist center is the target backed off by `D6` along the frame's approach (z) axis, with
//!    the base height `D1` removed.
//! 3. Joint 1 points the arm plane at the wrist center; joints 2 and 3 reach it (elbow-up branch).
//! 4. Joints 4 to 6 are read straight off the frame.
//!
//! All angles returned by [`solve`] are radians with zero at the kinematic reference; the arm
//! controller adds each joint's mechanical default angle.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Link lengths in millimetres.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkGeometry {
    /// Base height.
    pub d1: f64,
    /// Upper arm.
    pub a2: f64,
    /// Forearm.
    pub a3: f64,
    /// Wrist center to tool point.
    pub d6: f64,
}

/// Cartesian point in millimetres.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }
}

/// End-effector orientation in degrees.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Orientation {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

impl Orientation {
    pub const fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }
}

/// Rotation matrix, `frame[row][column]`; columns are the x, y and z axes.
pub type Frame = [[f64; 3]; 3];

/// Joint angles in radians, joint 1 first.
pub type JointAngles = [f64; 6];

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Desired end-effector frame for an orientation.
pub fn end_effector_frame(orientation: &Orientation) -> Frame {
    let (sp, cp) = orientation.pitch.to_radians().sin_cos();
    let (sy, cy) = orientation.yaw.to_radians().sin_cos();

    let z = [cy * sp, sy * sp, cp];
    let x = [cy * cp, sy * cp, -sp];
    let y = cross(z, x);

    std::array::from_fn(|row| [x[row], y[row], z[row]])
}

/// Wrist center for a tool point and frame, relative to the top of the base.
pub fn wrist_center(position: &Position, frame: &Frame, geometry: &LinkGeometry) -> Position {
    Position {
        x: position.x - geometry.d6 * frame[0][2],
        y: position.y - geometry.d6 * frame[1][2],
        z: position.z - geometry.d6 * frame[2][2] - geometry.d1,
    }
}

/// Solve for the six joint angles that put the tool at `position` with `orientation`.
///
/// Fails with `TargetUnreachable` when the wrist center is out of reach of the upper arm and
/// forearm.
pub fn solve(
    position: &Position,
    orientation: &Orientation,
    geometry: &LinkGeometry,
) -> Result<JointAngles> {
    let frame = end_effector_frame(orientation);
    let wc = wrist_center(position, &frame, geometry);
    let LinkGeometry { a2, a3, .. } = *geometry;

    let theta1 = wc.y.atan2(wc.x);

    let r = wc.x.hypot(wc.y);
    let s_sq = r * r + wc.z * wc.z;
    let cos_theta3 = (s_sq - a2 * a2 - a3 * a3) / (2.0 * a2 * a3);
    if !cos_theta3.is_finite() || cos_theta3.abs() > 1.0 {
        return Err(Error::TargetUnreachable { cos_theta3 });
    }
    let sin_theta3 = (1.0 - cos_theta3 * cos_theta3).sqrt();
    let theta3 = sin_theta3.atan2(cos_theta3);

    let theta2 = wc.z.atan2(r) - (a3 * sin_theta3).atan2(a2 + a3 * cos_theta3);

    let theta4 = frame[1][2].atan2(frame[0][2]);
    let theta5 = frame[0][2].hypot(frame[1][2]).atan2(frame[2][2]);
    let theta6 = frame[1][1].atan2(frame[1][0]);

    Ok([theta1, theta2, theta3, theta4, theta5, theta6])
}

/// Tool point and orientation reached by a set of joint angles.
///
/// Only joints 4 and 5 carry orientation (yaw and pitch), so roll is always zero and joint 6 is
/// not read.
pub fn forward(angles: &JointAngles, geometry: &LinkGeometry) -> (Position, Orientation) {
    let [theta1, theta2, theta3, theta4, theta5, _] = *angles;

    let orientation = Orientation {
        pitch: theta5.to_degrees(),
        yaw: theta4.to_degrees(),
        roll: 0.0,
    };
    let frame = end_effector_frame(&orientation);

    let r = geometry.a2 * theta2.cos() + geometry.a3 * (theta2 + theta3).cos();
    let wc_z = geometry.a2 * theta2.sin() + geometry.a3 * (theta2 + theta3).sin();

    let position = Position {
        x: r * theta1.cos() + geometry.d6 * frame[0][2],
        y: r * theta1.sin() + geometry.d6 * frame[1][2],
        z: wc_z + geometry.d1 + geometry.d6 * frame[2][2],
    };
    (position, orientation)
}
