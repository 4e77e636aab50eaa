// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Six-joint arm controller.
//!
//! The controller owns the bus channel, the PCA9685 behind its hardware lock and the six joints.
//! It offers three ways to move:
//!
//! - per joint, with [`ArmController::set_joint_angle`];
//! - by end-effector orientation, with [`ArmController::set_orientation`];
//! - by end-effector position, with [`ArmController::set_end_position`].
//!
//! The last two need both a position and an orientation before the solver can run. Whichever is
//! set first is stored and answered with `PrerequisiteMissing`; the arm does not move.
//!
//! Cartesian moves are all-or-nothing: the solve, the per-joint range checks and the idle check
//! all pass before any joint starts, so a rejected target leaves the arm where it was. All six
//! joints then ramp concurrently.
//!
//! Typical usage pattern:
//!
//! ```no_run
//! # use hexarm::{config::ArmConfig, control::ArmController};
//! let mut arm = ArmController::open(&ArmConfig::default())?;
//! let _ = arm.set_orientation(0.0, 90.0, 0.0, true);
//! arm.set_end_position(100.0, -50.0, 200.0, true)?;
//! # Ok::<(), hexarm::Error>(())
//! ```

use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::{ArmConfig, JOINTS};
use crate::control::ik::{self, LinkGeometry, Orientation, Position};
use crate::drivers::{Pca9685, SharedPwm};
use crate::error::{Error, Result};
use crate::hw::{BusChannel, I2cTransport, LinuxI2c, SharedBus};
use crate::motors::{Joint, Motion};

/// Six-joint arm.
///
/// Field order is teardown order: joints return to their default angles first, then the PWM
/// controller goes to sleep, then the bus is released.
pub struct ArmController<T: I2cTransport> {
    joints: Vec<Joint<T>>,
    pwm: SharedPwm<T>,
    bus: SharedBus<T>,
    geometry: LinkGeometry,
    target_position: Option<Position>,
    target_orientation: Option<Orientation>,
    end_speed: f32,
}

impl ArmController<LinuxI2c> {
    /// Build the arm on the Linux I2C adapter named in `config`.
    pub fn open(config: &ArmConfig) -> Result<Self> {
        config.validate()?;
        let bus = BusChannel::open(&config.bus_path)?;
        Self::with_bus(config, bus)
    }
}

impl<T: I2cTransport + 'static> ArmController<T> {
    /// Build the arm on an already opened transport.
    pub fn new(config: &ArmConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Self::with_bus(config, BusChannel::new(transport))
    }

    fn with_bus(config: &ArmConfig, bus: BusChannel<T>) -> Result<Self> {
        let bus = bus.shared();
        let pwm = Pca9685::new(
            Arc::clone(&bus),
            config.controller_address,
            config.pwm_frequency_hz,
        )?
        .shared();

        let step_period = config.step_period();
        let joints = config
            .joints
            .iter()
            .enumerate()
            .map(|(i, joint)| {
                Joint::new(
                    i + 1,
                    Arc::clone(&pwm),
                    joint,
                    config.rotation_speed_deg_per_sec,
                    step_period,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        for joint in &joints {
            joint.enable()?;
        }

        info!(
            "arm ready: {} joints on PCA9685 0x{:02X}, {} deg/s, step {:?}",
            joints.len(),
            config.controller_address,
            config.rotation_speed_deg_per_sec,
            step_period
        );

        Ok(Self {
            joints,
            pwm,
            bus,
            geometry: config.geometry,
            target_position: None,
            target_orientation: None,
            end_speed: config.rotation_speed_deg_per_sec,
        })
    }

    /// Move joint `n` (1..=6) to `angle` degrees.
    ///
    /// With `wait` the call returns once the ramp is done; otherwise the ramp continues on its
    /// own.
    pub fn set_joint_angle(&mut self, n: usize, angle: f32, wait: bool) -> Result<()> {
        let joint = self.joint(n)?;
        joint.check_angle(angle)?;
        let motion = joint.move_to(angle)?;
        resolve(vec![motion], wait)
    }

    /// Set the end-effector orientation in degrees.
    ///
    /// Roll is stored but not used by the solver.
    pub fn set_orientation(&mut self, pitch: f64, yaw: f64, roll: f64, wait: bool) -> Result<()> {
        let orientation = Orientation::new(pitch, yaw, roll);
        let Some(position) = self.target_position else {
            self.target_orientation = Some(orientation);
            warn!("orientation stored; set an end position to move");
            return Err(Error::PrerequisiteMissing("end position"));
        };

        let motions = self.update_joints(&position, &orientation)?;
        self.target_orientation = Some(orientation);
        resolve(motions, wait)
    }

    /// Set the end-effector position in millimetres.
    pub fn set_end_position(&mut self, x: f64, y: f64, z: f64, wait: bool) -> Result<()> {
        let position = Position::new(x, y, z);
        let Some(orientation) = self.target_orientation else {
            self.target_position = Some(position);
            warn!("end position stored; set an orientation to move");
            return Err(Error::PrerequisiteMissing("orientation"));
        };

        let motions = self.update_joints(&position, &orientation)?;
        self.target_position = Some(position);
        resolve(motions, wait)
    }

    /// Solve for the targets and start every joint towards its angle.
    fn update_joints(
        &self,
        position: &Position,
        orientation: &Orientation,
    ) -> Result<Vec<Motion>> {
        let radians = ik::solve(position, orientation, &self.geometry)?;

        let mut targets = [0.0_f32; JOINTS];
        for ((target, theta), joint) in targets.iter_mut().zip(radians).zip(&self.joints) {
            *target = theta.to_degrees() as f32 + joint.default_angle();
            joint.check_angle(*target)?;
        }
        if let Some(busy) = self.joints.iter().find(|joint| joint.is_running()) {
            return Err(Error::JointBusy(busy.id()));
        }
        debug!("moving to {position:?} {orientation:?}: joints {targets:?}");

        let mut motions = Vec::with_capacity(JOINTS);
        for (joint, &target) in self.joints.iter().zip(&targets) {
            match joint.move_to(target) {
                Ok(motion) => motions.push(motion),
                Err(e) => {
                    motions.into_iter().for_each(Motion::detach);
                    return Err(e);
                }
            }
        }
        Ok(motions)
    }
}

/// Wait on or detach a batch of motions.
///
/// When waiting, the last joint is joined first and the rest in order; every motion is resolved
/// even if one fails, and the first failure is returned.
fn resolve(mut motions: Vec<Motion>, wait: bool) -> Result<()> {
    if !wait {
        motions.into_iter().for_each(Motion::detach);
        return Ok(());
    }

    let mut result = motions.pop().map_or(Ok(()), Motion::wait);
    for motion in motions {
        let waited = motion.wait();
        if result.is_ok() {
            result = waited;
        }
    }
    result
}

impl<T: I2cTransport> ArmController<T> {
    /// Joint `n`, counting from 1.
    pub fn joint(&self, n: usize) -> Result<&Joint<T>> {
        n.checked_sub(1)
            .and_then(|i| self.joints.get(i))
            .ok_or(Error::InvalidJoint(n))
    }

    pub fn joints(&self) -> &[Joint<T>] {
        &self.joints
    }

    /// Current angle of every joint in degrees.
    pub fn joint_angles(&self) -> [f32; JOINTS] {
        let mut angles = [0.0; JOINTS];
        for (angle, joint) in angles.iter_mut().zip(&self.joints) {
            *angle = joint.current_angle();
        }
        angles
    }

    pub fn target_position(&self) -> Option<Position> {
        self.target_position
    }

    pub fn target_orientation(&self) -> Option<Orientation> {
        self.target_orientation
    }

    pub fn geometry(&self) -> &LinkGeometry {
        &self.geometry
    }

    /// Store the end-effector speed. Not yet used to limit Cartesian moves.
    pub fn set_end_speed(&mut self, speed: f32) {
        self.end_speed = speed;
    }

    pub fn end_speed(&self) -> f32 {
        self.end_speed
    }

    /// Set the rotation speed of every joint.
    pub fn set_joint_speed(&self, deg_per_sec: f32) -> Result<()> {
        self.joints
            .iter()
            .try_for_each(|joint| joint.set_speed(deg_per_sec))
    }

    /// Block until every joint is idle.
    pub fn wait_idle(&self) {
        for joint in &self.joints {
            joint.wait_idle();
        }
    }

    /// PCA9685 behind the hardware lock.
    pub fn pwm(&self) -> &SharedPwm<T> {
        &self.pwm
    }

    pub fn bus(&self) -> &SharedBus<T> {
        &self.bus
    }
}

impl<T: I2cTransport> Drop for ArmController<T> {
    fn drop(&mut self) {
        info!("arm shutting down, returning joints to default");
    }
}
