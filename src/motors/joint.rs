// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Servo joint with a velocity-ramped motion engine.
//!
//! A `Joint` owns one PCA9685 output channel and its calibration. `move_to` hands the ramp to a
//! dedicated thread: every step period it advances the angle by `speed · dt` towards the target,
//! never past it, and writes the matching pulse width under the hardware lock. The ramp ends on
//! the step that lands exactly on the target.
//!
//! A joint runs at most one ramp at a time; a second `move_to` while ramping fails with
//! `JointBusy`. Every started ramp comes back as a [`Motion`] that the caller must either
//! [`wait`](Motion::wait) on or [`detach`](Motion::detach).
//!
//! On drop the joint waits for any ramp in flight, ramps back to its default angle on the calling
//! thread and switches its output off.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::config::JointConfig;
use crate::drivers::SharedPwm;
use crate::error::{Error, Result};
use crate::hw::I2cTransport;

/// Direction of the ramp in progress (or the last one).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Increasing angle.
    Clockwise,
    /// Decreasing angle.
    CounterClockwise,
}

struct State {
    current: f32,
    target: f32,
    running: bool,
    direction: Direction,
    speed: f32,
    last_step: Instant,
    steps: u32,
}

struct Shared<T: I2cTransport> {
    id: usize,
    config: JointConfig,
    slope: f32,
    step_period: Duration,
    pwm: SharedPwm<T>,
    state: Mutex<State>,
    idle: Condvar,
}

impl<T: I2cTransport> Shared<T> {
    fn pulse_width_for(&self, angle: f32) -> f32 {
        self.config.min_pulse_us + self.slope * angle.clamp(0.0, self.config.max_angle_deg)
    }

    fn write_angle(&self, angle: f32) -> Result<()> {
        let width = self.pulse_width_for(angle);
        self.pwm
            .lock()
            .set_channel_pulse_width(self.config.channel, width)
    }

    /// Claim the joint for a ramp to `angle`.
    ///
    /// Returns `Ok(false)` when the joint already sits at `angle`; nothing is claimed then.
    fn begin(&self, angle: f32) -> Result<bool> {
        let mut state = self.state.lock();
        if state.running {
            return Err(Error::JointBusy(self.id));
        }

        state.target = angle.clamp(0.0, self.config.max_angle_deg);
        state.steps = 0;
        if state.target == state.current {
            return Ok(false);
        }

        state.direction = if state.target > state.current {
            Direction::Clockwise
        } else {
            Direction::CounterClockwise
        };
        state.last_step = Instant::now();
        state.running = true;
        debug!(
            "joint {}: {:.2}° -> {:.2}° at {} deg/s",
            self.id, state.current, state.target, state.speed
        );
        Ok(true)
    }

    /// Advance one step. Returns the new angle and whether the target was reached.
    fn step(&self) -> (f32, bool) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let dt = now.duration_since(state.last_step).as_secs_f32();
        state.last_step = now;

        let delta = state.speed * dt;
        state.current = match state.direction {
            Direction::Clockwise => (state.current + delta).min(state.target),
            Direction::CounterClockwise => (state.current - delta).max(state.target),
        };
        state.steps += 1;
        (state.current, state.current == state.target)
    }

    fn ramp(&self) -> Result<()> {
        loop {
            thread::sleep(self.step_period);
            let (angle, done) = self.step();
            trace!("joint {}: step to {angle:.3}°", self.id);
            self.write_angle(angle)?;
            if done {
                return Ok(());
            }
        }
    }
}

/// Marks the joint idle and wakes waiters when a ramp ends, including by unwinding.
struct RampGuard<'a, T: I2cTransport>(&'a Shared<T>);

impl<T: I2cTransport> Drop for RampGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        // An aborted ramp stops where it is.
        state.target = state.current;
        state.running = false;
        debug!(
            "joint {}: idle at {:.2}° after {} steps",
            self.0.id, state.current, state.steps
        );
        drop(state);
        self.0.idle.notify_all();
    }
}

/// A ramp started by [`Joint::move_to`].
#[must_use = "a motion must be waited on or detached"]
pub struct Motion {
    joint: usize,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Motion {
    /// Motion that needed no ramp.
    fn idle(joint: usize) -> Self {
        Self {
            joint,
            handle: None,
        }
    }

    /// Joint number the motion belongs to.
    #[inline]
    pub fn joint(&self) -> usize {
        self.joint
    }

    /// Block until the ramp completes.
    pub fn wait(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::MotionPanicked)?,
            None => Ok(()),
        }
    }

    /// Let the ramp finish on its own.
    pub fn detach(mut self) {
        self.handle.take();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for Motion {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("joint {}: motion dropped unresolved, detaching", self.joint);
        }
    }
}

/// One servo joint of the arm.
pub struct Joint<T: I2cTransport> {
    shared: Arc<Shared<T>>,
}

impl<T: I2cTransport> Joint<T> {
    /// Bind joint `id` to its channel.
    ///
    /// The output is left switched off with the on-time at zero and the default pulse loaded, so
    /// enabling the channel holds the default angle.
    pub fn new(
        id: usize,
        pwm: SharedPwm<T>,
        config: &JointConfig,
        speed: f32,
        step_period: Duration,
    ) -> Result<Self> {
        let shared = Shared {
            id,
            config: *config,
            slope: config.slope(),
            step_period,
            pwm,
            state: Mutex::new(State {
                current: config.default_angle_deg,
                target: config.default_angle_deg,
                running: false,
                direction: Direction::Clockwise,
                speed,
                last_step: Instant::now(),
                steps: 0,
            }),
            idle: Condvar::new(),
        };

        {
            let mut pwm = shared.pwm.lock();
            pwm.channel_off(config.channel)?;
            pwm.set_on_time(config.channel, 0)?;
        }
        shared.write_angle(config.default_angle_deg)?;

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.shared.id
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.shared.config.channel
    }

    #[inline]
    pub fn config(&self) -> &JointConfig {
        &self.shared.config
    }

    #[inline]
    pub fn max_angle(&self) -> f32 {
        self.shared.config.max_angle_deg
    }

    #[inline]
    pub fn default_angle(&self) -> f32 {
        self.shared.config.default_angle_deg
    }

    #[inline]
    pub fn step_period(&self) -> Duration {
        self.shared.step_period
    }

    /// Pulse width in microseconds that holds `angle`.
    pub fn pulse_width_for(&self, angle: f32) -> f32 {
        self.shared.pulse_width_for(angle)
    }

    pub fn is_angle_valid(&self, angle: f32) -> bool {
        angle.is_finite() && (0.0..=self.max_angle()).contains(&angle)
    }

    /// Reject `angle` with `InvalidAngle` unless it lies in `[0, max_angle]`.
    pub fn check_angle(&self, angle: f32) -> Result<()> {
        if self.is_angle_valid(angle) {
            Ok(())
        } else {
            Err(Error::InvalidAngle {
                joint: self.id(),
                angle,
                max: self.max_angle(),
            })
        }
    }

    pub fn current_angle(&self) -> f32 {
        self.shared.state.lock().current
    }

    pub fn target_angle(&self) -> f32 {
        self.shared.state.lock().target
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn direction(&self) -> Direction {
        self.shared.state.lock().direction
    }

    /// Rotation speed in degrees per second.
    pub fn speed(&self) -> f32 {
        self.shared.state.lock().speed
    }

    /// Ramp steps taken by the current or last motion.
    pub fn steps_taken(&self) -> u32 {
        self.shared.state.lock().steps
    }

    /// Change the rotation speed. A ramp in flight picks it up on its next step.
    pub fn set_speed(&self, deg_per_sec: f32) -> Result<()> {
        if !(deg_per_sec.is_finite() && deg_per_sec > 0.0) {
            return Err(Error::Config(format!(
                "joint {}: speed must be positive, got {deg_per_sec}",
                self.id()
            )));
        }
        self.shared.state.lock().speed = deg_per_sec;
        Ok(())
    }

    /// Clear the channel's full-off override.
    pub fn enable(&self) -> Result<()> {
        self.shared.pwm.lock().channel_on(self.channel())
    }

    /// Set the channel's full-off override.
    pub fn disable(&self) -> Result<()> {
        self.shared.pwm.lock().channel_off(self.channel())
    }

    pub fn is_enabled(&self) -> Result<bool> {
        self.shared.pwm.lock().is_channel_on(self.channel())
    }

    /// Block until no ramp is running.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.running {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Ramp to `angle` on the calling thread.
    fn ramp_inline(&self, angle: f32) -> Result<()> {
        if !self.shared.begin(angle)? {
            return Ok(());
        }
        let _guard = RampGuard(&self.shared);
        self.shared.ramp()
    }
}

impl<T: I2cTransport + 'static> Joint<T> {
    /// Start a ramp to `angle`.
    ///
    /// Fails with `InvalidAngle` outside `[0, max_angle]` and with `JointBusy` while a ramp is
    /// running; neither touches the hardware. Moving to the current angle returns a motion that is
    /// already complete.
    pub fn move_to(&self, angle: f32) -> Result<Motion> {
        self.check_angle(angle)?;
        if !self.shared.begin(angle)? {
            return Ok(Motion::idle(self.id()));
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("joint-{}", self.id()))
            .spawn(move || {
                let _guard = RampGuard(&shared);
                let result = shared.ramp();
                if let Err(e) = &result {
                    warn!("joint {}: ramp aborted: {e}", shared.id);
                }
                result
            });

        match spawned {
            Ok(handle) => Ok(Motion {
                joint: self.id(),
                handle: Some(handle),
            }),
            Err(e) => {
                let mut state = self.shared.state.lock();
                state.target = state.current;
                state.running = false;
                Err(e.into())
            }
        }
    }
}

impl<T: I2cTransport> Drop for Joint<T> {
    fn drop(&mut self) {
        self.wait_idle();
        if let Err(e) = self.ramp_inline(self.default_angle()) {
            warn!("joint {}: failed to return to default: {e}", self.id());
        }
        if let Err(e) = self.disable() {
            warn!("joint {}: failed to disable output: {e}", self.id());
        }
    }
}
