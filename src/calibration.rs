// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Servo calibration against the AS5600 encoder.
//!
//! A [`Sweep`] steps one PCA9685 channel through a range of pulse widths and reads the encoder
//! after each step. The resulting [`CalibrationLog`] is written as CSV
//! (`pulse_width_us,raw_step`) and reduced to a [`Calibration`]: the pulse widths where the servo
//! starts and stops following the command, and the shaft travel between them.
//!
//! Run the `hexarm-calibrate` binary to produce a log for one joint.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::JointConfig;
use crate::drivers::as5600::{self, As5600};
use crate::drivers::{pca9685, SharedPwm};
use crate::error::{Error, Result};
use crate::hw::I2cTransport;

/// One encoder reading.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CalibrationSample {
    pub pulse_width_us: u32,
    pub raw_step: u16,
}

/// Measured servo range.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Calibration {
    /// First pulse width that moved the shaft.
    pub measured_min_pulse: u32,
    /// Last pulse width that still moved the shaft.
    pub measured_max_pulse: u32,
    /// Shaft travel from the rest reading below `measured_min_pulse` to `measured_max_pulse`, in
    /// degrees.
    pub measured_max_angle: f32,
}

impl Calibration {
    /// Replace the pulse range and angle range of `joint`, keeping its default angle in range.
    pub fn apply(&self, joint: &mut JointConfig) {
        joint.min_pulse_us = self.measured_min_pulse as f32;
        joint.max_pulse_us = self.measured_max_pulse as f32;
        joint.max_angle_deg = self.measured_max_angle;
        joint.default_angle_deg = joint.default_angle_deg.min(self.measured_max_angle);
    }
}

/// Samples from one sweep.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationLog {
    pub samples: Vec<CalibrationSample>,
}

impl CalibrationLog {
    pub fn push(&mut self, pulse_width_us: u32, raw_step: u16) {
        self.samples.push(CalibrationSample {
            pulse_width_us,
            raw_step,
        });
    }

    pub fn write_csv<W: Write>(&self, mut out: W) -> Result<()> {
        writeln!(out, "pulse_width_us,raw_step")?;
        for sample in &self.samples {
            writeln!(out, "{},{}", sample.pulse_width_us, sample.raw_step)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_csv(BufWriter::new(File::create(path)?))
    }

    /// Reduce the log to the servo's working range.
    ///
    /// Returns `None` when the reading never changed.
    pub fn derive(&self) -> Option<Calibration> {
        let samples = &self.samples;
        let first = samples
            .windows(2)
            .position(|w| w[0].raw_step != w[1].raw_step)?;
        let last = samples
            .windows(2)
            .rposition(|w| w[0].raw_step != w[1].raw_step)?
            + 1;

        let travel = (i32::from(samples[last].raw_step) - i32::from(samples[first].raw_step))
            .rem_euclid(i32::from(as5600::STEPS_PER_REV));
        Some(Calibration {
            measured_min_pulse: samples[first + 1].pulse_width_us,
            measured_max_pulse: samples[last].pulse_width_us,
            measured_max_angle: as5600::steps_to_degrees(travel as u16),
        })
    }
}

/// Pulse-width sweep on one channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sweep {
    pub channel: u8,
    pub from_us: u32,
    pub to_us: u32,
    pub increment_us: u32,
    /// Wait after each step before reading the encoder.
    pub settle: Duration,
}

impl Sweep {
    /// Check the channel and the pulse range before anything touches the bus.
    pub fn validate(&self) -> Result<()> {
        if self.channel >= pca9685::CHANNELS {
            return Err(Error::InvalidChannel(self.channel));
        }
        if self.increment_us == 0 || self.from_us >= self.to_us {
            return Err(Error::Config(format!(
                "sweep {}..={} µs by {} µs is empty",
                self.from_us, self.to_us, self.increment_us
            )));
        }
        Ok(())
    }

    /// Pulse widths visited, in order.
    pub fn pulse_widths(&self) -> impl Iterator<Item = u32> {
        let step = self.increment_us.max(1) as usize;
        (self.from_us..=self.to_us).step_by(step)
    }

    /// Drive the channel through the sweep and record the encoder after each step.
    pub fn run<T: I2cTransport>(
        &self,
        pwm: &SharedPwm<T>,
        encoder: &mut As5600<T>,
    ) -> Result<CalibrationLog> {
        self.validate()?;
        info!(
            "sweeping channel {} from {} to {} µs in {} µs steps",
            self.channel, self.from_us, self.to_us, self.increment_us
        );

        let mut log = CalibrationLog::default();
        let swept = self.sample(pwm, encoder, &mut log);
        // The servo is released whether or not the sweep finished.
        let released = pwm.lock().channel_off(self.channel);
        if let Err(e) = &swept {
            warn!(
                "sweep on channel {} stopped after {} samples: {e}",
                self.channel,
                log.samples.len()
            );
        }
        swept.and(released)?;
        Ok(log)
    }

    fn sample<T: I2cTransport>(
        &self,
        pwm: &SharedPwm<T>,
        encoder: &mut As5600<T>,
        log: &mut CalibrationLog,
    ) -> Result<()> {
        {
            let mut pwm = pwm.lock();
            pwm.set_on_time(self.channel, 0)?;
            pwm.channel_on(self.channel)?;
        }

        for width in self.pulse_widths() {
            pwm.lock()
                .set_channel_pulse_width(self.channel, width as f32)?;
            thread::sleep(self.settle);
            let raw = encoder.raw_step()?;
            debug!("{width} µs -> raw step {raw}");
            log.push(width, raw);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::Pca9685;
    use crate::hw::sim::{ServoModel, SimBus};
    use crate::hw::BusChannel;

    fn log(samples: &[(u32, u16)]) -> CalibrationLog {
        let mut log = CalibrationLog::default();
        for &(width, raw) in samples {
            log.push(width, raw);
        }
        log
    }

    #[test]
    fn derive_finds_working_range() {
        let log = log(&[
            (400, 10),
            (450, 10),
            (500, 10),
            (550, 200),
            (600, 400),
            (650, 600),
            (700, 600),
        ]);
        let cal = log.derive().unwrap();
        assert_eq!(cal.measured_min_pulse, 550);
        assert_eq!(cal.measured_max_pulse, 650);
        assert!((cal.measured_max_angle - 590.0 * 360.0 / 4096.0).abs() < 1e-4);
    }

    #[test]
    fn derive_handles_encoder_wrap() {
        let log = log(&[(500, 4000), (600, 4090), (700, 50)]);
        let cal = log.derive().unwrap();
        assert!((cal.measured_max_angle - 146.0 * 360.0 / 4096.0).abs() < 1e-4);
    }

    #[test]
    fn derive_without_motion() {
        assert!(log(&[(500, 7), (600, 7)]).derive().is_none());
        assert!(log(&[(500, 7)]).derive().is_none());
        assert!(CalibrationLog::default().derive().is_none());
    }

    #[test]
    fn csv_format() {
        let mut out = Vec::new();
        log(&[(500, 0), (520, 34)]).write_csv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "pulse_width_us,raw_step\n500,0\n520,34\n"
        );
    }

    #[test]
    fn save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        log(&[(500, 1)]).save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn apply_updates_joint() {
        let mut joint = JointConfig::default_for(1).unwrap();
        Calibration {
            measured_min_pulse: 560,
            measured_max_pulse: 2600,
            measured_max_angle: 120.0,
        }
        .apply(&mut joint);
        assert_eq!(joint.min_pulse_us, 560.0);
        assert_eq!(joint.max_pulse_us, 2600.0);
        assert_eq!(joint.max_angle_deg, 120.0);
        assert_eq!(joint.default_angle_deg, 120.0);
    }

    #[test]
    fn pulse_width_schedule() {
        let sweep = Sweep {
            channel: 0,
            from_us: 500,
            to_us: 560,
            increment_us: 20,
            settle: Duration::ZERO,
        };
        assert_eq!(
            sweep.pulse_widths().collect::<Vec<_>>(),
            vec![500, 520, 540, 560]
        );
    }

    #[test]
    fn empty_sweep_rejected() {
        let sim = SimBus::new()
            .with_pca9685(pca9685::DEFAULT_ADDRESS)
            .with_as5600(as5600::DEFAULT_ADDRESS);
        let bus = BusChannel::new(sim).shared();
        let pwm = Pca9685::new(bus.clone(), pca9685::DEFAULT_ADDRESS, 50.0)
            .unwrap()
            .shared();
        let mut encoder = As5600::new(bus, as5600::DEFAULT_ADDRESS).unwrap();

        let sweep = Sweep {
            channel: 0,
            from_us: 600,
            to_us: 500,
            increment_us: 20,
            settle: Duration::ZERO,
        };
        assert!(matches!(sweep.run(&pwm, &mut encoder), Err(Error::Config(_))));

        let sweep = Sweep {
            channel: 70,
            to_us: 700,
            ..sweep
        };
        assert!(matches!(sweep.validate(), Err(Error::InvalidChannel(70))));
    }

    #[test]
    fn failed_sweep_releases_channel() {
        let sim = SimBus::new()
            .with_pca9685(pca9685::DEFAULT_ADDRESS)
            .with_as5600(as5600::DEFAULT_ADDRESS);
        let bus = BusChannel::new(sim.clone()).shared();
        let pwm = Pca9685::new(bus.clone(), pca9685::DEFAULT_ADDRESS, 50.0)
            .unwrap()
            .shared();
        let mut encoder = As5600::new(bus, as5600::DEFAULT_ADDRESS).unwrap();
        sim.remove(as5600::DEFAULT_ADDRESS);

        let sweep = Sweep {
            channel: 5,
            from_us: 500,
            to_us: 600,
            increment_us: 20,
            settle: Duration::ZERO,
        };
        assert!(matches!(sweep.run(&pwm, &mut encoder), Err(Error::Io(_))));
        assert!(!pwm.lock().is_channel_on(5).unwrap());
    }

    #[test]
    fn sweep_against_simulated_servo() {
        let servo = ServoModel {
            min_pulse_us: 500.0,
            max_pulse_us: 2500.0,
            max_angle_deg: 270.0,
        };
        let sim = SimBus::new()
            .with_pca9685(pca9685::DEFAULT_ADDRESS)
            .with_as5600(as5600::DEFAULT_ADDRESS)
            .with_linked_servo(as5600::DEFAULT_ADDRESS, pca9685::DEFAULT_ADDRESS, 3, servo);
        let bus = BusChannel::new(sim).shared();
        let pwm = Pca9685::new(bus.clone(), pca9685::DEFAULT_ADDRESS, 50.0)
            .unwrap()
            .shared();
        let mut encoder = As5600::new(bus, as5600::DEFAULT_ADDRESS).unwrap();

        let sweep = Sweep {
            channel: 3,
            from_us: 300,
            to_us: 2700,
            increment_us: 20,
            settle: Duration::ZERO,
        };
        let log = sweep.run(&pwm, &mut encoder).unwrap();
        assert_eq!(log.samples.len(), 121);
        assert!(!pwm.lock().is_channel_on(3).unwrap());

        let cal = log.derive().unwrap();
        assert!(cal.measured_min_pulse.abs_diff(500) <= 20);
        assert!(cal.measured_max_pulse.abs_diff(2500) <= 20);
        assert!((cal.measured_max_angle - 270.0).abs() < 1.0);
    }
}
