// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Arm configuration.
//!
//! [`defaults`] holds the values measured on the reference build. [`ArmConfig`] groups them so a
//! deployment can override any subset from a TOML file; missing keys fall back to the defaults.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::ik::LinkGeometry;
use crate::error::{Error, Result};

/// Number of joints on the arm.
pub const JOINTS: usize = 6;

pub mod defaults {
    use crate::control::ik::LinkGeometry;

    pub const BUS_PATH: &str = "/dev/i2c-1";
    pub const CONTROLLER_ADDRESS: u8 = 0x40;
    pub const ENCODER_ADDRESS: u8 = 0x36;

    /// Servo refresh rate.
    pub const PWM_FREQUENCY_HZ: f32 = 50.0;
    pub const ROTATION_SPEED_DEG_PER_SEC: f32 = 90.0;
    pub const ROTATION_STEP_FREQUENCY_HZ: f32 = 50.0;

    /// Link lengths in millimetres.
    pub const GEOMETRY: LinkGeometry = LinkGeometry {
        d1: 9.5,
        a2: 39.0,
        a3: 150.0,
        d6: 55.0,
    };

    /// (channel, min pulse µs, max pulse µs, max angle °, default angle °) for joints 1..=6.
    pub const JOINTS: [(u8, f32, f32, f32, f32); super::JOINTS] = [
        (0, 540.0, 2665.0, 262.793, 130.0),
        (1, 535.0, 2655.0, 263.848, 131.0),
        (4, 400.0, 2795.0, 296.367, 136.0),
        (5, 400.0, 2790.0, 295.4, 140.0),
        (6, 395.0, 2780.0, 296.719, 134.0),
        (8, 1000.0, 2000.0, 79.8926, 40.0),
    ];
}

/// Calibration of one joint servo.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    /// PCA9685 output channel.
    pub channel: u8,
    /// Pulse width at 0°.
    pub min_pulse_us: f32,
    /// Pulse width at `max_angle_deg`.
    pub max_pulse_us: f32,
    pub max_angle_deg: f32,
    /// Rest pose, reached on start-up and on teardown.
    pub default_angle_deg: f32,
}

impl JointConfig {
    /// Default calibration of joint `n` (1..=6).
    pub fn default_for(n: usize) -> Option<Self> {
        let (channel, min_pulse_us, max_pulse_us, max_angle_deg, default_angle_deg) =
            *defaults::JOINTS.get(n.checked_sub(1)?)?;
        Some(Self {
            channel,
            min_pulse_us,
            max_pulse_us,
            max_angle_deg,
            default_angle_deg,
        })
    }

    /// Pulse width change per degree.
    #[inline]
    pub fn slope(&self) -> f32 {
        (self.max_pulse_us - self.min_pulse_us) / self.max_angle_deg
    }
}

/// Everything needed to build an [`ArmController`](crate::control::ArmController).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    pub bus_path: String,
    pub controller_address: u8,
    pub pwm_frequency_hz: f32,
    pub rotation_speed_deg_per_sec: f32,
    pub rotation_step_frequency_hz: f32,
    pub geometry: LinkGeometry,
    pub joints: Vec<JointConfig>,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            bus_path: defaults::BUS_PATH.into(),
            controller_address: defaults::CONTROLLER_ADDRESS,
            pwm_frequency_hz: defaults::PWM_FREQUENCY_HZ,
            rotation_speed_deg_per_sec: defaults::ROTATION_SPEED_DEG_PER_SEC,
            rotation_step_frequency_hz: defaults::ROTATION_STEP_FREQUENCY_HZ,
            geometry: defaults::GEOMETRY,
            joints: (1..=JOINTS).filter_map(JointConfig::default_for).collect(),
        }
    }
}

impl ArmConfig {
    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Time between two ramp steps.
    pub fn step_period(&self) -> Duration {
        Duration::from_micros((1_000_000.0 / self.rotation_step_frequency_hz).round() as u64)
    }

    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f32) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::Config(format!("{name} must be positive, got {value}")))
            }
        }

        positive("pwm_frequency_hz", self.pwm_frequency_hz)?;
        positive("rotation_speed_deg_per_sec", self.rotation_speed_deg_per_sec)?;
        positive("rotation_step_frequency_hz", self.rotation_step_frequency_hz)?;

        let g = &self.geometry;
        for (name, value) in [("d1", g.d1), ("a2", g.a2), ("a3", g.a3), ("d6", g.d6)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!(
                    "link length {name} must be positive, got {value}"
                )));
            }
        }

        if self.joints.len() != JOINTS {
            return Err(Error::Config(format!(
                "expected {JOINTS} joints, got {}",
                self.joints.len()
            )));
        }

        let mut channels = BTreeSet::new();
        for (i, joint) in self.joints.iter().enumerate() {
            let n = i + 1;
            if joint.channel >= crate::drivers::pca9685::CHANNELS {
                return Err(Error::Config(format!(
                    "joint {n}: channel {} outside 0..=15",
                    joint.channel
                )));
            }
            if !channels.insert(joint.channel) {
                return Err(Error::Config(format!(
                    "joint {n}: channel {} already in use",
                    joint.channel
                )));
            }
            if !(joint.min_pulse_us >= 0.0 && joint.min_pulse_us < joint.max_pulse_us) {
                return Err(Error::Config(format!(
                    "joint {n}: pulse range {}..{} µs is empty",
                    joint.min_pulse_us, joint.max_pulse_us
                )));
            }
            positive("max_angle_deg", joint.max_angle_deg)?;
            if !(0.0..=joint.max_angle_deg).contains(&joint.default_angle_deg) {
                return Err(Error::Config(format!(
                    "joint {n}: default angle {} outside [0, {}]",
                    joint.default_angle_deg, joint.max_angle_deg
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ArmConfig::default();
        config.validate().unwrap();
        assert_eq!(config.joints.len(), JOINTS);
        assert_eq!(config.joints[2].channel, 4);
        assert_eq!(config.joints[5].max_angle_deg, 79.8926);
        assert_eq!(config.step_period(), Duration::from_millis(20));
    }

    #[test]
    fn joint_slope() {
        let joint = JointConfig::default_for(6).unwrap();
        assert!((joint.slope() - 1000.0 / 79.8926).abs() < 1e-3);
        assert!(JointConfig::default_for(0).is_none());
        assert!(JointConfig::default_for(7).is_none());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = ArmConfig::from_toml_str(
            r#"
            bus_path = "/dev/i2c-3"
            rotation_speed_deg_per_sec = 45.0
            "#,
        )
        .unwrap();
        assert_eq!(config.bus_path, "/dev/i2c-3");
        assert_eq!(config.rotation_speed_deg_per_sec, 45.0);
        assert_eq!(config.controller_address, defaults::CONTROLLER_ADDRESS);
        assert_eq!(config.joints, ArmConfig::default().joints);
    }

    #[test]
    fn toml_round_trip_through_file() {
        let mut config = ArmConfig::default();
        config.geometry.a3 = 160.0;
        config.joints[0].default_angle_deg = 120.0;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        assert_eq!(ArmConfig::load(file.path()).unwrap(), config);
    }

    #[test]
    fn rejects_wrong_joint_count() {
        let mut config = ArmConfig::default();
        config.joints.pop();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_duplicate_channel() {
        let mut config = ArmConfig::default();
        config.joints[1].channel = config.joints[0].channel;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_bad_joint_calibration() {
        let mut config = ArmConfig::default();
        config.joints[3].max_pulse_us = config.joints[3].min_pulse_us;
        assert!(config.validate().is_err());

        let mut config = ArmConfig::default();
        config.joints[3].default_angle_deg = 300.0;
        assert!(config.validate().is_err());

        let mut config = ArmConfig::default();
        config.joints[3].channel = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_rates() {
        let mut config = ArmConfig::default();
        config.rotation_step_frequency_hz = 0.0;
        assert!(config.validate().is_err());

        let mut config = ArmConfig::default();
        config.geometry.d6 = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file() {
        assert!(matches!(
            ArmConfig::load("/nonexistent/hexarm.toml"),
            Err(Error::Config(_))
        ));
    }
}
