// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! ams AS5600 12-bit magnetic rotary position sensor.
//!
//! Only the calibration tooling uses the encoder; normal arm operation is open loop. Angles are kept
//! relative to a software zero captured with [`As5600::zero`], so the on-chip ZPOS/MPOS OTP
//! registers are never burned.

use log::{debug, info};

use crate::error::{Error, Result};
use crate::hw::{I2cTransport, SharedBus};

/// Fixed 7-bit bus address.
pub const DEFAULT_ADDRESS: u8 = 0x36;

/// Steps per mechanical revolution.
pub const STEPS_PER_REV: u16 = 4096;

// Register addresses
pub mod reg {
    pub const ZMCO: u8 = 0x00;
    pub const ZPOS_H: u8 = 0x01;
    pub const MPOS_H: u8 = 0x03;
    pub const MANG_H: u8 = 0x05;
    pub const CONF_H: u8 = 0x07;
    pub const CONF_L: u8 = 0x08;
    pub const STATUS: u8 = 0x0B;
    pub const RAW_ANGLE_H: u8 = 0x0C;
    pub const RAW_ANGLE_L: u8 = 0x0D;
    pub const ANGLE_H: u8 = 0x0E;
    pub const ANGLE_L: u8 = 0x0F;
    pub const AGC: u8 = 0x1A;
    pub const MAGNITUDE_H: u8 = 0x1B;
}

/// STATUS bits.
pub mod status {
    pub const MD: u8 = 1 << 5;
    pub const ML: u8 = 1 << 4;
    pub const MH: u8 = 1 << 3;
}

/// STATUS register.
#[derive(Copy, Clone, Debug)]
pub struct Status {
    raw: u8,
}

impl Status {
    #[inline]
    pub fn raw(&self) -> u8 {
        self.raw
    }

    /// Magnet detected.
    #[inline]
    pub fn magnet_detected(&self) -> bool {
        (self.raw & status::MD) != 0
    }

    /// AGC maximum gain overflow, magnet too weak.
    #[inline]
    pub fn magnet_too_weak(&self) -> bool {
        (self.raw & status::ML) != 0
    }

    /// AGC minimum gain overflow, magnet too strong.
    #[inline]
    pub fn magnet_too_strong(&self) -> bool {
        (self.raw & status::MH) != 0
    }
}

/// Power mode (CONF bits 1:0).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerMode {
    #[default]
    Nominal = 0b00,
    Low1 = 0b01,
    Low2 = 0b10,
    Low3 = 0b11,
}

/// CONF register builder.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Conf {
    pub power_mode: PowerMode,
    /// Hysteresis in LSBs, 0..=3.
    pub hysteresis: u8,
    /// Output stage, 0..=2.
    pub output_stage: u8,
    /// PWM output frequency select, 0..=3.
    pub pwm_frequency: u8,
    /// Slow filter select, 0..=3 (16x, 8x, 4x, 2x).
    pub slow_filter: u8,
    /// Fast filter threshold, 0..=7.
    pub fast_filter_threshold: u8,
    pub watchdog: bool,
}

impl Conf {
    /// Pack into the 14-bit register value.
    pub fn bits(&self) -> u16 {
        u16::from(self.power_mode as u8)
            | u16::from(self.hysteresis & 0b11) << 2
            | u16::from(self.output_stage & 0b11) << 4
            | u16::from(self.pwm_frequency & 0b11) << 6
            | u16::from(self.slow_filter & 0b11) << 8
            | u16::from(self.fast_filter_threshold & 0b111) << 10
            | u16::from(self.watchdog) << 13
    }
}

/// Convert encoder steps to degrees.
#[inline]
pub fn steps_to_degrees(steps: u16) -> f32 {
    f32::from(steps) * 360.0 / f32::from(STEPS_PER_REV)
}

/// AS5600 driver bound to one bus address.
pub struct As5600<T: I2cTransport> {
    bus: SharedBus<T>,
    address: u8,
    zero: u16,
}

impl<T: I2cTransport> As5600<T> {
    /// Register the encoder on `bus`.
    pub fn new(bus: SharedBus<T>, address: u8) -> Result<Self> {
        if !bus.lock().register_peripheral(address)? {
            return Err(Error::PeripheralNotRegistered(address));
        }
        info!("AS5600 at 0x{address:02X} registered");
        Ok(Self {
            bus,
            address,
            zero: 0,
        })
    }

    #[inline]
    pub fn address(&self) -> u8 {
        self.address
    }

    fn read_u16(&mut self, high: u8) -> Result<u16> {
        let data = self.bus.lock().write_read(self.address, &[high], 2)?;
        Ok((u16::from(data[0]) << 8) | u16::from(data[1]))
    }

    /// Write the CONF register.
    pub fn configure(&mut self, conf: Conf) -> Result<()> {
        let bits = conf.bits();
        debug!("AS5600 0x{:02X}: CONF <- 0x{bits:04X}", self.address);
        self.bus
            .lock()
            .write(self.address, &[reg::CONF_H, (bits >> 8) as u8, bits as u8])
    }

    pub fn status(&mut self) -> Result<Status> {
        let data = self.bus.lock().write_read(self.address, &[reg::STATUS], 1)?;
        Ok(Status { raw: data[0] })
    }

    /// Unscaled, unzeroed 12-bit angle.
    pub fn raw_step(&mut self) -> Result<u16> {
        Ok(self.read_u16(reg::RAW_ANGLE_H)? & 0x0FFF)
    }

    /// Angle in steps relative to the software zero.
    pub fn step(&mut self) -> Result<u16> {
        let raw = self.raw_step()?;
        Ok(raw.wrapping_sub(self.zero) % STEPS_PER_REV)
    }

    /// Angle in degrees relative to the software zero.
    pub fn angle_deg(&mut self) -> Result<f32> {
        Ok(steps_to_degrees(self.step()?))
    }

    /// Make the current shaft position read as zero.
    pub fn zero(&mut self) -> Result<()> {
        self.zero = self.raw_step()?;
        debug!("AS5600 0x{:02X}: zero at raw step {}", self.address, self.zero);
        Ok(())
    }

    /// Raw step currently treated as zero.
    #[inline]
    pub fn zero_offset(&self) -> u16 {
        self.zero
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimBus;
    use crate::hw::BusChannel;

    fn encoder() -> (SimBus, As5600<SimBus>) {
        let sim = SimBus::new().with_as5600(DEFAULT_ADDRESS);
        let bus = BusChannel::new(sim.clone()).shared();
        let enc = As5600::new(bus, DEFAULT_ADDRESS).unwrap();
        (sim, enc)
    }

    fn set_raw(sim: &SimBus, raw: u16) {
        sim.set_register(DEFAULT_ADDRESS, reg::RAW_ANGLE_H, (raw >> 8) as u8);
        sim.set_register(DEFAULT_ADDRESS, reg::RAW_ANGLE_L, raw as u8);
    }

    #[test]
    fn conf_packing() {
        let conf = Conf {
            hysteresis: 0b11,
            ..Conf::default()
        };
        assert_eq!(conf.bits(), 0b1100);

        let conf = Conf {
            power_mode: PowerMode::Low3,
            slow_filter: 0b10,
            fast_filter_threshold: 0b101,
            watchdog: true,
            ..Conf::default()
        };
        assert_eq!(conf.bits(), 0b11 | 0b10 << 8 | 0b101 << 10 | 1 << 13);
    }

    #[test]
    fn configure_writes_both_bytes() {
        let (sim, mut enc) = encoder();
        let conf = Conf {
            hysteresis: 0b11,
            watchdog: true,
            ..Conf::default()
        };
        enc.configure(conf).unwrap();
        assert_eq!(sim.register(DEFAULT_ADDRESS, reg::CONF_H), 0x20);
        assert_eq!(sim.register(DEFAULT_ADDRESS, reg::CONF_L), 0x0C);
    }

    #[test]
    fn status_bits() {
        let (sim, mut enc) = encoder();
        assert!(enc.status().unwrap().magnet_detected());

        sim.set_register(DEFAULT_ADDRESS, reg::STATUS, status::ML);
        let status = enc.status().unwrap();
        assert!(!status.magnet_detected());
        assert!(status.magnet_too_weak());
        assert!(!status.magnet_too_strong());
    }

    #[test]
    fn raw_step_masks_to_12_bits() {
        let (sim, mut enc) = encoder();
        set_raw(&sim, 0xF123);
        assert_eq!(enc.raw_step().unwrap(), 0x0123);
    }

    #[test]
    fn zero_is_relative_and_wraps() {
        let (sim, mut enc) = encoder();
        set_raw(&sim, 4000);
        enc.zero().unwrap();
        assert_eq!(enc.zero_offset(), 4000);
        assert_eq!(enc.step().unwrap(), 0);

        set_raw(&sim, 4095);
        assert_eq!(enc.step().unwrap(), 95);

        set_raw(&sim, 104);
        assert_eq!(enc.step().unwrap(), 200);
        assert!((enc.angle_deg().unwrap() - 17.578_125).abs() < 1e-4);
    }

    #[test]
    fn missing_encoder_not_registered() {
        let bus = BusChannel::new(SimBus::new()).shared();
        assert!(matches!(
            As5600::new(bus, DEFAULT_ADDRESS),
            Err(Error::PeripheralNotRegistered(DEFAULT_ADDRESS))
        ));
    }
}
