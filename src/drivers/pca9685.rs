// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! NXP PCA9685 16-channel, 12-bit PWM controller.
//!
//! This module handles register addressing and bit packing for the PCA9685. Every channel has an ON
//! and an OFF register pair; the output goes high at the ON tick and low at the OFF tick of each
//! 4096-tick period. Bit 4 of a channel's ON_H / OFF_H register is the full-on / full-off override,
//! which takes precedence over the stored tick counts.
//!
//! The driver is not internally synchronised. Joints share it as a [`SharedPwm`], and that lock is
//! the single point through which every register sequence goes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, trace, warn};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::hw::{I2cTransport, SharedBus};

// Register addresses
pub mod reg {
    pub const MODE1: u8 = 0x00;
    pub const MODE2: u8 = 0x01;
    pub const LED0_ON_L: u8 = 0x06;
    pub const ALL_LED_ON_L: u8 = 0xFA;
    pub const ALL_LED_ON_H: u8 = 0xFB;
    pub const ALL_LED_OFF_L: u8 = 0xFC;
    pub const ALL_LED_OFF_H: u8 = 0xFD;
    pub const PRE_SCALE: u8 = 0xFE;
}

/// MODE1 bits.
pub mod mode1 {
    pub const RESTART: u8 = 1 << 7;
    pub const AI: u8 = 1 << 5;
    pub const SLEEP: u8 = 1 << 4;
    pub const ALLCALL: u8 = 1 << 0;
}

/// Full-on (ON_H) / full-off (OFF_H) override bit.
pub const FULL_OVERRIDE: u8 = 1 << 4;

/// Default 7-bit bus address (all address pins low).
pub const DEFAULT_ADDRESS: u8 = 0x40;

pub const CHANNELS: u8 = 16;

/// Ticks per PWM period.
pub const TICKS: u16 = 4096;

pub const MAX_TICK: u16 = TICKS - 1;

/// Internal oscillator frequency.
pub const OSC_HZ: f32 = 25_000_000.0;

pub const PRESCALER_MIN: u8 = 3;

/// Oscillator start-up time after leaving sleep.
const WAKE_DELAY: Duration = Duration::from_micros(500);

/// Which edge of the pulse a register pair holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    On,
    Off,
}

/// Which byte of a 12-bit tick count a register holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Half {
    /// Bits 7..0.
    Low,
    /// Bits 11..8 in the low nibble, override flag in bit 4.
    High,
}

/// Register address for `channel`, `slot`, `half`.
///
/// `0x08 + 4·channel − 2·[slot = On] + [half = High]`, so channel 0 occupies 0x06..=0x09.
#[inline]
pub const fn register(channel: u8, slot: Slot, half: Half) -> u8 {
    let mut reg = 0x08 + 4 * channel;
    if let Slot::On = slot {
        reg -= 2;
    }
    if let Half::High = half {
        reg += 1;
    }
    reg
}

/// Pulse-width resolution in microseconds for a given prescaler: `(prescaler + 1) / 25`.
#[inline]
pub fn micros_per_step(prescaler: u8) -> f32 {
    (f32::from(prescaler) + 1.0) * 1_000_000.0 / OSC_HZ
}

/// Prescaler that produces `hz` as the PWM update rate.
pub fn prescaler_for(hz: f32) -> Result<u8> {
    let prescaler = (OSC_HZ / (f32::from(TICKS) * hz)).round() - 1.0;
    if !prescaler.is_finite() || !(f32::from(PRESCALER_MIN)..=255.0).contains(&prescaler) {
        return Err(Error::InvalidFrequency(hz));
    }
    Ok(prescaler as u8)
}

fn validate_channel(channel: u8) -> Result<()> {
    if channel < CHANNELS {
        Ok(())
    } else {
        Err(Error::InvalidChannel(channel))
    }
}

fn validate_ticks(ticks: u16) -> Result<()> {
    if ticks <= MAX_TICK {
        Ok(())
    } else {
        Err(Error::InvalidTicks(ticks))
    }
}

/// PCA9685 behind the hardware lock.
pub type SharedPwm<T> = Arc<Mutex<Pca9685<T>>>;

/// PCA9685 driver bound to one bus address.
pub struct Pca9685<T: I2cTransport> {
    bus: SharedBus<T>,
    address: u8,
    prescaler: u8,
}

impl<T: I2cTransport> Pca9685<T> {
    /// Register the controller on `bus` and program its update rate.
    ///
    /// Fails with `PeripheralNotRegistered` when nothing answers at `address`.
    pub fn new(bus: SharedBus<T>, address: u8, frequency_hz: f32) -> Result<Self> {
        if !bus.lock().register_peripheral(address)? {
            return Err(Error::PeripheralNotRegistered(address));
        }

        let mut pca = Self {
            bus,
            address,
            prescaler: 0,
        };
        pca.set_pwm_frequency(frequency_hz)?;
        info!(
            "PCA9685 at 0x{address:02X} running at {frequency_hz} Hz (prescaler {})",
            pca.prescaler
        );
        Ok(pca)
    }

    /// Put the driver behind the hardware lock.
    pub fn shared(self) -> SharedPwm<T> {
        Arc::new(Mutex::new(self))
    }

    #[inline]
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Last prescaler programmed through this driver.
    #[inline]
    pub fn prescaler(&self) -> u8 {
        self.prescaler
    }

    #[inline]
    pub fn micros_per_step(&self) -> f32 {
        micros_per_step(self.prescaler)
    }

    /// Write one register.
    pub fn write_reg(&mut self, reg: u8, value: u8) -> Result<()> {
        trace!("PCA9685 0x{:02X}: reg 0x{reg:02X} <- 0x{value:02X}", self.address);
        self.bus.lock().write(self.address, &[reg, value])
    }

    /// Read one register.
    pub fn read_reg(&mut self, reg: u8) -> Result<u8> {
        let data = self.bus.lock().write_read(self.address, &[reg], 1)?;
        Ok(data[0])
    }

    /// Change only the bits of `reg` selected by `mask`.
    pub fn modify_reg(&mut self, reg: u8, mask: u8, value: u8) -> Result<()> {
        let current = self.read_reg(reg)?;
        self.write_reg(reg, (current & !mask) | (value & mask))
    }

    /// Program the update-rate prescaler (3..=255).
    ///
    /// The prescaler can only be written while the oscillator is asleep.
    pub fn set_prescaler(&mut self, value: u8) -> Result<()> {
        if value < PRESCALER_MIN {
            return Err(Error::InvalidPrescaler(value));
        }

        self.sleep()?;
        self.write_reg(reg::PRE_SCALE, value)?;
        self.wake()?;

        self.prescaler = value;
        Ok(())
    }

    /// Program the prescaler for an update rate in Hz.
    pub fn set_pwm_frequency(&mut self, hz: f32) -> Result<()> {
        let prescaler = prescaler_for(hz)?;
        self.set_prescaler(prescaler)
    }

    /// Write a 12-bit tick count into one register pair, keeping the override bit.
    fn write_ticks(&mut self, channel: u8, slot: Slot, ticks: u16) -> Result<()> {
        self.write_reg(register(channel, slot, Half::Low), ticks as u8)?;
        self.modify_reg(register(channel, slot, Half::High), 0x0F, (ticks >> 8) as u8)
    }

    /// Read a 12-bit tick count back from one register pair.
    fn read_ticks(&mut self, channel: u8, slot: Slot) -> Result<u16> {
        let low = self.read_reg(register(channel, slot, Half::Low))?;
        let high = self.read_reg(register(channel, slot, Half::High))?;
        Ok((u16::from(high & 0x0F) << 8) | u16::from(low))
    }

    /// Set both edges of a channel's pulse.
    ///
    /// Tick counts above 4095 fail with `InvalidTicks` before anything is written.
    pub fn set_channel_pulse(&mut self, channel: u8, on_ticks: u16, off_ticks: u16) -> Result<()> {
        validate_channel(channel)?;
        validate_ticks(on_ticks)?;
        validate_ticks(off_ticks)?;
        self.write_ticks(channel, Slot::On, on_ticks)?;
        self.write_ticks(channel, Slot::Off, off_ticks)
    }

    /// Set only the rising edge.
    pub fn set_on_time(&mut self, channel: u8, ticks: u16) -> Result<()> {
        validate_channel(channel)?;
        validate_ticks(ticks)?;
        self.write_ticks(channel, Slot::On, ticks)
    }

    /// Set only the falling edge.
    pub fn set_off_time(&mut self, channel: u8, ticks: u16) -> Result<()> {
        validate_channel(channel)?;
        validate_ticks(ticks)?;
        self.write_ticks(channel, Slot::Off, ticks)
    }

    /// Tick count for a pulse width at the current prescaler.
    pub fn ticks_for_width(&self, width_us: f32) -> u16 {
        (width_us / self.micros_per_step())
            .round()
            .clamp(0.0, f32::from(MAX_TICK)) as u16
    }

    /// Set a channel's pulse width in microseconds.
    ///
    /// Pulses always start at tick 0, so only the OFF pair is written.
    pub fn set_channel_pulse_width(&mut self, channel: u8, width_us: f32) -> Result<()> {
        validate_channel(channel)?;
        let ticks = self.ticks_for_width(width_us);
        self.write_ticks(channel, Slot::Off, ticks)
    }

    /// Set a channel's duty cycle in percent.
    pub fn set_duty_cycle(&mut self, channel: u8, percent: f32) -> Result<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(Error::InvalidDuty(percent));
        }
        validate_channel(channel)?;

        let on = (percent * f32::from(MAX_TICK) / 100.0).round() as u16;
        self.set_channel_pulse(channel, on, MAX_TICK - on)
    }

    /// Current `(on, off)` ticks of a channel.
    pub fn channel_pulse(&mut self, channel: u8) -> Result<(u16, u16)> {
        validate_channel(channel)?;
        let on = self.read_ticks(channel, Slot::On)?;
        let off = self.read_ticks(channel, Slot::Off)?;
        Ok((on, off))
    }

    /// Clear the channel's full-off override.
    pub fn channel_on(&mut self, channel: u8) -> Result<()> {
        validate_channel(channel)?;
        self.modify_reg(register(channel, Slot::Off, Half::High), FULL_OVERRIDE, 0)
    }

    /// Set the channel's full-off override. Stored timing is kept.
    pub fn channel_off(&mut self, channel: u8) -> Result<()> {
        validate_channel(channel)?;
        self.modify_reg(
            register(channel, Slot::Off, Half::High),
            FULL_OVERRIDE,
            FULL_OVERRIDE,
        )
    }

    /// Whether the channel's full-off override is clear.
    pub fn is_channel_on(&mut self, channel: u8) -> Result<bool> {
        validate_channel(channel)?;
        let off_h = self.read_reg(register(channel, Slot::Off, Half::High))?;
        Ok(off_h & FULL_OVERRIDE == 0)
    }

    /// Clear the full-off override on every channel.
    ///
    /// Goes channel by channel: the ALL_LED registers read back as zero and a write to them lands
    /// on every channel's tick bits too.
    pub fn all_on(&mut self) -> Result<()> {
        (0..CHANNELS).try_for_each(|channel| self.channel_on(channel))
    }

    /// Set the full-off override on every channel. Stored timing is kept.
    pub fn all_off(&mut self) -> Result<()> {
        (0..CHANNELS).try_for_each(|channel| self.channel_off(channel))
    }

    /// Stop the oscillator. Outputs are off while asleep.
    pub fn sleep(&mut self) -> Result<()> {
        self.modify_reg(reg::MODE1, mode1::SLEEP, mode1::SLEEP)
    }

    /// Restart the oscillator.
    pub fn wake(&mut self) -> Result<()> {
        self.modify_reg(reg::MODE1, mode1::SLEEP, 0)?;
        thread::sleep(WAKE_DELAY);

        // PWM channels resume only after RESTART is written back while it reads as set.
        let mode = self.read_reg(reg::MODE1)?;
        if mode & mode1::RESTART != 0 {
            self.write_reg(reg::MODE1, mode)?;
        }
        Ok(())
    }

    pub fn is_sleeping(&mut self) -> Result<bool> {
        Ok(self.read_reg(reg::MODE1)? & mode1::SLEEP != 0)
    }
}

impl<T: I2cTransport> Drop for Pca9685<T> {
    fn drop(&mut self) {
        if let Err(e) = self.sleep() {
            warn!("PCA9685 0x{:02X} failed to enter sleep: {e}", self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimBus;
    use crate::hw::BusChannel;

    const ADDR: u8 = DEFAULT_ADDRESS;

    fn pca() -> (SimBus, Pca9685<SimBus>) {
        let sim = SimBus::new().with_pca9685(ADDR);
        let bus = BusChannel::new(sim.clone()).shared();
        let pca = Pca9685::new(bus, ADDR, 50.0).unwrap();
        (sim, pca)
    }

    #[test]
    fn register_layout() {
        for c in 0..CHANNELS {
            let on_l = register(c, Slot::On, Half::Low);
            assert_eq!(on_l, 0x06 + 4 * c);
            assert_eq!(on_l + 1, register(c, Slot::On, Half::High));
            assert_eq!(on_l + 2, register(c, Slot::Off, Half::Low));
            assert_eq!(on_l + 3, register(c, Slot::Off, Half::High));
        }
        assert_eq!(register(0, Slot::On, Half::Low), reg::LED0_ON_L);
        assert_eq!(register(15, Slot::Off, Half::High), 0x45);
    }

    #[test]
    fn micros_per_step_is_monotonic() {
        let mut previous = 0.0;
        for p in PRESCALER_MIN..=255 {
            let us = micros_per_step(p);
            assert!((us - (f32::from(p) + 1.0) / 25.0).abs() < 1e-4);
            assert!(us > previous);
            previous = us;
        }
    }

    #[test]
    fn prescaler_for_servo_rate() {
        assert_eq!(prescaler_for(50.0).unwrap(), 121);
        assert!(matches!(prescaler_for(5000.0), Err(Error::InvalidFrequency(_))));
        assert!(matches!(prescaler_for(10.0), Err(Error::InvalidFrequency(_))));
    }

    #[test]
    fn construction_programs_prescaler_and_wakes() {
        let (sim, mut pca) = pca();
        assert_eq!(pca.prescaler(), 121);
        assert_eq!(sim.register(ADDR, reg::PRE_SCALE), 121);
        assert!(!pca.is_sleeping().unwrap());
    }

    #[test]
    fn construction_fails_without_device() {
        let bus = BusChannel::new(SimBus::new()).shared();
        assert!(matches!(
            Pca9685::new(bus, ADDR, 50.0),
            Err(Error::PeripheralNotRegistered(ADDR))
        ));
    }

    #[test]
    fn invalid_prescaler_rejected_before_any_write() {
        let (sim, mut pca) = pca();
        let writes = sim.write_count();
        assert!(matches!(pca.set_prescaler(2), Err(Error::InvalidPrescaler(2))));
        assert_eq!(sim.write_count(), writes);
        assert_eq!(pca.prescaler(), 121);
    }

    #[test]
    fn set_prescaler_leaves_device_awake() {
        let (sim, mut pca) = pca();
        pca.set_prescaler(3).unwrap();
        assert_eq!(sim.register(ADDR, reg::PRE_SCALE), 3);
        assert_eq!(sim.register(ADDR, reg::MODE1) & mode1::SLEEP, 0);
        assert_eq!(pca.micros_per_step(), 0.16);
    }

    #[test]
    fn channel_pulse_splits_ticks() {
        let (sim, mut pca) = pca();
        pca.set_channel_pulse(3, 0x123, 0xABC).unwrap();

        assert_eq!(sim.register(ADDR, register(3, Slot::On, Half::Low)), 0x23);
        assert_eq!(sim.register(ADDR, register(3, Slot::On, Half::High)), 0x01);
        assert_eq!(sim.register(ADDR, register(3, Slot::Off, Half::Low)), 0xBC);
        // Full-off override from power-on is preserved.
        assert_eq!(
            sim.register(ADDR, register(3, Slot::Off, Half::High)),
            0x0A | FULL_OVERRIDE
        );
        assert_eq!(pca.channel_pulse(3).unwrap(), (0x123, 0xABC));
    }

    #[test]
    fn invalid_channel_rejected() {
        let (sim, mut pca) = pca();
        let writes = sim.write_count();
        assert!(matches!(pca.set_channel_pulse(16, 0, 0), Err(Error::InvalidChannel(16))));
        assert!(matches!(pca.channel_on(200), Err(Error::InvalidChannel(200))));
        assert!(matches!(
            pca.set_channel_pulse_width(16, 1500.0),
            Err(Error::InvalidChannel(16))
        ));
        assert_eq!(sim.write_count(), writes);
    }

    #[test]
    fn pulse_width_round_trip() {
        let (_, mut pca) = pca();
        for width in [400.0_f32, 540.0, 1234.5, 1500.0, 2665.0, 2795.0] {
            pca.set_channel_pulse_width(8, width).unwrap();
            let (on, off) = pca.channel_pulse(8).unwrap();
            assert_eq!(on, 0);
            assert_eq!(off, (width / pca.micros_per_step()).round() as u16);
        }
    }

    #[test]
    fn pulse_width_only_touches_off_pair() {
        let (sim, mut pca) = pca();
        pca.set_on_time(2, 0x0FF).unwrap();
        pca.set_channel_pulse_width(2, 1500.0).unwrap();
        assert_eq!(sim.register(ADDR, register(2, Slot::On, Half::Low)), 0xFF);
    }

    #[test]
    fn duty_cycle_ticks() {
        let (_, mut pca) = pca();
        pca.set_duty_cycle(1, 25.0).unwrap();
        assert_eq!(pca.channel_pulse(1).unwrap(), (1024, 3071));

        pca.set_duty_cycle(1, 100.0).unwrap();
        assert_eq!(pca.channel_pulse(1).unwrap(), (4095, 0));

        assert!(matches!(pca.set_duty_cycle(1, 100.5), Err(Error::InvalidDuty(_))));
        assert!(matches!(pca.set_duty_cycle(1, -1.0), Err(Error::InvalidDuty(_))));
        assert!(matches!(pca.set_duty_cycle(1, f32::NAN), Err(Error::InvalidDuty(_))));
    }

    #[test]
    fn channel_override_keeps_timing() {
        let (sim, mut pca) = pca();
        pca.set_channel_pulse_width(5, 1500.0).unwrap();
        let timing = pca.channel_pulse(5).unwrap();

        pca.channel_on(5).unwrap();
        assert!(pca.is_channel_on(5).unwrap());
        assert_eq!(pca.channel_pulse(5).unwrap(), timing);

        pca.channel_off(5).unwrap();
        assert!(!pca.is_channel_on(5).unwrap());
        assert_eq!(pca.channel_pulse(5).unwrap(), timing);

        // Neighbouring channel untouched.
        assert_ne!(
            sim.register(ADDR, register(4, Slot::Off, Half::High)) & FULL_OVERRIDE,
            0
        );
    }

    #[test]
    fn tick_counts_beyond_period_rejected() {
        let (sim, mut pca) = pca();
        let writes = sim.write_count();
        assert!(matches!(
            pca.set_channel_pulse(0, 0, TICKS),
            Err(Error::InvalidTicks(TICKS))
        ));
        assert!(matches!(pca.set_on_time(0, 0x1000), Err(Error::InvalidTicks(0x1000))));
        assert!(matches!(pca.set_off_time(0, u16::MAX), Err(Error::InvalidTicks(u16::MAX))));
        assert_eq!(sim.write_count(), writes);

        pca.set_off_time(0, MAX_TICK).unwrap();
        assert_eq!(pca.channel_pulse(0).unwrap(), (0, MAX_TICK));
    }

    #[test]
    fn global_override_keeps_every_channel_timing() {
        let (sim, mut pca) = pca();
        pca.set_channel_pulse_width(0, 1500.0).unwrap();
        pca.set_channel_pulse(9, 0x100, 0xA00).unwrap();
        let timing = [pca.channel_pulse(0).unwrap(), pca.channel_pulse(9).unwrap()];
        assert_eq!(timing[0].1, 307);

        pca.all_off().unwrap();
        for channel in 0..CHANNELS {
            assert!(!pca.is_channel_on(channel).unwrap());
        }
        pca.all_on().unwrap();
        for channel in 0..CHANNELS {
            assert!(pca.is_channel_on(channel).unwrap());
        }

        assert_eq!(pca.channel_pulse(0).unwrap(), timing[0]);
        assert_eq!(pca.channel_pulse(9).unwrap(), timing[1]);
        assert_eq!(sim.register(ADDR, reg::ALL_LED_OFF_H), 0);
    }

    #[test]
    fn global_controls() {
        let (_, mut pca) = pca();
        pca.sleep().unwrap();
        assert!(pca.is_sleeping().unwrap());
        pca.wake().unwrap();
        assert!(!pca.is_sleeping().unwrap());
    }

    #[test]
    fn drop_puts_device_to_sleep() {
        let (sim, pca) = pca();
        drop(pca);
        assert_ne!(sim.register(ADDR, reg::MODE1) & mode1::SLEEP, 0);
    }
}
