// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Simulated I2C adapter.
//!
//! `SimBus` answers like a `/dev/i2c-N` node with a PCA9685 and optionally an AS5600 attached. Each
//! device is a flat 256-byte register file with a register pointer: the first byte of a write sets
//! the pointer, further bytes are stored with auto-increment, and reads return bytes from the
//! pointer onwards.
//!
//! An AS5600 can be linked to a PCA9685 channel through a [`ServoModel`]; its raw angle registers
//! then follow the pulse width programmed on that channel, which is what the calibration sweep
//! needs for a dry run.
//!
//! Clones share state, so a test can keep one handle while the bus channel owns another.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::i2c::I2cTransport;
use crate::drivers::{as5600, pca9685};

/// How a simulated servo maps pulse width to shaft angle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ServoModel {
    pub min_pulse_us: f32,
    pub max_pulse_us: f32,
    pub max_angle_deg: f32,
}

#[derive(Copy, Clone, Debug)]
struct EncoderLink {
    encoder: u8,
    pwm: u8,
    channel: u8,
    servo: ServoModel,
}

struct Device {
    regs: [u8; 256],
    pointer: u8,
    /// Fan ALL_LED writes out to every channel, as the PCA9685 does.
    broadcast_all_led: bool,
}

impl Device {
    fn new() -> Self {
        Self {
            regs: [0; 256],
            pointer: 0,
            broadcast_all_led: false,
        }
    }

    fn store(&mut self, byte: u8) {
        let reg = self.pointer;
        self.pointer = self.pointer.wrapping_add(1);

        let all_led = pca9685::reg::ALL_LED_ON_L..=pca9685::reg::ALL_LED_OFF_H;
        if self.broadcast_all_led && all_led.contains(&reg) {
            // ALL_LED registers themselves always read back as zero.
            let offset = reg - pca9685::reg::ALL_LED_ON_L;
            for channel in 0..pca9685::CHANNELS {
                self.regs[(pca9685::reg::LED0_ON_L + 4 * channel + offset) as usize] = byte;
            }
            return;
        }
        self.regs[reg as usize] = byte;
    }

    /// Register file of a PCA9685 right after power-on reset.
    fn pca9685() -> Self {
        let mut dev = Self::new();
        dev.regs[pca9685::reg::MODE1 as usize] = pca9685::mode1::SLEEP | pca9685::mode1::ALLCALL;
        dev.regs[pca9685::reg::MODE2 as usize] = 0x04;
        dev.regs[pca9685::reg::PRE_SCALE as usize] = 0x1E;
        for channel in 0..pca9685::CHANNELS {
            let off_h = pca9685::register(channel, pca9685::Slot::Off, pca9685::Half::High);
            dev.regs[off_h as usize] = pca9685::FULL_OVERRIDE;
        }
        dev.broadcast_all_led = true;
        dev
    }

    fn as5600() -> Self {
        let mut dev = Self::new();
        dev.regs[as5600::reg::STATUS as usize] = as5600::status::MD;
        dev
    }
}

#[derive(Default)]
struct SimState {
    devices: BTreeMap<u8, Device>,
    selected: Option<u8>,
    link: Option<EncoderLink>,
    selects: usize,
    writes: usize,
    short_transfers: bool,
}

impl SimState {
    fn target(&mut self) -> io::Result<&mut Device> {
        let addr = self.selected.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no peripheral selected")
        })?;
        self.devices.get_mut(&addr).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no device answers at 0x{addr:02X}"),
            )
        })
    }

    fn transfer_len(&self, requested: usize) -> usize {
        if self.short_transfers {
            requested.saturating_sub(1)
        } else {
            requested
        }
    }

    /// Recompute the linked encoder's angle registers from the PWM channel it watches.
    fn refresh_encoder(&mut self) {
        let Some(link) = self.link else { return };
        if self.selected != Some(link.encoder) || link.channel >= pca9685::CHANNELS {
            return;
        }
        let Some(pwm) = self.devices.get(&link.pwm) else {
            return;
        };

        let reg = |slot, half| pwm.regs[pca9685::register(link.channel, slot, half) as usize];
        if reg(pca9685::Slot::Off, pca9685::Half::High) & pca9685::FULL_OVERRIDE != 0 {
            // Unpowered servo holds its last position.
            return;
        }
        let ticks = |slot| {
            (u16::from(reg(slot, pca9685::Half::High) & 0x0F) << 8)
                | u16::from(reg(slot, pca9685::Half::Low))
        };
        let width = ticks(pca9685::Slot::Off).wrapping_sub(ticks(pca9685::Slot::On)) & 0x0FFF;
        let pulse_us = f32::from(width)
            * pca9685::micros_per_step(pwm.regs[pca9685::reg::PRE_SCALE as usize]);

        let servo = link.servo;
        let angle = ((pulse_us - servo.min_pulse_us) / (servo.max_pulse_us - servo.min_pulse_us)
            * servo.max_angle_deg)
            .clamp(0.0, servo.max_angle_deg);
        let raw = ((angle / 360.0 * f32::from(as5600::STEPS_PER_REV)).round() as u16) & 0x0FFF;

        if let Some(enc) = self.devices.get_mut(&link.encoder) {
            for high in [as5600::reg::RAW_ANGLE_H, as5600::reg::ANGLE_H] {
                enc.regs[high as usize] = (raw >> 8) as u8;
                enc.regs[high as usize + 1] = raw as u8;
            }
        }
    }
}

/// In-memory I2C adapter.
#[derive(Clone, Default)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    /// Empty bus; nothing answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a PCA9685 in its power-on state.
    pub fn with_pca9685(self, addr: u8) -> Self {
        self.state.lock().devices.insert(addr, Device::pca9685());
        self
    }

    /// Attach an AS5600 reading zero.
    pub fn with_as5600(self, addr: u8) -> Self {
        self.state.lock().devices.insert(addr, Device::as5600());
        self
    }

    /// Make the AS5600 at `encoder` follow the servo on PCA9685 `pwm`, `channel`.
    ///
    /// A channel outside `0..16` leaves the encoder reading still.
    pub fn with_linked_servo(self, encoder: u8, pwm: u8, channel: u8, servo: ServoModel) -> Self {
        self.state.lock().link = Some(EncoderLink {
            encoder,
            pwm,
            channel,
            servo,
        });
        self
    }

    /// Unplug the device at `addr`; later transfers to it fail.
    pub fn remove(&self, addr: u8) {
        self.state.lock().devices.remove(&addr);
    }

    /// Make every following read and write move one byte less than requested.
    pub fn set_short_transfers(&self, short: bool) {
        self.state.lock().short_transfers = short;
    }

    /// Current value of register `reg` on device `addr`.
    pub fn register(&self, addr: u8, reg: u8) -> u8 {
        self.state
            .lock()
            .devices
            .get(&addr)
            .map_or(0, |dev| dev.regs[reg as usize])
    }

    pub fn set_register(&self, addr: u8, reg: u8, value: u8) {
        if let Some(dev) = self.state.lock().devices.get_mut(&addr) {
            dev.regs[reg as usize] = value;
        }
    }

    /// Number of address selections the adapter has seen.
    pub fn select_count(&self) -> usize {
        self.state.lock().selects
    }

    /// Number of write transfers the adapter has seen.
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }
}

impl I2cTransport for SimBus {
    fn select(&mut self, addr: u8) -> io::Result<()> {
        let mut state = self.state.lock();
        state.selected = Some(addr);
        state.selects += 1;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.refresh_encoder();
        let n = state.transfer_len(buf.len());
        let dev = state.target()?;
        for byte in &mut buf[..n] {
            *byte = dev.regs[dev.pointer as usize];
            dev.pointer = dev.pointer.wrapping_add(1);
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.writes += 1;
        let n = state.transfer_len(buf.len());
        let dev = state.target()?;
        if let Some((&pointer, data)) = buf[..n].split_first() {
            dev.pointer = pointer;
            for &byte in data {
                dev.store(byte);
            }
        }
        Ok(n)
    }
}
