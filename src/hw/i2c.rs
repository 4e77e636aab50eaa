// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Inter-Integrated Circuit (I2C) bus channel.
//!
//! - `I2cTransport` is the raw byte-level transport (address select, read, write).
//! - `LinuxI2c` implements it on top of a `/dev/i2c-N` character device through `i2cdev`.
//! - `BusChannel` owns a transport, remembers which peripheral is currently selected and only lets
//!   registered peripherals transact.
//!
//! Selecting a peripheral costs an `I2C_SLAVE` ioctl round trip, so `BusChannel` skips it when the
//! address is already active. Peripheral drivers share one channel through [`SharedBus`]; each transaction
//! holds the lock for its select + transfer pair.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use log::{info, trace};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Address the adapter points at until the first real selection.
const GENERAL_CALL: u16 = 0x00;

/// Byte-level access to an I2C adapter.
///
/// `read` and `write` report how many bytes actually moved; a short count is not an error at this
/// level. Transports are `Send` so ramp threads can drive the bus.
pub trait I2cTransport: Send {
    /// Point subsequent transfers at the 7-bit address `addr`.
    fn select(&mut self, addr: u8) -> io::Result<()>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Linux userspace I2C adapter (`i2c-dev`).
pub struct LinuxI2c {
    dev: LinuxI2CDevice,
}

impl LinuxI2c {
    /// Open the adapter at `path`, e.g. `/dev/i2c-1`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let dev = LinuxI2CDevice::new(path, GENERAL_CALL).map_err(io::Error::other)?;
        Ok(Self { dev })
    }
}

impl I2cTransport for LinuxI2c {
    fn select(&mut self, addr: u8) -> io::Result<()> {
        self.dev
            .set_slave_address(u16::from(addr))
            .map_err(io::Error::other)
    }

    // i2c-dev transfers are all-or-nothing.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        I2CDevice::read(&mut self.dev, buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        I2CDevice::write(&mut self.dev, buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }
}

/// One bus channel shared by every peripheral driver.
pub type SharedBus<T> = Arc<Mutex<BusChannel<T>>>;

/// Bus channel with address-selection caching and a peripheral registry.
pub struct BusChannel<T> {
    transport: T,
    active: Option<u8>,
    registered: BTreeSet<u8>,
}

impl BusChannel<LinuxI2c> {
    /// Open the Linux adapter at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let transport = LinuxI2c::open(path).map_err(|source| Error::BusUnavailable {
            path: PathBuf::from(path),
            source,
        })?;
        info!("opened I2C bus {}", path.display());
        Ok(Self::new(transport))
    }
}

impl<T: I2cTransport> BusChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            active: None,
            registered: BTreeSet::new(),
        }
    }

    /// Wrap the channel so several drivers can share it.
    pub fn shared(self) -> SharedBus<T> {
        Arc::new(Mutex::new(self))
    }

    /// Last selected peripheral, if any.
    #[inline]
    pub fn active_address(&self) -> Option<u8> {
        self.active
    }

    #[inline]
    pub fn is_registered(&self, addr: u8) -> bool {
        self.registered.contains(&addr)
    }

    /// Make `addr` the active peripheral. No-op when it already is.
    fn select(&mut self, addr: u8) -> Result<()> {
        if self.active == Some(addr) {
            return Ok(());
        }
        // A failed select leaves the adapter in an unknown state.
        self.active = None;
        self.transport.select(addr)?;
        self.active = Some(addr);
        trace!("selected peripheral 0x{addr:02X}");
        Ok(())
    }

    /// Probe `addr` with a one-byte read.
    ///
    /// Returns `Ok(false)` when nothing answers. Only a failing address select is an error.
    pub fn ping(&mut self, addr: u8) -> Result<bool> {
        self.select(addr)?;
        let mut dummy = [0u8; 1];
        Ok(matches!(self.transport.read(&mut dummy), Ok(1)))
    }

    /// Ping `addr` and add it to the registry if it answers.
    ///
    /// Returns whether the peripheral is present.
    pub fn register_peripheral(&mut self, addr: u8) -> Result<bool> {
        let present = self.ping(addr)?;
        if present && self.registered.insert(addr) {
            info!("registered peripheral 0x{addr:02X}");
        }
        Ok(present)
    }

    fn ensure_registered(&self, addr: u8) -> Result<()> {
        if self.is_registered(addr) {
            Ok(())
        } else {
            Err(Error::PeripheralNotRegistered(addr))
        }
    }

    /// Read `n` bytes from `addr`.
    pub fn read(&mut self, addr: u8, n: usize) -> Result<Vec<u8>> {
        self.ensure_registered(addr)?;
        self.select(addr)?;

        let mut buf = vec![0u8; n];
        let actual = self.transport.read(&mut buf)?;
        if actual != n {
            return Err(Error::TransferFailed {
                addr,
                expected: n,
                actual,
            });
        }
        Ok(buf)
    }

    /// Write `bytes` to `addr`.
    pub fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<()> {
        self.ensure_registered(addr)?;
        self.select(addr)?;

        let actual = self.transport.write(bytes)?;
        if actual != bytes.len() {
            return Err(Error::TransferFailed {
                addr,
                expected: bytes.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Write `bytes` (typically a register pointer) and then read `n` bytes back, without letting
    /// another peripheral reselect in between.
    pub fn write_read(&mut self, addr: u8, bytes: &[u8], n: usize) -> Result<Vec<u8>> {
        self.write(addr, bytes)?;
        self.read(addr, n)
    }
}
