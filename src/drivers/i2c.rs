//! I2C bus driver contract and implementations

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Bus driver trait for register-addressed I2C access
pub trait BusDriver: Send {
    /// Write one byte to a register of the device at `address`
    fn write_byte(&mut self, address: u16, register: u8, value: u8) -> Result<()>;

    /// Read `length` bytes starting at `register` of the device at `address`
    fn read_block(&mut self, address: u16, register: u8, length: usize) -> Result<Vec<u8>>;

    /// Send a bare command byte to the device at `address` (no register)
    fn send_byte(&mut self, address: u16, value: u8) -> Result<()>;
}

/// Raspberry Pi I2C driver backed by rppal
pub struct RppalBus {
    i2c: rppal::i2c::I2c,
}

impl RppalBus {
    /// Open an I2C bus by number
    pub fn open(bus: u8) -> Result<Self> {
        let i2c = rppal::i2c::I2c::with_bus(bus)?;
        log::info!("Opened I2C bus {}", bus);
        Ok(Self { i2c })
    }
}

impl BusDriver for RppalBus {
    fn write_byte(&mut self, address: u16, register: u8, value: u8) -> Result<()> {
        self.i2c.set_slave_address(address)?;
        self.i2c.smbus_write_byte(register, value)?;
        Ok(())
    }

    fn read_block(&mut self, address: u16, register: u8, length: usize) -> Result<Vec<u8>> {
        self.i2c.set_slave_address(address)?;
        let mut buffer = vec![0u8; length];
        self.i2c.block_read(register, &mut buffer)?;
        Ok(buffer)
    }

    fn send_byte(&mut self, address: u16, value: u8) -> Result<()> {
        self.i2c.set_slave_address(address)?;
        self.i2c.smbus_send_byte(value)?;
        Ok(())
    }
}

#[derive(Default)]
struct MockBusInner {
    registers: HashMap<(u16, u8), Vec<u8>>,
    writes: Vec<(u16, u8, u8)>,
    commands: Vec<(u16, u8)>,
    failing: Vec<u16>,
}

/// Mock bus driver for unit testing
///
/// Clones share state, so a test can keep one handle while the registry owns
/// the other.
#[derive(Clone, Default)]
pub struct MockBus {
    inner: Arc<Mutex<MockBusInner>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject the bytes a read_block on (address, register) will return
    pub fn set_register(&self, address: u16, register: u8, data: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .registers
            .insert((address, register), data.to_vec());
    }

    /// Make every operation on an address fail
    pub fn fail_address(&self, address: u16) {
        self.inner.lock().unwrap().failing.push(address);
    }

    /// Every write_byte call so far, in order
    pub fn writes(&self) -> Vec<(u16, u8, u8)> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// Every send_byte call so far, in order
    pub fn commands(&self) -> Vec<(u16, u8)> {
        self.inner.lock().unwrap().commands.clone()
    }

    fn check(inner: &MockBusInner, address: u16) -> Result<()> {
        if inner.failing.contains(&address) {
            Err(Error::Other(format!("mock NACK at address {:#04x}", address)))
        } else {
            Ok(())
        }
    }
}

impl BusDriver for MockBus {
    fn write_byte(&mut self, address: u16, register: u8, value: u8) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, address)?;
        inner.writes.push((address, register, value));
        Ok(())
    }

    fn read_block(&mut self, address: u16, register: u8, length: usize) -> Result<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        Self::check(&inner, address)?;
        let mut data = inner
            .registers
            .get(&(address, register))
            .cloned()
            .ok_or(Error::Other(format!(
                "no data injected at {:#04x}/{:#04x}",
                address, register
            )))?;
        data.truncate(length);
        Ok(data)
    }

    fn send_byte(&mut self, address: u16, value: u8) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, address)?;
        inner.commands.push((address, value));
        Ok(())
    }
}
