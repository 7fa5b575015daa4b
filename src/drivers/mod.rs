//! Hardware collaborator contracts
//!
//! Each piece of hardware the registries talk to sits behind a narrow trait
//! with one real implementation and one mock for hardware-free testing.

pub mod gpio;
pub mod i2c;

pub use gpio::{MockGpio, PinCall, PinDirection, PinDriver, RppalGpio};
pub use i2c::{BusDriver, MockBus, RppalBus};

use crate::config::HardwareConfig;
use crate::error::{Error, Result};

/// Create a pin driver based on configuration
pub fn create_pin_driver(config: &HardwareConfig) -> Result<Box<dyn PinDriver>> {
    match config.driver.as_str() {
        "mock" => Ok(Box::new(MockGpio::new())),
        "rppal" => Ok(Box::new(RppalGpio::new()?)),
        other => Err(Error::Other(format!("unknown hardware driver: {}", other))),
    }
}

/// Create a bus driver based on configuration
pub fn create_bus_driver(config: &HardwareConfig) -> Result<Box<dyn BusDriver>> {
    match config.driver.as_str() {
        "mock" => Ok(Box::new(MockBus::new())),
        "rppal" => Ok(Box::new(RppalBus::open(config.i2c_bus)?)),
        other => Err(Error::Other(format!("unknown hardware driver: {}", other))),
    }
}
