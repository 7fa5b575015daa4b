//! GPIO pin registry
//!
//! Maps device names to pin configurations. A configuration becomes active
//! once both its pin number and mode are known; every later field change
//! re-applies it. Driver errors are logged with device context and never
//! propagate past the registry.

use crate::drivers::{PinDirection, PinDriver};
use std::collections::BTreeMap;

/// Operating mode of a pin device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PinMode {
    WriteDigital,
    PwmMicroseconds,
    PwmPercent,
    ReadDigital,
    ReadAnalog,
}

impl PinMode {
    /// Parse the wire token for a mode
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "write-digital" => Some(Self::WriteDigital),
            "pwm-microseconds" => Some(Self::PwmMicroseconds),
            "pwm-percent" => Some(Self::PwmPercent),
            "read-digital" => Some(Self::ReadDigital),
            "read-analog" => Some(Self::ReadAnalog),
            _ => None,
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, Self::ReadDigital | Self::ReadAnalog)
    }
}

/// A single field update for a named pin device
#[derive(Debug, Clone, PartialEq)]
pub enum PinUpdate {
    Id(u8),
    Mode(PinMode),
    Value(f64),
    Frequency(f64),
}

/// Configuration last written to the hardware
#[derive(Debug, Clone, Copy, PartialEq)]
struct Applied {
    pin: u8,
    mode: PinMode,
    value: f64,
    frequency: f64,
}

/// One named pin device
#[derive(Debug, Clone)]
pub struct PinDevice {
    pub pin: Option<u8>,
    pub mode: Option<PinMode>,
    pub value: f64,
    pub frequency: f64,
    applied: Option<Applied>,
}

impl Default for PinDevice {
    fn default() -> Self {
        Self {
            pin: None,
            mode: None,
            value: 0.0,
            frequency: 50.0,
            applied: None,
        }
    }
}

/// Registry of named pin devices
pub struct PinRegistry {
    driver: Box<dyn PinDriver>,
    devices: BTreeMap<String, PinDevice>,
}

impl PinRegistry {
    pub fn new(driver: Box<dyn PinDriver>) -> Self {
        Self {
            driver,
            devices: BTreeMap::new(),
        }
    }

    /// Fetch a device record, creating a default-initialised one if absent
    pub fn upsert(&mut self, name: &str) -> &mut PinDevice {
        self.devices.entry(name.to_string()).or_default()
    }

    /// Look up a device without creating it
    pub fn get(&self, name: &str) -> Option<&PinDevice> {
        self.devices.get(name)
    }

    /// Apply a field update to a named device, issuing the hardware write
    /// when the effective configuration changed
    pub fn apply(&mut self, name: &str, update: PinUpdate) {
        let device = self.devices.entry(name.to_string()).or_default();
        match update {
            PinUpdate::Id(pin) => device.pin = Some(pin),
            PinUpdate::Mode(mode) => device.mode = Some(mode),
            PinUpdate::Value(value) => device.value = value,
            PinUpdate::Frequency(frequency) => device.frequency = frequency,
        }
        Self::refresh(&mut *self.driver, name, device);
    }

    /// Read back every device with a readable value
    ///
    /// Input-mode devices are read from the hardware; output-mode devices
    /// report their currently applied value (the level the pin is driving).
    /// Devices that are not yet configured, or whose read fails, are omitted.
    pub fn read_all(&mut self) -> BTreeMap<String, i64> {
        let mut values = BTreeMap::new();
        for (name, device) in &self.devices {
            let (Some(pin), Some(mode)) = (device.pin, device.mode) else {
                continue;
            };
            if mode.is_input() {
                match self.driver.read(pin) {
                    Ok(level) => {
                        values.insert(name.clone(), level as i64);
                    }
                    Err(e) => {
                        log::warn!("pin device {} (pin {}): read failed: {}", name, pin, e);
                    }
                }
            } else if device.applied.is_some() {
                values.insert(name.clone(), device.value as i64);
            }
        }
        values
    }

    /// Force every output device to its off state
    pub fn zero_outputs(&mut self) {
        for (name, device) in &mut self.devices {
            if device.mode.map(|m| !m.is_input()).unwrap_or(false) {
                device.value = 0.0;
                Self::refresh(&mut *self.driver, name, device);
            }
        }
    }

    /// Zero all outputs and release the driver; called once at teardown
    pub fn shutdown(&mut self) {
        self.zero_outputs();
        log::info!("Pin registry shut down ({} devices)", self.devices.len());
    }

    /// Issue the hardware write for a device if it is fully configured and
    /// its configuration changed since the last applied one
    fn refresh(driver: &mut dyn PinDriver, name: &str, device: &mut PinDevice) {
        let (Some(pin), Some(mode)) = (device.pin, device.mode) else {
            return;
        };
        let next = Applied {
            pin,
            mode,
            value: device.value,
            frequency: device.frequency,
        };
        if device.applied == Some(next) {
            return;
        }

        let result = match mode {
            PinMode::WriteDigital => driver
                .set_mode(pin, PinDirection::Output)
                .and_then(|_| driver.write(pin, device.value != 0.0)),
            PinMode::PwmMicroseconds => driver.set_servo_pulsewidth(pin, device.value as u16),
            PinMode::PwmPercent => driver.hardware_pwm(pin, device.frequency, device.value),
            PinMode::ReadDigital | PinMode::ReadAnalog => {
                driver.set_mode(pin, PinDirection::Input)
            }
        };

        match result {
            Ok(()) => device.applied = Some(next),
            Err(e) => {
                log::warn!(
                    "pin device {} (pin {}, mode {:?}): write failed: {}",
                    name,
                    pin,
                    mode,
                    e
                );
            }
        }
    }
}
