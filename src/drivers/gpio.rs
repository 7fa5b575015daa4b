//! GPIO pin driver contract and implementations
//!
//! The contract mirrors the daemon's needs: direction control, digital
//! read/write, servo pulse widths and PWM. Errors are returned to the caller
//! (the pin registry), which logs them and carries on.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Electrical direction of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
}

/// Pin driver trait for GPIO access
pub trait PinDriver: Send {
    /// Configure a pin as input or output
    fn set_mode(&mut self, pin: u8, direction: PinDirection) -> Result<()>;

    /// Drive a digital level on an output pin
    fn write(&mut self, pin: u8, level: bool) -> Result<()>;

    /// Read the current level of a pin
    fn read(&mut self, pin: u8) -> Result<u8>;

    /// Command a servo-style pulse width in microseconds
    fn set_servo_pulsewidth(&mut self, pin: u8, width_us: u16) -> Result<()>;

    /// Start PWM at the given frequency (Hz) and duty cycle (0.0 - 1.0)
    fn hardware_pwm(&mut self, pin: u8, frequency: f64, duty: f64) -> Result<()>;
}

/// Standard servo frame period (50 Hz)
const SERVO_PERIOD_US: u64 = 20_000;

/// Raspberry Pi GPIO driver backed by rppal
///
/// Pins are claimed lazily on first use and held for the lifetime of the
/// driver; rppal resets them to their original state on drop.
pub struct RppalGpio {
    gpio: rppal::gpio::Gpio,
    pins: HashMap<u8, rppal::gpio::IoPin>,
}

impl RppalGpio {
    /// Open the GPIO peripheral
    pub fn new() -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new()?;
        log::info!("Opened GPIO peripheral");
        Ok(Self {
            gpio,
            pins: HashMap::new(),
        })
    }

    fn pin_mut(&mut self, pin: u8) -> Result<&mut rppal::gpio::IoPin> {
        if !self.pins.contains_key(&pin) {
            let claimed = self.gpio.get(pin)?.into_io(rppal::gpio::Mode::Input);
            self.pins.insert(pin, claimed);
        }
        // Present after the insert above
        self.pins
            .get_mut(&pin)
            .ok_or(Error::Other(format!("pin {} not claimed", pin)))
    }
}

impl PinDriver for RppalGpio {
    fn set_mode(&mut self, pin: u8, direction: PinDirection) -> Result<()> {
        let io = self.pin_mut(pin)?;
        match direction {
            PinDirection::Input => io.set_mode(rppal::gpio::Mode::Input),
            PinDirection::Output => io.set_mode(rppal::gpio::Mode::Output),
        }
        Ok(())
    }

    fn write(&mut self, pin: u8, level: bool) -> Result<()> {
        let io = self.pin_mut(pin)?;
        if level {
            io.set_high();
        } else {
            io.set_low();
        }
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<u8> {
        let io = self.pin_mut(pin)?;
        Ok(match io.read() {
            rppal::gpio::Level::High => 1,
            rppal::gpio::Level::Low => 0,
        })
    }

    fn set_servo_pulsewidth(&mut self, pin: u8, width_us: u16) -> Result<()> {
        let io = self.pin_mut(pin)?;
        io.set_pwm(
            std::time::Duration::from_micros(SERVO_PERIOD_US),
            std::time::Duration::from_micros(width_us as u64),
        )?;
        Ok(())
    }

    fn hardware_pwm(&mut self, pin: u8, frequency: f64, duty: f64) -> Result<()> {
        let io = self.pin_mut(pin)?;
        io.set_pwm_frequency(frequency, duty.clamp(0.0, 1.0))?;
        Ok(())
    }
}

/// Recorded driver call, for test assertions
#[derive(Debug, Clone, PartialEq)]
pub enum PinCall {
    SetMode(u8, PinDirection),
    Write(u8, bool),
    ServoPulse(u8, u16),
    Pwm(u8, f64, f64),
}

#[derive(Default)]
struct MockGpioInner {
    calls: Vec<PinCall>,
    levels: HashMap<u8, u8>,
    failing: Vec<u8>,
}

/// Mock pin driver for unit testing
///
/// Clones share state, so a test can keep one handle while the registry owns
/// the other.
#[derive(Clone, Default)]
pub struct MockGpio {
    inner: Arc<Mutex<MockGpioInner>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the level read() reports for a pin
    pub fn set_level(&self, pin: u8, level: u8) {
        self.inner.lock().unwrap().levels.insert(pin, level);
    }

    /// Make every operation on a pin fail
    pub fn fail_pin(&self, pin: u8) {
        self.inner.lock().unwrap().failing.push(pin);
    }

    /// Every mutating call so far, in order
    pub fn calls(&self) -> Vec<PinCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Number of write-class calls issued to a pin
    pub fn write_count(&self, pin: u8) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                matches!(c,
                    PinCall::Write(p, _) | PinCall::ServoPulse(p, _) | PinCall::Pwm(p, _, _)
                        if *p == pin)
            })
            .count()
    }

    fn check(inner: &MockGpioInner, pin: u8) -> Result<()> {
        if inner.failing.contains(&pin) {
            Err(Error::Other(format!("mock failure on pin {}", pin)))
        } else {
            Ok(())
        }
    }
}

impl PinDriver for MockGpio {
    fn set_mode(&mut self, pin: u8, direction: PinDirection) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, pin)?;
        inner.calls.push(PinCall::SetMode(pin, direction));
        Ok(())
    }

    fn write(&mut self, pin: u8, level: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, pin)?;
        inner.calls.push(PinCall::Write(pin, level));
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<u8> {
        let inner = self.inner.lock().unwrap();
        Self::check(&inner, pin)?;
        inner
            .levels
            .get(&pin)
            .copied()
            .ok_or(Error::Other(format!("no level injected for pin {}", pin)))
    }

    fn set_servo_pulsewidth(&mut self, pin: u8, width_us: u16) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, pin)?;
        inner.calls.push(PinCall::ServoPulse(pin, width_us));
        Ok(())
    }

    fn hardware_pwm(&mut self, pin: u8, frequency: f64, duty: f64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, pin)?;
        inner.calls.push(PinCall::Pwm(pin, frequency, duty));
        Ok(())
    }
}
