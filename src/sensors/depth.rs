//! MS5837-02BA depth/pressure sensor
//!
//! Talks to the sensor through the [`BusDriver`] contract: reset, read the
//! factory calibration PROM once at construction, then run one
//! pressure/temperature conversion pair per reading. First-order
//! compensation only; the second-order low-temperature terms are well below
//! what vehicle control needs.

use crate::drivers::BusDriver;
use crate::error::{Error, Result};
use crate::sensors::Sensor;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

/// Fixed I2C address of the MS5837
const ADDRESS: u16 = 0x76;

const CMD_RESET: u8 = 0x1E;
/// PROM words live at 0xA0, 0xA2 .. 0xAC
const CMD_PROM_READ: u8 = 0xA0;
/// Convert D1 (pressure), OSR 256
const CMD_CONVERT_D1: u8 = 0x40;
/// Convert D2 (temperature), OSR 256
const CMD_CONVERT_D2: u8 = 0x50;
const CMD_ADC_READ: u8 = 0x00;

/// Conversion time at OSR 256 is 0.56 ms; leave margin
const CONVERSION_DELAY: Duration = Duration::from_millis(1);

/// Standard atmospheric pressure in Pa
const SURFACE_PRESSURE_PA: f64 = 101_325.0;
const GRAVITY: f64 = 9.80665;

pub struct DepthSensor {
    bus: Box<dyn BusDriver>,
    /// Factory calibration words C1..C6 (index 0 is the CRC word)
    calibration: [u16; 7],
    /// Fluid density in kg/m^3 (997 fresh water, 1029 sea water)
    fluid_density: f64,
}

impl DepthSensor {
    pub fn new(mut bus: Box<dyn BusDriver>, fluid_density: f64) -> Result<Self> {
        bus.send_byte(ADDRESS, CMD_RESET)?;
        thread::sleep(Duration::from_millis(10));

        let mut calibration = [0u16; 7];
        for (i, word) in calibration.iter_mut().enumerate() {
            let bytes = bus.read_block(ADDRESS, CMD_PROM_READ + 2 * i as u8, 2)?;
            if bytes.len() < 2 {
                return Err(Error::Other(format!(
                    "depth sensor PROM word {} truncated",
                    i
                )));
            }
            *word = u16::from_be_bytes([bytes[0], bytes[1]]);
        }

        Ok(Self {
            bus,
            calibration,
            fluid_density,
        })
    }

    fn read_adc(&mut self, convert_cmd: u8) -> Result<u32> {
        self.bus.send_byte(ADDRESS, convert_cmd)?;
        thread::sleep(CONVERSION_DELAY);
        let bytes = self.bus.read_block(ADDRESS, CMD_ADC_READ, 3)?;
        if bytes.len() < 3 {
            return Err(Error::Other("depth sensor ADC read truncated".to_string()));
        }
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    /// First-order conversion per the MS5837-02BA datasheet.
    /// Returns (pressure in mbar, temperature in degrees C).
    fn convert(&self, d1: u32, d2: u32) -> (f64, f64) {
        let c = |i: usize| self.calibration[i] as i64;
        let d1 = d1 as i64;
        let d2 = d2 as i64;

        let dt = d2 - c(5) * (1 << 8);
        let temp = 2000 + (dt * c(6)) / (1 << 23);
        let off = c(2) * (1 << 17) + (c(4) * dt) / (1 << 6);
        let sens = c(1) * (1 << 16) + (c(3) * dt) / (1 << 7);
        // P comes out in hundredths of a mbar
        let p = ((d1 * sens) / (1 << 21) - off) / (1 << 15);

        (p as f64 / 100.0, temp as f64 / 100.0)
    }
}

impl Sensor for DepthSensor {
    fn name(&self) -> &str {
        "depth_sensor"
    }

    fn read(&mut self) -> Result<BTreeMap<String, f64>> {
        let d1 = self.read_adc(CMD_CONVERT_D1)?;
        let d2 = self.read_adc(CMD_CONVERT_D2)?;
        let (pressure_mbar, temperature_c) = self.convert(d1, d2);
        let depth_m =
            (pressure_mbar * 100.0 - SURFACE_PRESSURE_PA) / (self.fluid_density * GRAVITY);

        Ok(BTreeMap::from([
            ("depth".to_string(), depth_m),
            ("pressure_mbar".to_string(), pressure_mbar),
            ("temperature_C".to_string(), temperature_c),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MockBus;

    fn prom_bus() -> MockBus {
        let bus = MockBus::new();
        // Plausible 02BA calibration constants
        let words: [u16; 7] = [0, 34_982, 36_352, 20_926, 22_354, 26_646, 26_146];
        for (i, word) in words.iter().enumerate() {
            bus.set_register(ADDRESS, CMD_PROM_READ + 2 * i as u8, &word.to_be_bytes());
        }
        bus
    }

    #[test]
    fn test_construction_reads_calibration() {
        let bus = prom_bus();
        let sensor = DepthSensor::new(Box::new(bus.clone()), 997.0).unwrap();
        assert_eq!(sensor.calibration[1], 34_982);
        assert_eq!(sensor.calibration[6], 26_146);
        // Reset command went out first
        assert_eq!(bus.commands().first(), Some(&(ADDRESS, CMD_RESET)));
    }

    #[test]
    fn test_nominal_temperature_at_reference_d2() {
        let bus = prom_bus();
        let sensor = DepthSensor::new(Box::new(bus), 997.0).unwrap();
        // D2 equal to C5 * 2^8 means dT = 0, so TEMP is exactly 20.00 C
        let d2 = (sensor.calibration[5] as u32) << 8;
        let (_, temperature) = sensor.convert(6_000_000, d2);
        assert_eq!(temperature, 20.0);
    }

    #[test]
    fn test_failed_read_propagates() {
        let bus = prom_bus();
        let mut sensor = DepthSensor::new(Box::new(bus.clone()), 997.0).unwrap();
        bus.fail_address(ADDRESS);
        assert!(sensor.read().is_err());
    }
}
