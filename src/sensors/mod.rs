//! Custom onboard sensors
//!
//! Sensors outside the operator-driven registries (e.g. the depth sensor)
//! implement [`Sensor`] and are polled once per control-loop iteration. A
//! failed read is logged and the sensor is simply absent from that
//! iteration's snapshot.

pub mod depth;

pub use depth::DepthSensor;

use crate::error::Result;
use std::collections::BTreeMap;

/// A sensor producing a map of named readings
pub trait Sensor: Send {
    fn name(&self) -> &str;

    /// Take one reading
    fn read(&mut self) -> Result<BTreeMap<String, f64>>;
}

/// Aggregates every attached sensor into one snapshot
#[derive(Default)]
pub struct SensorHub {
    sensors: Vec<Box<dyn Sensor>>,
}

impl SensorHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, sensor: Box<dyn Sensor>) {
        log::info!("Attached sensor: {}", sensor.name());
        self.sensors.push(sensor);
    }

    /// Read every sensor, omitting those that fail this iteration
    pub fn get_data(&mut self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut data = BTreeMap::new();
        for sensor in &mut self.sensors {
            match sensor.read() {
                Ok(readings) => {
                    data.insert(sensor.name().to_string(), readings);
                }
                Err(e) => {
                    log::warn!("sensor {}: read failed: {}", sensor.name(), e);
                }
            }
        }
        data
    }
}
