//! Configuration for the bottomside daemon
//!
//! Loads configuration from a TOML file. Every section has defaults suitable
//! for bench testing with mock hardware, so the daemon starts without a
//! config file at all.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub rov: RovConfig,
    pub mqtt: MqttConfig,
    pub hardware: HardwareConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

/// Vehicle identity
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RovConfig {
    /// Vehicle name, also the outbound topic prefix (`<name>/GPIO/...`)
    pub name: String,
    /// Sender id of the remote operator; inbound topics from any other
    /// sender are ignored
    pub operator: String,
}

/// MQTT broker session
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

/// Hardware bindings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Driver backend: "rppal" for real Raspberry Pi GPIO/I2C, "mock" for
    /// hardware-free operation
    pub driver: String,
    /// I2C bus number (1 on all recent Raspberry Pi models)
    pub i2c_bus: u8,
    /// Flight-controller connection string, e.g. "serial:/dev/ttyACM0:115200"
    /// or "udpin:0.0.0.0:14550"
    pub flight_address: String,
    /// MAVLink target system id
    pub target_system: u8,
    /// MAVLink target component id
    pub target_component: u8,
    /// Attach the MS5837 depth sensor on the I2C bus
    pub depth_sensor: bool,
}

/// Control-loop scheduling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Loop iterations per second
    pub loop_rate_hz: u32,
    /// Restart the control loop after an unrecoverable error instead of
    /// exiting
    pub restart_on_error: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for RovConfig {
    fn default() -> Self {
        Self {
            name: "ROV".to_string(),
            operator: "PC".to_string(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "ROV".to_string(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            driver: "mock".to_string(),
            i2c_bus: 1,
            flight_address: "serial:/dev/ttyACM0:115200".to_string(),
            target_system: 1,
            target_component: 1,
            depth_sensor: false,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            loop_rate_hz: 60,
            restart_on_error: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Control-loop frame period derived from the configured rate
    pub fn frame_period(&self) -> std::time::Duration {
        let rate = self.control.loop_rate_hz.max(1);
        std::time::Duration::from_secs_f64(1.0 / rate as f64)
    }
}
