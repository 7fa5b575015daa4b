//! Bottomside - onboard control daemon for a remotely operated vehicle
//!
//! Bridges a remote operator on an MQTT broker to the vehicle's hardware:
//! GPIO pins, the I2C bus and the MAVLink flight controller. Hardware
//! devices are discovered at runtime from inbound operator commands; a
//! fixed-rate control loop merges command and telemetry traffic and
//! republishes only-changed state.

pub mod channel;
pub mod config;
pub mod devices;
pub mod drivers;
pub mod error;
pub mod flight;
pub mod rov;
pub mod sensors;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use rov::{Rov, RunOutcome, Status};
