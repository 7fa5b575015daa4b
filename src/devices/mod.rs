//! Runtime device registries
//!
//! Devices are discovered at runtime from inbound operator commands: the
//! first reference to a name creates a default-initialised record, later
//! commands fill in its fields. The registries are owned and mutated only by
//! the control loop.

pub mod bus;
pub mod pins;

pub use bus::{BusObject, BusRegistry, BusSnapshot, BusUpdate};
pub use pins::{PinDevice, PinMode, PinRegistry, PinUpdate};
