//! I2C object registry
//!
//! Maps object names to a bus address plus three register tables: one-shot
//! writes (sent once, then discarded), polled writes (re-sent every
//! iteration) and read specs (register + byte count, read every iteration).
//! A failed transfer is logged and yields no data for that register this
//! tick; it never aborts the tick for other registers or objects.

use crate::drivers::BusDriver;
use std::collections::BTreeMap;

/// A single update for a named bus object
#[derive(Debug, Clone, PartialEq)]
pub enum BusUpdate {
    Address(u16),
    /// Register -> byte, written once then discarded
    WriteOnce(BTreeMap<u8, u8>),
    /// Register -> byte, re-written every tick until replaced
    WritePoll(BTreeMap<u8, u8>),
    /// Register name -> (register address, byte count)
    ReadSpec(BTreeMap<String, (u8, usize)>),
}

/// One named bus object
#[derive(Debug, Clone, Default)]
pub struct BusObject {
    pub address: Option<u16>,
    pub write_once: BTreeMap<u8, u8>,
    pub write_poll: BTreeMap<u8, u8>,
    pub read_spec: BTreeMap<String, (u8, usize)>,
}

/// Per-tick read snapshot: object -> register name -> byte index -> value
pub type BusSnapshot = BTreeMap<String, BTreeMap<String, BTreeMap<usize, u8>>>;

/// Registry of named bus objects
pub struct BusRegistry {
    driver: Box<dyn BusDriver>,
    objects: BTreeMap<String, BusObject>,
}

impl BusRegistry {
    pub fn new(driver: Box<dyn BusDriver>) -> Self {
        Self {
            driver,
            objects: BTreeMap::new(),
        }
    }

    /// Fetch an object record, creating a default-initialised one if absent
    pub fn upsert(&mut self, name: &str) -> &mut BusObject {
        self.objects.entry(name.to_string()).or_default()
    }

    /// Look up an object without creating it
    pub fn get(&self, name: &str) -> Option<&BusObject> {
        self.objects.get(name)
    }

    /// Apply an update to a named object
    pub fn apply(&mut self, name: &str, update: BusUpdate) {
        let object = self.objects.entry(name.to_string()).or_default();
        match update {
            BusUpdate::Address(address) => object.address = Some(address),
            BusUpdate::WriteOnce(writes) => object.write_once.extend(writes),
            BusUpdate::WritePoll(writes) => object.write_poll = writes,
            BusUpdate::ReadSpec(spec) => object.read_spec = spec,
        }
    }

    /// Run one bus iteration: fire pending one-shot writes, re-send polled
    /// writes, then read every spec entry into the snapshot
    pub fn tick(&mut self) -> BusSnapshot {
        let mut snapshot = BusSnapshot::new();
        for (name, object) in &mut self.objects {
            let Some(address) = object.address else {
                continue;
            };

            // One-shot writes are consumed whether or not they succeed
            for (register, value) in std::mem::take(&mut object.write_once) {
                if let Err(e) = self.driver.write_byte(address, register, value) {
                    log::warn!(
                        "bus object {} ({:#04x}): one-shot write to {:#04x} failed: {}",
                        name,
                        address,
                        register,
                        e
                    );
                }
            }

            for (&register, &value) in &object.write_poll {
                if let Err(e) = self.driver.write_byte(address, register, value) {
                    log::warn!(
                        "bus object {} ({:#04x}): poll write to {:#04x} failed: {}",
                        name,
                        address,
                        register,
                        e
                    );
                }
            }

            let mut reads = BTreeMap::new();
            for (reg_name, &(register, count)) in &object.read_spec {
                match self.driver.read_block(address, register, count) {
                    Ok(bytes) => {
                        let indexed: BTreeMap<usize, u8> =
                            bytes.into_iter().enumerate().collect();
                        reads.insert(reg_name.clone(), indexed);
                    }
                    Err(e) => {
                        log::warn!(
                            "bus object {} ({:#04x}): read of {} ({:#04x}, {} bytes) failed: {}",
                            name,
                            address,
                            reg_name,
                            register,
                            count,
                            e
                        );
                    }
                }
            }
            snapshot.insert(name.clone(), reads);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MockBus;

    fn registry() -> (BusRegistry, MockBus) {
        let bus = MockBus::new();
        (BusRegistry::new(Box::new(bus.clone())), bus)
    }

    #[test]
    fn test_upsert_creates_default_record() {
        let (mut reg, _bus) = registry();
        let object = reg.upsert("imu");
        assert_eq!(object.address, None);
        assert!(object.write_once.is_empty());
        assert!(reg.get("imu").is_some());
    }

    #[test]
    fn test_one_shot_write_fires_exactly_once() {
        let (mut reg, bus) = registry();
        reg.apply("imu", BusUpdate::Address(0x68));
        reg.apply("imu", BusUpdate::WriteOnce(BTreeMap::from([(0x6B, 0x00)])));

        reg.tick();
        reg.tick();
        assert_eq!(bus.writes(), vec![(0x68, 0x6B, 0x00)]);
    }

    #[test]
    fn test_poll_write_fires_every_tick() {
        let (mut reg, bus) = registry();
        reg.apply("imu", BusUpdate::Address(0x68));
        reg.apply("imu", BusUpdate::WritePoll(BTreeMap::from([(0x3B, 0x01)])));

        reg.tick();
        reg.tick();
        assert_eq!(bus.writes().len(), 2);
    }

    #[test]
    fn test_read_snapshot_indexes_bytes() {
        let (mut reg, bus) = registry();
        reg.apply("imu", BusUpdate::Address(0x68));
        reg.apply(
            "imu",
            BusUpdate::ReadSpec(BTreeMap::from([("accel".to_string(), (0x3B, 3))])),
        );
        bus.set_register(0x68, 0x3B, &[10, 20, 30]);

        let snapshot = reg.tick();
        let accel = &snapshot["imu"]["accel"];
        assert_eq!(accel.get(&0), Some(&10));
        assert_eq!(accel.get(&1), Some(&20));
        assert_eq!(accel.get(&2), Some(&30));
    }

    #[test]
    fn test_no_traffic_without_address() {
        let (mut reg, bus) = registry();
        reg.apply("imu", BusUpdate::WriteOnce(BTreeMap::from([(0x6B, 0x00)])));

        let snapshot = reg.tick();
        assert!(bus.writes().is_empty());
        assert!(!snapshot.contains_key("imu"));
        // The one-shot stays pending until an address arrives
        reg.apply("imu", BusUpdate::Address(0x68));
        reg.tick();
        assert_eq!(bus.writes(), vec![(0x68, 0x6B, 0x00)]);
    }

    #[test]
    fn test_failure_does_not_abort_tick_for_other_objects() {
        let (mut reg, bus) = registry();
        reg.apply("bad", BusUpdate::Address(0x10));
        reg.apply(
            "bad",
            BusUpdate::ReadSpec(BTreeMap::from([("status".to_string(), (0x00, 1))])),
        );
        reg.apply("good", BusUpdate::Address(0x68));
        reg.apply(
            "good",
            BusUpdate::ReadSpec(BTreeMap::from([("status".to_string(), (0x00, 1))])),
        );
        bus.fail_address(0x10);
        bus.set_register(0x68, 0x00, &[7]);

        let snapshot = reg.tick();
        assert!(snapshot["bad"].is_empty());
        assert_eq!(snapshot["good"]["status"].get(&0), Some(&7));
    }

    #[test]
    fn test_poll_table_replaced_not_merged() {
        let (mut reg, bus) = registry();
        reg.apply("esc", BusUpdate::Address(0x40));
        reg.apply("esc", BusUpdate::WritePoll(BTreeMap::from([(0x01, 0xFF)])));
        reg.tick();
        reg.apply("esc", BusUpdate::WritePoll(BTreeMap::from([(0x02, 0x80)])));
        reg.tick();

        assert_eq!(bus.writes(), vec![(0x40, 0x01, 0xFF), (0x40, 0x02, 0x80)]);
    }
}
