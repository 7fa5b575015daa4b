//! Flight-controller link
//!
//! Wraps a MAVLink connection. A background thread decodes inbound messages
//! and pushes (message name, payload) pairs into a bounded queue; the
//! control loop drains the queue into a last-known-value map each iteration.
//! If the connection cannot be established at startup the link degrades to a
//! passive state where every send and request is a silent no-op, so the rest
//! of the vehicle keeps operating.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use mavlink::common::{MavCmd, MavMessage, MavParamType, COMMAND_LONG_DATA, PARAM_SET_DATA};
use mavlink::{MavConnection, MavHeader, Message};
use num_traits::FromPrimitive;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Decoded inbound message: (message name, JSON payload)
type Decoded = (String, Value);

/// Bounded queue capacity between the receive thread and the control loop.
/// On overflow the oldest entries are discarded: the consumer folds the
/// queue into a last-value map, so the newest message per kind is the one
/// that matters.
const QUEUE_CAPACITY: usize = 512;

/// Source system id this daemon identifies as
const SOURCE_SYSTEM: u8 = 255;

/// Flight-controller link
pub struct FlightLink {
    connection: Option<Arc<dyn MavConnection<MavMessage> + Send + Sync>>,
    rx: Receiver<Decoded>,
    latest: BTreeMap<String, Value>,
    running: Arc<AtomicBool>,
    header: MavHeader,
    target_system: u8,
    target_component: u8,
}

impl FlightLink {
    /// Open the connection and start the receive thread
    ///
    /// `address` follows the mavlink crate's connection strings, e.g.
    /// `serial:/dev/ttyACM0:115200` or `udpin:0.0.0.0:14550`. A failed
    /// connection is logged once and leaves the link in passive no-op mode;
    /// it is not retried.
    pub fn connect(address: &str, target_system: u8, target_component: u8) -> Self {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));

        let connection = match mavlink::connect::<MavMessage>(address) {
            Ok(conn) => {
                let conn: Arc<dyn MavConnection<MavMessage> + Send + Sync> = Arc::from(conn);
                spawn_receive_thread(Arc::clone(&conn), tx, rx.clone(), Arc::clone(&running));
                log::info!("Flight link connected on {}", address);
                Some(conn)
            }
            Err(e) => {
                log::warn!(
                    "Flight link unavailable on {}: {}; continuing without flight controller",
                    address,
                    e
                );
                None
            }
        };

        Self {
            connection,
            rx,
            latest: BTreeMap::new(),
            running,
            header: MavHeader {
                system_id: SOURCE_SYSTEM,
                component_id: 0,
                sequence: 0,
            },
            target_system,
            target_component,
        }
    }

    /// Whether the startup connection succeeded
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Fold everything received since the last call into the last-value map
    /// and return it; later arrivals of a kind overwrite earlier ones
    pub fn get_data(&mut self) -> &BTreeMap<String, Value> {
        while let Ok((kind, payload)) = self.rx.try_recv() {
            self.latest.insert(kind, payload);
        }
        &self.latest
    }

    /// Ask the autopilot to stream a message at the given interval
    pub fn request_stream(&self, message_id: u32, interval_us: u32) {
        self.send_command_long(
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            &[message_id as f32, interval_us as f32],
        );
    }

    /// Send a generic COMMAND_LONG by numeric command id with up to seven
    /// parameters; unknown ids are logged and dropped
    pub fn send_command(&self, command_id: u16, params: &[f32]) {
        match MavCmd::from_u16(command_id) {
            Some(command) => self.send_command_long(command, params),
            None => log::warn!("unknown MAV_CMD id {}, command dropped", command_id),
        }
    }

    /// Set an autopilot parameter; `type_tag` is the numeric MAV_PARAM_TYPE
    /// (defaults to REAL32 when unknown)
    pub fn set_param(&self, name: &str, value: f32, type_tag: u8) {
        let param_type = MavParamType::from_u8(type_tag)
            .unwrap_or(MavParamType::MAV_PARAM_TYPE_REAL32);
        let mut param_id = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(param_id.len());
        param_id[..len].copy_from_slice(&bytes[..len]);

        self.send(&MavMessage::PARAM_SET(PARAM_SET_DATA {
            param_value: value,
            target_system: self.target_system,
            target_component: self.target_component,
            param_id,
            param_type,
        }));
    }

    /// Signal the receive thread and drop the connection handle
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if self.connection.take().is_some() {
            log::info!("Flight link closed");
        }
    }

    fn send_command_long(&self, command: MavCmd, params: &[f32]) {
        let p = |i: usize| params.get(i).copied().unwrap_or(0.0);
        self.send(&MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: p(0),
            param2: p(1),
            param3: p(2),
            param4: p(3),
            param5: p(4),
            param6: p(5),
            param7: p(6),
            command,
            target_system: self.target_system,
            target_component: self.target_component,
            confirmation: 0,
        }));
    }

    fn send(&self, msg: &MavMessage) {
        let Some(conn) = &self.connection else {
            // Passive mode: sends are silent no-ops
            return;
        };
        if let Err(e) = conn.send(&self.header, msg) {
            log::warn!("flight link send failed: {}", e);
        }
    }
}

fn spawn_receive_thread(
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    tx: Sender<Decoded>,
    overflow: Receiver<Decoded>,
    running: Arc<AtomicBool>,
) {
    let spawned = thread::Builder::new()
        .name("flight-rx".to_string())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                match conn.recv() {
                    Ok((_header, msg)) => {
                        let kind = msg.message_name().to_string();
                        let payload = match serde_json::to_value(&msg) {
                            Ok(value) => value,
                            Err(e) => {
                                log::debug!("flight message {}: {}", kind, e);
                                continue;
                            }
                        };
                        enqueue(&tx, &overflow, (kind, payload));
                    }
                    Err(e) => {
                        log::debug!("flight link receive error: {}", e);
                        thread::sleep(Duration::from_millis(5));
                    }
                }
            }
            log::info!("Flight receive thread stopped");
        });
    if let Err(e) = spawned {
        log::error!("failed to spawn flight receive thread: {}", e);
    }
}

/// Push into the bounded queue, discarding the oldest entries when full
fn enqueue(tx: &Sender<Decoded>, overflow: &Receiver<Decoded>, item: Decoded) {
    let mut item = item;
    loop {
        match tx.try_send(item) {
            Ok(()) => return,
            Err(TrySendError::Full(returned)) => {
                let _ = overflow.try_recv();
                item = returned;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A link in passive mode with a hand-fed queue
    fn test_link() -> (FlightLink, Sender<Decoded>) {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let link = FlightLink {
            connection: None,
            rx,
            latest: BTreeMap::new(),
            running: Arc::new(AtomicBool::new(true)),
            header: MavHeader {
                system_id: SOURCE_SYSTEM,
                component_id: 0,
                sequence: 0,
            },
            target_system: 1,
            target_component: 1,
        };
        (link, tx)
    }

    #[test]
    fn test_get_data_keeps_latest_per_kind() {
        let (mut link, tx) = test_link();
        tx.send(("ATTITUDE".to_string(), json!({"roll": 0.1}))).unwrap();
        tx.send(("ATTITUDE".to_string(), json!({"roll": 0.2}))).unwrap();
        tx.send(("VFR_HUD".to_string(), json!({"alt": -3.0}))).unwrap();

        let data = link.get_data();
        assert_eq!(data.len(), 2);
        assert_eq!(data["ATTITUDE"]["roll"], 0.2);
        assert_eq!(data["VFR_HUD"]["alt"], -3.0);
    }

    #[test]
    fn test_get_data_retains_map_between_calls() {
        let (mut link, tx) = test_link();
        tx.send(("ATTITUDE".to_string(), json!({"roll": 0.1}))).unwrap();
        link.get_data();

        // Nothing new arrived: the last known value is still served
        let data = link.get_data();
        assert_eq!(data["ATTITUDE"]["roll"], 0.1);
    }

    #[test]
    fn test_enqueue_drops_oldest_when_full() {
        let (tx, rx) = bounded::<Decoded>(2);
        enqueue(&tx, &rx, ("A".to_string(), json!(1)));
        enqueue(&tx, &rx, ("B".to_string(), json!(2)));
        enqueue(&tx, &rx, ("C".to_string(), json!(3)));

        let drained: Vec<String> = rx.try_iter().map(|(kind, _)| kind).collect();
        assert_eq!(drained, vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_passive_link_operations_are_noops() {
        let mut link = FlightLink::connect("serial:/dev/nonexistent-port:115200", 1, 1);
        assert!(!link.is_connected());

        // None of these may panic or block
        link.request_stream(30, 10_000);
        link.send_command(400, &[1.0]);
        link.set_param("SURFACE_DEPTH", -10.0, 9);
        assert!(link.get_data().is_empty());
        link.shutdown();
    }
}
