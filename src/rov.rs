//! Vehicle orchestration and the fixed-rate control loop
//!
//! Owns every subsystem and is the sole mutator of the registries. Each
//! iteration drains the command channel, dispatches decoded commands, reads
//! back hardware and telemetry state, publishes the changed parts of the
//! snapshot and sleeps whatever is left of the frame budget.

use crate::channel::{Command, CommandChannel, FlightCommand, MqttTransport, ParseError, PubSub};
use crate::config::Config;
use crate::devices::{BusRegistry, PinRegistry};
use crate::drivers::{create_bus_driver, create_pin_driver};
use crate::error::Result;
use crate::flight::FlightLink;
use crate::sensors::{DepthSensor, SensorHub};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Density of sea water, for the depth sensor (kg/m^3)
const SEA_WATER_DENSITY: f64 = 1029.0;

/// Vehicle lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Booting,
    Running,
    Stopped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Booting => "booting",
            Status::Running => "running",
            Status::Stopped => "stopped",
        }
    }
}

/// Why the control loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Tear everything down and exit the process
    Shutdown,
    /// Tear everything down and build a fresh instance
    Restart,
}

/// The vehicle: all subsystems plus the control loop driving them
pub struct Rov {
    channel: CommandChannel,
    pins: PinRegistry,
    bus: BusRegistry,
    flight: FlightLink,
    sensors: SensorHub,
    status: Status,
    frame: Duration,
    /// Sender id of the remote operator
    operator: String,
    /// Outbound topic prefix (the vehicle name)
    prefix: String,
}

impl Rov {
    /// Build every subsystem from configuration and connect to the broker
    pub fn new(config: &Config) -> Result<Self> {
        let transport = Arc::new(MqttTransport::new(&config.mqtt));
        Self::with_transport(config, transport)
    }

    /// Build with a caller-supplied pub/sub transport
    pub fn with_transport(config: &Config, transport: Arc<dyn PubSub>) -> Result<Self> {
        let channel = CommandChannel::connect(transport, &config.rov.operator)?;
        let pins = PinRegistry::new(create_pin_driver(&config.hardware)?);
        let bus = BusRegistry::new(create_bus_driver(&config.hardware)?);
        let flight = FlightLink::connect(
            &config.hardware.flight_address,
            config.hardware.target_system,
            config.hardware.target_component,
        );

        let mut sensors = SensorHub::new();
        if config.hardware.depth_sensor {
            // The sensor gets its own bus handle; register traffic and
            // sensor conversions do not interleave mid-transaction
            match create_bus_driver(&config.hardware)
                .and_then(|bus| DepthSensor::new(bus, SEA_WATER_DENSITY))
            {
                Ok(sensor) => sensors.attach(Box::new(sensor)),
                Err(e) => log::warn!("depth sensor unavailable: {}", e),
            }
        }

        log::info!(
            "{} initialised (loop at {} Hz, flight link {})",
            config.rov.name,
            config.control.loop_rate_hz,
            if flight.is_connected() { "up" } else { "down" }
        );

        Ok(Self {
            channel,
            pins,
            bus,
            flight,
            sensors,
            status: Status::Booting,
            frame: config.frame_period(),
            operator: config.rov.operator.clone(),
            prefix: config.rov.name.clone(),
        })
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Run the control loop until a lifecycle command or the external run
    /// flag stops it; subsystems are torn down before returning
    pub fn run(&mut self, running: &AtomicBool) -> RunOutcome {
        if self.status == Status::Booting {
            self.status = Status::Running;
        }
        log::info!("Control loop started ({:?} frame budget)", self.frame);

        loop {
            if !running.load(Ordering::Relaxed) {
                log::info!("Run flag cleared, shutting down");
                self.shutdown();
                return RunOutcome::Shutdown;
            }

            let start = Instant::now();
            if let Some(outcome) = self.iterate() {
                self.shutdown();
                return outcome;
            }

            let elapsed = start.elapsed();
            let budget = remaining_budget(self.frame, elapsed);
            if budget.is_zero() {
                // Over budget: no catch-up, the next frame starts right away
                log::debug!("frame overrun: {:?} (budget {:?})", elapsed, self.frame);
            } else {
                std::thread::sleep(budget);
            }
        }
    }

    /// One control-loop iteration: drain, dispatch, gather, publish.
    /// Returns the outcome that should end the loop, if any.
    pub fn iterate(&mut self) -> Option<RunOutcome> {
        let operator = self.operator.clone();
        let changes = self.channel.drain_changes();
        for (topic, payload) in changes {
            match Command::parse(&topic, &payload, &operator) {
                Ok(command) => {
                    if let Some(outcome) = self.dispatch(command) {
                        return Some(outcome);
                    }
                }
                Err(ParseError::ForeignSender(sender)) => {
                    log::trace!("ignoring message from {} on {}", sender, topic);
                }
                Err(e) => log::warn!("unroutable message on {}: {}", topic, e),
            }
        }

        self.publish_snapshot();
        None
    }

    fn dispatch(&mut self, command: Command) -> Option<RunOutcome> {
        match command {
            Command::Shutdown => {
                log::info!("Shutdown commanded");
                return Some(RunOutcome::Shutdown);
            }
            Command::Restart => {
                log::info!("Restart commanded");
                return Some(RunOutcome::Restart);
            }
            Command::Stop => {
                log::info!("Stop commanded: zeroing outputs");
                self.status = Status::Stopped;
                self.pins.zero_outputs();
            }
            Command::Start => {
                if self.status == Status::Stopped {
                    log::info!("Start commanded: resuming");
                    self.status = Status::Running;
                }
            }
            // Telemetry-rate configuration actuates nothing, so it stays
            // available while stopped
            Command::Flight(FlightCommand::RequestStream {
                message_id,
                interval_us,
            }) => self.flight.request_stream(message_id, interval_us),
            actuation if self.status == Status::Stopped => {
                log::debug!("actuation command dropped while stopped: {:?}", actuation);
            }
            Command::Pin { device, update } => self.pins.apply(&device, update),
            Command::Bus { device, update } => self.bus.apply(&device, update),
            Command::Flight(FlightCommand::SendCommand { command_id, params }) => {
                self.flight.send_command(command_id, &params)
            }
            Command::Flight(FlightCommand::SetParam {
                name,
                value,
                param_type,
            }) => self.flight.set_param(&name, value, param_type),
        }
        None
    }

    /// Gather every subsystem's state and publish the changed leaves
    fn publish_snapshot(&mut self) {
        let pin_data = self.pins.read_all();
        for (name, value) in pin_data {
            let topic = format!("{}/GPIO/{}", self.prefix, name);
            self.channel.publish_if_changed(&topic, &value.to_string());
        }

        let bus_data = self.bus.tick();
        for (object, registers) in bus_data {
            for (register, bytes) in registers {
                let topic = format!("{}/I2C/{}/{}", self.prefix, object, register);
                match serde_json::to_string(&bytes) {
                    Ok(payload) => self.channel.publish_if_changed(&topic, &payload),
                    Err(e) => log::warn!("I2C snapshot for {} not serializable: {}", topic, e),
                }
            }
        }

        let other = serde_json::json!({
            "mavlink": self.flight.get_data(),
            "sensors": self.sensors.get_data(),
        });
        let other_topic = format!("{}/other", self.prefix);
        self.channel
            .publish_if_changed(&other_topic, &other.to_string());

        let status_topic = format!("{}/status", self.prefix);
        self.channel
            .publish_if_changed(&status_topic, self.status.as_str());
    }

    /// Tear down every subsystem: pins zeroed, links and sessions closed
    pub fn shutdown(&mut self) {
        log::info!("Shutting down subsystems");
        self.pins.shutdown();
        self.flight.shutdown();
        if let Err(e) = self.channel.disconnect() {
            log::warn!("disconnect failed: {}", e);
        }
        self.status = Status::Stopped;
    }
}

/// Time left in the frame after `elapsed` of work; zero once over budget
fn remaining_budget(frame: Duration, elapsed: Duration) -> Duration {
    frame.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockPubSub;

    /// A vehicle on mock drivers and a mock broker. The flight address is
    /// deliberately unreachable, so the link runs in passive mode.
    fn rov() -> (Rov, MockPubSub) {
        let mut config = Config::default();
        config.hardware.flight_address = "serial:/dev/nonexistent-port:115200".to_string();
        let transport = MockPubSub::new();
        let rov = Rov::with_transport(&config, Arc::new(transport.clone())).expect("mock rov");
        (rov, transport)
    }

    /// Walk the booting -> running transition the way run() does, without
    /// entering the timed loop
    fn start(rov: &mut Rov) {
        if rov.status == Status::Booting {
            rov.status = Status::Running;
        }
    }

    #[test]
    fn test_led_scenario_published_exactly_once() {
        let (mut rov, transport) = rov();
        start(&mut rov);

        // Configuration arrives spread across three iterations
        transport.inject("PC/pins/LED/id", "17");
        assert_eq!(rov.iterate(), None);
        transport.inject("PC/pins/LED/mode", "write-digital");
        assert_eq!(rov.iterate(), None);
        transport.inject("PC/pins/LED/val", "1");
        assert_eq!(rov.iterate(), None);

        assert_eq!(transport.last_published("ROV/GPIO/LED"), Some("1".to_string()));
        // Unchanged reads are not republished
        rov.iterate();
        rov.iterate();
        let ones = transport
            .published()
            .iter()
            .filter(|(topic, payload)| topic == "ROV/GPIO/LED" && payload == "1")
            .count();
        assert_eq!(ones, 1);
    }

    #[test]
    fn test_stop_zeroes_outputs_and_gates_commands() {
        let (mut rov, transport) = rov();
        start(&mut rov);

        transport.inject("PC/pins/LED/id", "17");
        transport.inject("PC/pins/LED/mode", "write-digital");
        transport.inject("PC/pins/LED/val", "1");
        rov.iterate();

        transport.inject("PC/commands/stop", "");
        rov.iterate();
        assert_eq!(rov.status(), Status::Stopped);
        assert_eq!(transport.last_published("ROV/GPIO/LED"), Some("0".to_string()));
        assert_eq!(transport.last_published("ROV/status"), Some("stopped".to_string()));

        // Actuation is ignored until an unblocking command
        transport.inject("PC/pins/LED/val", "1");
        rov.iterate();
        assert_eq!(transport.last_published("ROV/GPIO/LED"), Some("0".to_string()));

        transport.inject("PC/commands/start", "");
        rov.iterate();
        assert_eq!(rov.status(), Status::Running);
        transport.inject("PC/pins/LED/val", "1");
        rov.iterate();
        assert_eq!(transport.last_published("ROV/GPIO/LED"), Some("1".to_string()));
    }

    #[test]
    fn test_lifecycle_commands_end_the_loop() {
        let (mut rov, transport) = rov();
        start(&mut rov);

        transport.inject("PC/commands/restart", "");
        assert_eq!(rov.iterate(), Some(RunOutcome::Restart));

        let (mut rov, transport) = self::rov();
        start(&mut rov);
        transport.inject("PC/commands/shutdown", "");
        assert_eq!(rov.iterate(), Some(RunOutcome::Shutdown));
    }

    #[test]
    fn test_foreign_and_malformed_topics_are_nonfatal() {
        let (mut rov, transport) = rov();
        start(&mut rov);

        transport.inject("intruder/commands/shutdown", "");
        transport.inject("PC/video/quality", "high");
        transport.inject("PC/pins/LED/mode", "sideways");
        assert_eq!(rov.iterate(), None);
        assert_eq!(rov.status(), Status::Running);
    }

    #[test]
    fn test_status_topic_tracks_state() {
        let (mut rov, transport) = rov();
        start(&mut rov);

        rov.iterate();
        assert_eq!(transport.last_published("ROV/status"), Some("running".to_string()));

        transport.inject("PC/commands/stop", "");
        rov.iterate();
        assert_eq!(transport.last_published("ROV/status"), Some("stopped".to_string()));
        // Status is republished only on change
        rov.iterate();
        assert_eq!(transport.publish_count("ROV/status"), 2);
    }

    #[test]
    fn test_remaining_budget() {
        let frame = Duration::from_millis(16);
        assert_eq!(
            remaining_budget(frame, Duration::from_millis(6)),
            Duration::from_millis(10)
        );
        assert_eq!(remaining_budget(frame, frame), Duration::ZERO);
        assert_eq!(
            remaining_budget(frame, Duration::from_millis(40)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_run_returns_shutdown_when_flag_cleared() {
        let (mut rov, _transport) = rov();
        let running = AtomicBool::new(false);
        assert_eq!(rov.run(&running), RunOutcome::Shutdown);
        assert_eq!(rov.status(), Status::Stopped);
    }

    #[test]
    fn test_i2c_snapshot_topic_shape() {
        let (mut rov, transport) = rov();
        start(&mut rov);

        // Mock bus driver has no injected registers: reads fail and are
        // omitted, but the object still ticks without aborting the loop
        transport.inject("PC/i2c/imu/addr", "0x68");
        transport.inject("PC/i2c/imu/read_regs", r#"{"accel": [59, 2]}"#);
        assert_eq!(rov.iterate(), None);
        assert_eq!(transport.publish_count("ROV/I2C/imu/accel"), 0);
    }
}
