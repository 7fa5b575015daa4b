//! Inbound topic decoding
//!
//! Topics follow `<sender>/<category>/<subcategory>[/<variable>]`. Each
//! drained topic/payload pair is decoded exactly once into a [`Command`];
//! the control loop then dispatches on the variant. Anything that does not
//! decode surfaces as a typed [`ParseError`] for the caller to log and skip.

use crate::devices::{BusUpdate, PinMode, PinUpdate};
use std::collections::BTreeMap;

/// Default telemetry stream interval when a `req_id` payload is empty
/// (10 ms = 100 Hz)
const DEFAULT_STREAM_INTERVAL_US: u32 = 10_000;

/// A fully decoded operator command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Shutdown,
    Restart,
    Stop,
    Start,
    Pin { device: String, update: PinUpdate },
    Bus { device: String, update: BusUpdate },
    Flight(FlightCommand),
}

/// Flight-controller commands
#[derive(Debug, Clone, PartialEq)]
pub enum FlightCommand {
    RequestStream { message_id: u32, interval_us: u32 },
    SendCommand { command_id: u16, params: Vec<f32> },
    SetParam { name: String, value: f32, param_type: u8 },
}

/// Why a topic/payload pair did not decode
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("sender {0} is not the operator")]
    ForeignSender(String),
    #[error("topic has too few segments")]
    Malformed,
    #[error("unknown category {0}")]
    UnknownCategory(String),
    #[error("unknown command {0}")]
    UnknownCommand(String),
    #[error("unknown field {0}")]
    UnknownField(String),
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl Command {
    /// Decode a topic/payload pair from the given operator
    pub fn parse(topic: &str, payload: &str, operator: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 3 {
            return Err(ParseError::Malformed);
        }
        if parts[0] != operator {
            return Err(ParseError::ForeignSender(parts[0].to_string()));
        }

        match parts[1] {
            "commands" => match parts[2] {
                "shutdown" => Ok(Command::Shutdown),
                "restart" => Ok(Command::Restart),
                "stop" => Ok(Command::Stop),
                "start" => Ok(Command::Start),
                other => Err(ParseError::UnknownCommand(other.to_string())),
            },
            "pins" => {
                let field = *parts.get(3).ok_or(ParseError::Malformed)?;
                let update = parse_pin_update(field, payload)?;
                Ok(Command::Pin {
                    device: parts[2].to_string(),
                    update,
                })
            }
            "i2c" => {
                let field = *parts.get(3).ok_or(ParseError::Malformed)?;
                let update = parse_bus_update(field, payload)?;
                Ok(Command::Bus {
                    device: parts[2].to_string(),
                    update,
                })
            }
            "mavlink" => {
                let variable = *parts.get(3).ok_or(ParseError::Malformed)?;
                parse_flight_command(parts[2], variable, payload).map(Command::Flight)
            }
            other => Err(ParseError::UnknownCategory(other.to_string())),
        }
    }
}

fn parse_pin_update(field: &str, payload: &str) -> Result<PinUpdate, ParseError> {
    match field {
        "id" => Ok(PinUpdate::Id(parse_int(payload)? as u8)),
        "mode" => PinMode::from_token(payload)
            .map(PinUpdate::Mode)
            .ok_or(ParseError::Payload(format!("unknown pin mode {}", payload))),
        "val" => Ok(PinUpdate::Value(parse_float(payload)?)),
        "freq" => Ok(PinUpdate::Frequency(parse_float(payload)?)),
        other => Err(ParseError::UnknownField(other.to_string())),
    }
}

fn parse_bus_update(field: &str, payload: &str) -> Result<BusUpdate, ParseError> {
    match field {
        "addr" => Ok(BusUpdate::Address(parse_int(payload)? as u16)),
        "send_vals" => Ok(BusUpdate::WriteOnce(parse_register_map(payload)?)),
        "poll_vals" => Ok(BusUpdate::WritePoll(parse_register_map(payload)?)),
        "read_regs" => {
            let spec: BTreeMap<String, (u8, usize)> = serde_json::from_str(payload)
                .map_err(|e| ParseError::Payload(e.to_string()))?;
            Ok(BusUpdate::ReadSpec(spec))
        }
        other => Err(ParseError::UnknownField(other.to_string())),
    }
}

fn parse_flight_command(
    op: &str,
    variable: &str,
    payload: &str,
) -> Result<FlightCommand, ParseError> {
    match op {
        "req_id" => {
            let message_id = parse_int(variable)? as u32;
            let interval_us = if payload.is_empty() {
                DEFAULT_STREAM_INTERVAL_US
            } else {
                parse_int(payload)? as u32
            };
            Ok(FlightCommand::RequestStream {
                message_id,
                interval_us,
            })
        }
        "send_msg" => {
            let command_id = parse_int(variable)? as u16;
            let params: Vec<f32> = serde_json::from_str(payload)
                .map_err(|e| ParseError::Payload(e.to_string()))?;
            if params.len() > 7 {
                return Err(ParseError::Payload(format!(
                    "{} parameters given, at most 7 allowed",
                    params.len()
                )));
            }
            Ok(FlightCommand::SendCommand { command_id, params })
        }
        "set_param" => {
            let (value, param_type) = parse_param_payload(payload)?;
            Ok(FlightCommand::SetParam {
                name: variable.to_string(),
                value,
                param_type,
            })
        }
        other => Err(ParseError::UnknownField(other.to_string())),
    }
}

/// Parse a `set_param` payload: either a bare number (REAL32) or
/// `{"value": v, "type": t}`
fn parse_param_payload(payload: &str) -> Result<(f32, u8), ParseError> {
    #[derive(serde::Deserialize)]
    struct ParamPayload {
        value: f32,
        #[serde(rename = "type", default = "default_param_type")]
        param_type: u8,
    }
    fn default_param_type() -> u8 {
        9 // MAV_PARAM_TYPE_REAL32
    }

    if let Ok(value) = payload.parse::<f32>() {
        return Ok((value, default_param_type()));
    }
    let parsed: ParamPayload =
        serde_json::from_str(payload).map_err(|e| ParseError::Payload(e.to_string()))?;
    Ok((parsed.value, parsed.param_type))
}

/// Parse a JSON register map with string keys (`{"107": 0}` or `{"0x6B": 0}`)
fn parse_register_map(payload: &str) -> Result<BTreeMap<u8, u8>, ParseError> {
    let raw: BTreeMap<String, u8> =
        serde_json::from_str(payload).map_err(|e| ParseError::Payload(e.to_string()))?;
    let mut map = BTreeMap::new();
    for (key, value) in raw {
        map.insert(parse_int(&key)? as u8, value);
    }
    Ok(map)
}

/// Parse an integer, accepting decimal or 0x-prefixed hex
fn parse_int(text: &str) -> Result<i64, ParseError> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or(text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| ParseError::Payload(format!("not an integer: {}", text)))
}

fn parse_float(text: &str) -> Result<f64, ParseError> {
    text.trim()
        .parse()
        .map_err(|_| ParseError::Payload(format!("not a number: {}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lifecycle_commands() {
        assert_eq!(
            Command::parse("PC/commands/shutdown", "", "PC").unwrap(),
            Command::Shutdown
        );
        assert_eq!(
            Command::parse("PC/commands/restart", "", "PC").unwrap(),
            Command::Restart
        );
        assert_eq!(
            Command::parse("PC/commands/stop", "", "PC").unwrap(),
            Command::Stop
        );
        assert!(matches!(
            Command::parse("PC/commands/dance", "", "PC"),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_pin_updates() {
        assert_eq!(
            Command::parse("PC/pins/LED/id", "17", "PC").unwrap(),
            Command::Pin {
                device: "LED".to_string(),
                update: PinUpdate::Id(17)
            }
        );
        assert_eq!(
            Command::parse("PC/pins/LED/mode", "write-digital", "PC").unwrap(),
            Command::Pin {
                device: "LED".to_string(),
                update: PinUpdate::Mode(PinMode::WriteDigital)
            }
        );
        assert_eq!(
            Command::parse("PC/pins/thruster/val", "1500", "PC").unwrap(),
            Command::Pin {
                device: "thruster".to_string(),
                update: PinUpdate::Value(1500.0)
            }
        );
        assert!(matches!(
            Command::parse("PC/pins/LED/mode", "sideways", "PC"),
            Err(ParseError::Payload(_))
        ));
    }

    #[test]
    fn test_parse_bus_updates() {
        assert_eq!(
            Command::parse("PC/i2c/imu/addr", "0x68", "PC").unwrap(),
            Command::Bus {
                device: "imu".to_string(),
                update: BusUpdate::Address(0x68)
            }
        );
        assert_eq!(
            Command::parse("PC/i2c/imu/send_vals", r#"{"107": 0}"#, "PC").unwrap(),
            Command::Bus {
                device: "imu".to_string(),
                update: BusUpdate::WriteOnce(BTreeMap::from([(107, 0)]))
            }
        );
        assert_eq!(
            Command::parse("PC/i2c/imu/read_regs", r#"{"accel": [59, 6]}"#, "PC").unwrap(),
            Command::Bus {
                device: "imu".to_string(),
                update: BusUpdate::ReadSpec(BTreeMap::from([("accel".to_string(), (59, 6))]))
            }
        );
    }

    #[test]
    fn test_parse_flight_commands() {
        assert_eq!(
            Command::parse("PC/mavlink/req_id/30", "5000", "PC").unwrap(),
            Command::Flight(FlightCommand::RequestStream {
                message_id: 30,
                interval_us: 5000
            })
        );
        // Empty payload falls back to the default interval
        assert_eq!(
            Command::parse("PC/mavlink/req_id/30", "", "PC").unwrap(),
            Command::Flight(FlightCommand::RequestStream {
                message_id: 30,
                interval_us: 10_000
            })
        );
        assert_eq!(
            Command::parse("PC/mavlink/send_msg/400", "[1.0, 0.0]", "PC").unwrap(),
            Command::Flight(FlightCommand::SendCommand {
                command_id: 400,
                params: vec![1.0, 0.0]
            })
        );
        assert_eq!(
            Command::parse(
                "PC/mavlink/set_param/SURFACE_DEPTH",
                r#"{"value": -10.0, "type": 9}"#,
                "PC"
            )
            .unwrap(),
            Command::Flight(FlightCommand::SetParam {
                name: "SURFACE_DEPTH".to_string(),
                value: -10.0,
                param_type: 9
            })
        );
        assert_eq!(
            Command::parse("PC/mavlink/set_param/SURFACE_DEPTH", "-10.0", "PC").unwrap(),
            Command::Flight(FlightCommand::SetParam {
                name: "SURFACE_DEPTH".to_string(),
                value: -10.0,
                param_type: 9
            })
        );
        assert!(matches!(
            Command::parse(
                "PC/mavlink/send_msg/400",
                "[1, 2, 3, 4, 5, 6, 7, 8]",
                "PC"
            ),
            Err(ParseError::Payload(_))
        ));
    }

    #[test]
    fn test_foreign_sender_rejected() {
        assert!(matches!(
            Command::parse("intruder/commands/shutdown", "", "PC"),
            Err(ParseError::ForeignSender(_))
        ));
    }

    #[test]
    fn test_malformed_topics_rejected() {
        assert!(matches!(
            Command::parse("PC/pins", "", "PC"),
            Err(ParseError::Malformed)
        ));
        assert!(matches!(
            Command::parse("PC/pins/LED", "1", "PC"),
            Err(ParseError::Malformed)
        ));
        assert!(matches!(
            Command::parse("PC/video/stream/on", "1", "PC"),
            Err(ParseError::UnknownCategory(_))
        ));
    }
}
