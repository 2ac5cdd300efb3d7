//! Message types for the serial and WebSocket wire formats.
//!
//! Three kinds of traffic cross the bridge:
//!
//! - **Commands** (client → device): normalized to a single JSON object
//!   `{"command": ..., "data": ...}` before being written to the serial
//!   port. The firmware dispatches on the `command` field; renaming it to
//!   `type` on the serial side would break it.
//! - **Device messages** (device → clients): JSON objects tagged with a
//!   `type` field. The bridge relays them opaquely but inspects the tag to
//!   cache the latest `sensor_data` and `device_status`.
//! - **Bridge events** (bridge → clients): connection status and command
//!   acknowledgements, also tagged with `type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// A normalized command destined for the device.
///
/// Clients are permissive in what they send: the command name may appear
/// under `command` or `type`, and the payload under `payload` or `data`.
/// Some clients also inline payload fields at the top level
/// (`{"command": "set_rgb", "r": 255, ...}`). [`Command::from_value`]
/// accepts all of these and produces the canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    /// The command name, e.g. `start_alarm` or `get_sensors`.
    pub command: String,
    /// Optional command arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Command {
    /// Create a command with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            data: None,
        }
    }

    /// Attach an argument payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Normalize an arbitrary client JSON object into a command.
    ///
    /// Accepts `command` or `type` for the name, `payload` or `data` for
    /// the arguments. When neither payload key is present, any remaining
    /// top-level fields are folded into `data`.
    pub fn from_value(value: Value) -> ParseResult<Self> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => return Err(ParseError::NotAnObject(json_type_name(&other))),
        };

        let name = obj
            .remove("command")
            .or_else(|| obj.remove("type"))
            .ok_or(ParseError::MissingCommand)?;
        let command = match name {
            Value::String(s) if !s.is_empty() => s,
            other => return Err(ParseError::InvalidCommandName(other.to_string())),
        };

        let data = match obj.remove("payload").or_else(|| obj.remove("data")) {
            Some(Value::Null) | None => {
                // Fold loose top-level arguments into the payload.
                let rest: Map<String, Value> = obj.into_iter().collect();
                if rest.is_empty() {
                    None
                } else {
                    Some(Value::Object(rest))
                }
            }
            Some(data) => Some(data),
        };

        Ok(Self { command, data })
    }

    /// Parse and normalize a command from raw JSON text.
    pub fn from_json(text: &str) -> ParseResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Command::from_value(value).map_err(serde::de::Error::custom)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Well-known device message kinds.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new kinds in
/// future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageKind {
    /// Periodic environment reading.
    SensorData,
    /// Alarm and LED state snapshot.
    DeviceStatus,
    /// Sound detector edge event.
    SoundEvent,
    /// Firmware boot banner.
    DeviceReady,
    /// Acknowledgement of a command.
    CommandResponse,
    /// Anything else; relayed untouched.
    Unknown,
}

impl MessageKind {
    /// Map a `type` tag to a kind.
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "sensor_data" => Self::SensorData,
            "device_status" => Self::DeviceStatus,
            "sound_event" => Self::SoundEvent,
            "device_ready" => Self::DeviceReady,
            "command_response" => Self::CommandResponse,
            _ => Self::Unknown,
        }
    }
}

/// A JSON message received from the device.
///
/// The bridge treats device traffic as opaque JSON; this wrapper only
/// exposes the `type` tag for routing and typed views for the well-known
/// payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceMessage(Value);

impl DeviceMessage {
    /// Wrap a JSON value.
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Parse a message from raw JSON text.
    pub fn from_json(text: &str) -> ParseResult<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }

    /// The `type` tag, if this is a tagged object.
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// The `type` tag mapped to a [`MessageKind`].
    pub fn message_kind(&self) -> MessageKind {
        self.kind().map_or(MessageKind::Unknown, MessageKind::from_kind)
    }

    /// Typed view of a `sensor_data` payload (under the `data` field).
    pub fn sensor_data(&self) -> Option<SensorData> {
        if self.message_kind() != MessageKind::SensorData {
            return None;
        }
        self.0
            .get("data")
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }

    /// Typed view of a `device_status` payload (under the `status` field).
    pub fn device_status(&self) -> Option<DeviceStatus> {
        if self.message_kind() != MessageKind::DeviceStatus {
            return None;
        }
        self.0
            .get("status")
            .and_then(|status| serde_json::from_value(status.clone()).ok())
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Unwrap into the underlying JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Environment reading reported by the firmware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorData {
    /// Raw photoresistor reading (12-bit ADC, 0-4095).
    pub light_level: u16,
    /// Whether the sound detector's digital output is high.
    pub sound_detected: bool,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity percentage.
    pub humidity: f32,
    /// Device uptime timestamp in milliseconds.
    pub timestamp: u64,
}

/// Alarm and LED state snapshot reported by the firmware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceStatus {
    pub alarm_enabled: bool,
    pub alarm_active: bool,
    pub sunrise_active: bool,
    pub sunset_active: bool,
    /// Buzzer frequency in Hz.
    pub alarm_frequency: u32,
    /// Buzzer volume, 0-255.
    pub alarm_volume: u8,
    pub rgb: Rgb,
}

/// RGB LED state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Events originated by the bridge itself.
///
/// These are serialized with a `type` tag in snake_case so web clients
/// handle them uniformly with device messages.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum BridgeEvent {
    /// Serial link state changed, or a snapshot sent to a joining client.
    BridgeStatus {
        /// Whether the serial link is up.
        connected: bool,
        /// Compatibility alias for `connected`; older clients read this.
        esp32_connected: bool,
        /// The serial port path when connected.
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<String>,
        /// The error that took the link down, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    /// Acknowledgement that a client command was (or was not) written to
    /// the device.
    CommandResponse {
        success: bool,
        command: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
}

impl BridgeEvent {
    /// Build a `bridge_status` event for the current link state.
    pub fn status(connected: bool, port: Option<String>, error: Option<String>) -> Self {
        Self::BridgeStatus {
            connected,
            esp32_connected: connected,
            port,
            error,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Build a `command_response` acknowledgement.
    pub fn command_response(success: bool, command: impl Into<String>) -> Self {
        Self::CommandResponse {
            success,
            command: command.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
