//! Message types exchanged with the vehicle fleet
//!
//! Inbound records (telemetry, status) are published by the cars; commands
//! are published by this backend. All payloads are JSON with snake_case keys.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Delivery guarantee requested for a publish or subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    /// 0: fire and forget
    AtMostOnce,
    /// 1: acknowledged delivery
    #[default]
    AtLeastOnce,
    /// 2: assured single delivery
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Invalid QoS level {0}: expected 0, 1 or 2")]
pub struct InvalidQoS(pub u8);

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQoS(other)),
        }
    }
}

/// A message delivered by the transport. Consumed once by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        }
    }
}

/// Sensor reading published by a car on `iot-car/{device_id}/telemetry`
///
/// Missing fields fall back to zero or empty values; a payload only fails
/// to decode when it is not JSON or a field has the wrong type.
///
/// # Examples
/// ```
/// use iot_car_backend::protocol::Telemetry;
///
/// let payload = br#"{"device_id":"car-7","battery":80,"current_action":"forward"}"#;
/// let telemetry: Telemetry = serde_json::from_slice(payload).unwrap();
/// assert_eq!(telemetry.device_id, "car-7");
/// assert_eq!(telemetry.battery, 80);
/// assert_eq!(telemetry.wifi_rssi, 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    pub device_id: String,
    /// Device clock in milliseconds
    pub timestamp: i64,
    /// Battery level in percent
    pub battery: i32,
    /// Ultrasonic distance to the nearest obstacle ahead, in centimeters
    pub distance_front: i32,
    /// Degrees Celsius
    pub temperature: i32,
    pub current_action: String,
    pub wifi_rssi: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_heap: Option<u64>,
}

/// Connectivity reported by a car
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    /// Any value other than `online`/`offline`
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Online/offline notice published by a car on `iot-car/{device_id}/status`.
/// Cars also publish `offline` as their last-will message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub device_id: String,
    pub status: DeviceStatus,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
}

/// Motion commands understood by the car firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl CommandAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandAction::Forward => "forward",
            CommandAction::Backward => "backward",
            CommandAction::Left => "left",
            CommandAction::Right => "right",
            CommandAction::Stop => "stop",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown command action '{0}': expected forward, backward, left, right or stop")]
pub struct UnknownAction(pub String);

impl FromStr for CommandAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forward" => Ok(CommandAction::Forward),
            "backward" => Ok(CommandAction::Backward),
            "left" => Ok(CommandAction::Left),
            "right" => Ok(CommandAction::Right),
            "stop" => Ok(CommandAction::Stop),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

/// Control command published to `iot-car/{device_id}/command`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// UUID v4 so the car's acknowledgement can be correlated
    pub command_id: Uuid,
    pub device_id: String,
    pub action: CommandAction,
    /// Unix time in milliseconds
    pub timestamp: i64,
}

impl Command {
    pub fn new(device_id: impl Into<String>, action: CommandAction) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            device_id: device_id.into(),
            action,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
