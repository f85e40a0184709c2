//! IoT Car Backend
//!
//! Connects to an MQTT broker, subscribes to the telemetry and status topics
//! of a fleet of cars, and routes every inbound message to the handler bound
//! to the first matching topic pattern.
//!
//! # Overview
//!
//! - [`protocol`]: fleet message records and `+`/`#` topic matching
//! - [`transport`]: the `Transport` abstraction and its rumqttc implementation
//! - [`routing`]: ordered, first-match-wins dispatch to handlers
//! - [`handlers`]: telemetry and status decoders
//! - [`lifecycle`]: the connection state machine driving a transport
//! - [`observability`]: logging, metrics and health endpoints
//!
//! # Quick Start
//!
//! ```rust
//! use iot_car_backend::protocol::{matches, Topic, TopicPattern};
//!
//! let pattern: TopicPattern = "iot-car/+/telemetry".parse().unwrap();
//! let topic = Topic::parse("iot-car/car-7/telemetry");
//!
//! assert!(matches(&topic, &pattern));
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod testing;
pub mod transport;

pub use config::{AppConfig, ConfigError, MqttSection};
pub use error::{BackendError, BackendResult};
pub use lifecycle::{ConnectionController, ConnectionState};
pub use protocol::*;
pub use routing::{fleet_router, MessageRouter, RouterBuilder};
pub use transport::mqtt::MqttClient;
pub use transport::{Transport, TransportEvent};
