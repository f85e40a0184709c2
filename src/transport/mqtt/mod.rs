//! MQTT transport on top of rumqttc (protocol v5)
//!
//! The module separates pure functions from I/O so the decision logic can be
//! tested without a broker:
//!
//! - [`connection`] - client options and reconnection pacing
//! - [`event_router`] - classification of polled client events
//! - [`client`] - the rumqttc client and its event loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use iot_car_backend::config::MqttSection;
//! use iot_car_backend::protocol::QoS;
//! use iot_car_backend::transport::mqtt::MqttClient;
//! use iot_car_backend::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let client = MqttClient::new(MqttSection::default())?;
//! let mut events = client.connect().await?;
//! client.subscribe("iot-car/+/telemetry", QoS::AtLeastOnce).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod event_router;

pub use client::{MqttClient, DEFAULT_CONNECT_TIMEOUT};
pub use connection::{configure_mqtt_options, MqttError, ReconnectConfig};
pub use event_router::{EventRoute, EventRouter};
