//! Transport layer for broker communication
//!
//! This module provides the transport abstraction the lifecycle controller
//! drives, and the MQTT implementation used in production.

use crate::protocol::{InboundMessage, QoS};
use std::time::Duration;
use tokio::sync::mpsc;

pub mod mqtt;

/// Capacity of the channel carrying transport events to the controller
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Something the transport observed asynchronously
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An application message arrived on a subscribed topic
    Message(InboundMessage),
    /// The broker link dropped; the transport is reconnecting on its own
    ConnectionLost(String),
    /// The broker link is back after a loss. Subscriptions must be re-applied.
    Reconnected,
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the broker client so the
/// lifecycle controller can be driven by an in-memory double in tests.
/// All methods take `&self` so a transport can be shared between the
/// controller and its dispatch task.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker and wait for it to accept the session.
    ///
    /// On success returns the receiving end of the event channel. Every
    /// inbound message and link change is delivered there, in order.
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>, Self::Error>;

    /// Subscribe to a topic pattern
    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Publish a payload to a concrete topic
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error>;

    /// Disconnect, giving in-flight work at most `grace` to complete
    async fn disconnect(&self, grace: Duration) -> Result<(), Self::Error>;
}

/// Type alias for the production transport
pub type MqttTransport = mqtt::MqttClient;
