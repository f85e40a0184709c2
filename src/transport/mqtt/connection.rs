//! Pure connection configuration for the MQTT client
//!
//! This module contains pure functions for building client options and
//! pacing reconnection attempts.

use crate::config::{ConfigError, MqttSection};
use crate::protocol::QoS;
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;

/// Reconnection pacing
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds, one entry per consecutive failure
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![100, 250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given (1-based) reconnection attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay);
        Duration::from_millis(millis)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("No ConnAck from broker within {0:?}")]
    ConnAckTimeout(Duration),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddress(String),
    #[error("Invalid client options: {0}")]
    InvalidOptions(String),
    #[error("Client is already connected")]
    AlreadyConnected,
    #[error("Client is not connected")]
    NotConnected,
}

impl From<ConfigError> for MqttError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidBrokerAddress(address) => MqttError::InvalidBrokerAddress(address),
            ConfigError::InvalidConfig(reason) => MqttError::InvalidOptions(reason),
            other => MqttError::ConnectionFailedStr(other.to_string()),
        }
    }
}

/// Build client options from the MQTT section
pub fn configure_mqtt_options(config: &MqttSection) -> Result<MqttOptions, MqttError> {
    let broker = config.broker()?;
    let mut mqtt_options = MqttOptions::new(&config.client_id, &broker.host, broker.port);

    if broker.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keep_alive()?);
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

/// Map a QoS onto the client library's representation
pub fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

/// Map the client library's QoS back onto ours
pub fn from_mqtt_qos(qos: MqttQoS) -> QoS {
    match qos {
        MqttQoS::AtMostOnce => QoS::AtMostOnce,
        MqttQoS::AtLeastOnce => QoS::AtLeastOnce,
        MqttQoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}
