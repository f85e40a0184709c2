//! Backend configuration
//!
//! Every setting has a default and can be overridden by an environment
//! variable. An optional TOML file may supply the same fields; environment
//! variables win over file values. Empty environment values are ignored.

use crate::protocol::{TopicPattern, TopicPatternError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BROKER_ADDRESS: &str = "localhost:1883";
pub const DEFAULT_CLIENT_ID: &str = "go-backend";
pub const DEFAULT_TOPIC_TELEMETRY: &str = "iot-car/+/telemetry";
pub const DEFAULT_TOPIC_STATUS: &str = "iot-car/+/status";
pub const DEFAULT_TOPIC_FLEET_BROADCAST: &str = "iot-car/fleet/broadcast";

/// Shortest keep-alive the MQTT client accepts
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Broker connection and topic settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttSection {
    /// `host:port`, or a `mqtt://`, `tcp://` or `mqtts://` URL
    pub broker_address: String,
    pub client_id: String,
    pub topic_telemetry: String,
    pub topic_status: String,
    pub topic_fleet_broadcast: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Upper bound on a graceful disconnect
    pub disconnect_grace_ms: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_address: DEFAULT_BROKER_ADDRESS.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            topic_telemetry: DEFAULT_TOPIC_TELEMETRY.to_string(),
            topic_status: DEFAULT_TOPIC_STATUS.to_string(),
            topic_fleet_broadcast: DEFAULT_TOPIC_FLEET_BROADCAST.to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            disconnect_grace_ms: 250,
        }
    }
}

impl MqttSection {
    /// Keep-alive interval. The client cannot run below [`MIN_KEEP_ALIVE_SECS`].
    pub fn keep_alive(&self) -> Result<Duration, ConfigError> {
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}, got {}",
                self.keep_alive_secs
            )));
        }
        Ok(Duration::from_secs(self.keep_alive_secs))
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// Resolve the broker address into host, port and TLS flag
    pub fn broker(&self) -> Result<BrokerAddress, ConfigError> {
        BrokerAddress::parse(&self.broker_address)
    }
}

/// Health endpoint settings. The server is disabled without a port.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthSection {
    pub port: Option<u16>,
}

/// Where the broker lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `host`, `host:port` or a URL with an `mqtt`, `tcp`, `mqtts` or
    /// `ssl` scheme. The port defaults to 1883, or 8883 for TLS schemes.
    pub fn parse(address: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidBrokerAddress(address.to_string());

        let address = address.trim();
        if address.is_empty() {
            return Err(invalid());
        }

        let url = if address.contains("://") {
            Url::parse(address).map_err(|_| invalid())?
        } else {
            Url::parse(&format!("mqtt://{address}")).map_err(|_| invalid())?
        };

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(invalid()),
        };

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(invalid)?;
        let port = url.port().unwrap_or(if tls {
            DEFAULT_MQTTS_PORT
        } else {
            DEFAULT_MQTT_PORT
        });

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnvValue { name: String, value: String },
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddress(String),
    #[error("Invalid topic pattern for {field}: {source}")]
    InvalidTopicPattern {
        field: &'static str,
        #[source]
        source: TopicPatternError,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file when one is given, otherwise from the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::from_env(),
        }
    }

    /// Override fields with values from `lookup`. Unset and empty values
    /// leave the field untouched.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("MQTT_BROKER_ADDRESS") {
            self.mqtt.broker_address = value;
        }
        if let Some(value) = get("MQTT_CLIENT_ID") {
            self.mqtt.client_id = value;
        }
        if let Some(value) = get("MQTT_TOPIC_TELEMETRY") {
            self.mqtt.topic_telemetry = value;
        }
        if let Some(value) = get("MQTT_TOPIC_STATUS") {
            self.mqtt.topic_status = value;
        }
        if let Some(value) = get("MQTT_TOPIC_FLEET_BROADCAST") {
            self.mqtt.topic_fleet_broadcast = value;
        }
        if let Some(value) = get("MQTT_USERNAME") {
            self.mqtt.username = Some(value);
        }
        if let Some(value) = get("MQTT_PASSWORD") {
            self.mqtt.password = Some(value);
        }
        if let Some(value) = get("MQTT_KEEP_ALIVE_SECS") {
            self.mqtt.keep_alive_secs = parse_env("MQTT_KEEP_ALIVE_SECS", &value)?;
        }
        if let Some(value) = get("MQTT_DISCONNECT_GRACE_MS") {
            self.mqtt.disconnect_grace_ms = parse_env("MQTT_DISCONNECT_GRACE_MS", &value)?;
        }
        if let Some(value) = get("HEALTH_PORT") {
            self.health.port = Some(parse_env("HEALTH_PORT", &value)?);
        }

        Ok(())
    }

    /// Check that the broker address resolves and every topic pattern parses
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.client_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "client_id must not be empty".to_string(),
            ));
        }

        self.mqtt.broker()?;
        self.mqtt.keep_alive()?;
        self.telemetry_pattern()?;
        self.status_pattern()?;

        // The broadcast topic is published to, so it must be concrete
        let broadcast = parse_pattern("topic_fleet_broadcast", &self.mqtt.topic_fleet_broadcast)?;
        if broadcast.has_wildcards() {
            return Err(ConfigError::InvalidConfig(format!(
                "topic_fleet_broadcast '{}' must not contain wildcards",
                self.mqtt.topic_fleet_broadcast
            )));
        }

        Ok(())
    }

    pub fn telemetry_pattern(&self) -> Result<TopicPattern, ConfigError> {
        parse_pattern("topic_telemetry", &self.mqtt.topic_telemetry)
    }

    pub fn status_pattern(&self) -> Result<TopicPattern, ConfigError> {
        parse_pattern("topic_status", &self.mqtt.topic_status)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
broker_address = "localhost:1883"
client_id = "test-backend"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn parse_pattern(field: &'static str, pattern: &str) -> Result<TopicPattern, ConfigError> {
    TopicPattern::parse(pattern).map_err(|source| ConfigError::InvalidTopicPattern { field, source })
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue {
            name: name.to_string(),
            value: value.to_string(),
        })
}
