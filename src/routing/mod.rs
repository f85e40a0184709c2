//! Routing of inbound fleet messages to handlers
//!
//! See [`router`] for the first-match-wins dispatch policy.

pub mod router;

pub use router::{MessageRouter, RouteOutcome, RouterBuilder, Subscription};

use crate::config::{ConfigError, MqttSection};
use crate::handlers::{StatusHandler, TelemetryHandler};
use crate::observability::metrics::MetricsCollector;
use crate::protocol::{QoS, TopicPattern};
use std::sync::Arc;

/// The backend's standard table: telemetry first, then status, both at QoS 1
pub fn fleet_router(
    config: &MqttSection,
    telemetry: TelemetryHandler,
    status: StatusHandler,
    metrics: Arc<MetricsCollector>,
) -> Result<MessageRouter, ConfigError> {
    let telemetry_pattern = TopicPattern::parse(&config.topic_telemetry).map_err(|source| {
        ConfigError::InvalidTopicPattern {
            field: "topic_telemetry",
            source,
        }
    })?;
    let status_pattern =
        TopicPattern::parse(&config.topic_status).map_err(|source| {
            ConfigError::InvalidTopicPattern {
                field: "topic_status",
                source,
            }
        })?;

    Ok(MessageRouter::builder()
        .subscribe(Subscription::new(
            telemetry_pattern,
            QoS::AtLeastOnce,
            Arc::new(telemetry),
        ))
        .subscribe(Subscription::new(
            status_pattern,
            QoS::AtLeastOnce,
            Arc::new(status),
        ))
        .with_metrics(metrics)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_router_order() {
        let router = fleet_router(
            &MqttSection::default(),
            TelemetryHandler::new(),
            StatusHandler::new(),
            Arc::new(MetricsCollector::new()),
        )
        .unwrap();

        let names: Vec<_> = router
            .subscriptions()
            .iter()
            .map(|s| s.handler_name())
            .collect();
        assert_eq!(names, vec!["telemetry", "status"]);
        assert_eq!(
            router.subscriptions()[0].pattern().to_string(),
            "iot-car/+/telemetry"
        );
    }

    #[test]
    fn test_fleet_router_invalid_pattern() {
        let config = MqttSection {
            topic_status: "iot-car/st+tus".to_string(),
            ..MqttSection::default()
        };
        let result = fleet_router(
            &config,
            TelemetryHandler::new(),
            StatusHandler::new(),
            Arc::new(MetricsCollector::new()),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidTopicPattern {
                field: "topic_status",
                ..
            })
        ));
    }
}
