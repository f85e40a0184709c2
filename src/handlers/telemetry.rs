use super::{forward_record, DecodeError, MessageHandler};
use crate::protocol::Telemetry;
use tokio::sync::mpsc;
use tracing::info;

/// Decode a telemetry payload
pub fn decode_telemetry(payload: &[u8]) -> Result<Telemetry, DecodeError> {
    serde_json::from_slice(payload).map_err(|source| DecodeError::InvalidPayload {
        record: "telemetry",
        source,
    })
}

/// Logs battery, obstacle distance and current action for each reading
#[derive(Debug, Default, Clone)]
pub struct TelemetryHandler {
    sink: Option<mpsc::Sender<Telemetry>>,
}

impl TelemetryHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward each decoded reading to `sink`
    pub fn with_sink(sink: mpsc::Sender<Telemetry>) -> Self {
        Self { sink: Some(sink) }
    }
}

impl MessageHandler for TelemetryHandler {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn handle(&self, payload: &[u8]) -> Result<(), DecodeError> {
        let telemetry = decode_telemetry(payload)?;

        info!(
            device_id = %telemetry.device_id,
            battery = telemetry.battery,
            distance_cm = telemetry.distance_front,
            action = %telemetry.current_action,
            "Telemetry from {}: Battery={}%, Distance={}cm, Action={}",
            telemetry.device_id,
            telemetry.battery,
            telemetry.distance_front,
            telemetry.current_action
        );

        forward_record(self.sink.as_ref(), telemetry, self.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = br#"{"device_id":"car-7","timestamp":1000,"battery":80,"distance_front":30,"temperature":25,"current_action":"forward","wifi_rssi":-60}"#;

    #[test]
    fn test_decode_telemetry() {
        let telemetry = decode_telemetry(SAMPLE).unwrap();
        assert_eq!(telemetry.device_id, "car-7");
        assert_eq!(telemetry.battery, 80);
        assert_eq!(telemetry.current_action, "forward");
    }

    #[test]
    fn test_decode_failure() {
        let err = decode_telemetry(b"{ not json").unwrap_err();
        assert!(err.to_string().starts_with("Invalid telemetry payload"));
    }

    #[tokio::test]
    async fn test_handler_forwards_to_sink() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(4);
        let handler = TelemetryHandler::with_sink(tx);

        // Act
        handler.handle(SAMPLE).unwrap();

        // Assert
        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.device_id, "car-7");
        assert_eq!(forwarded.distance_front, 30);
    }

    #[tokio::test]
    async fn test_handler_forwards_nothing_on_failure() {
        let (tx, mut rx) = mpsc::channel(4);
        let handler = TelemetryHandler::with_sink(tx);

        assert!(handler.handle(b"garbage").is_err());
        assert!(rx.try_recv().is_err());
    }
}
