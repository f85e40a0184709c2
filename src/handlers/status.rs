use super::{forward_record, DecodeError, MessageHandler};
use crate::protocol::{DeviceStatus, Status};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Decode a status payload
pub fn decode_status(payload: &[u8]) -> Result<Status, DecodeError> {
    serde_json::from_slice(payload).map_err(|source| DecodeError::InvalidPayload {
        record: "status",
        source,
    })
}

/// Logs online/offline notices
#[derive(Debug, Default, Clone)]
pub struct StatusHandler {
    sink: Option<mpsc::Sender<Status>>,
}

impl StatusHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: mpsc::Sender<Status>) -> Self {
        Self { sink: Some(sink) }
    }
}

impl MessageHandler for StatusHandler {
    fn name(&self) -> &'static str {
        "status"
    }

    fn handle(&self, payload: &[u8]) -> Result<(), DecodeError> {
        let status = decode_status(payload)?;

        match status.status {
            DeviceStatus::Online | DeviceStatus::Offline => {
                info!(
                    device_id = %status.device_id,
                    status = %status.status,
                    firmware = status.firmware.as_deref().unwrap_or(""),
                    "Device {} is {}",
                    status.device_id,
                    status.status
                );
            }
            DeviceStatus::Unknown => {
                warn!(device_id = %status.device_id, "Device reported an unrecognized status");
            }
        }

        forward_record(self.sink.as_ref(), status, self.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_status() {
        let status = decode_status(br#"{"device_id":"car-3","status":"online","timestamp":5}"#)
            .unwrap();
        assert_eq!(status.device_id, "car-3");
        assert_eq!(status.status, DeviceStatus::Online);
        assert_eq!(status.timestamp, 5);
    }

    #[test]
    fn test_unknown_status_is_not_an_error() {
        let handler = StatusHandler::new();
        assert!(handler
            .handle(br#"{"device_id":"car-3","status":"sleeping"}"#)
            .is_ok());
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let handler = StatusHandler::new();
        assert!(handler.handle(br#"{"device_id":42}"#).is_err());
    }

    #[tokio::test]
    async fn test_last_will_forwarded() {
        let (tx, mut rx) = mpsc::channel(1);
        let handler = StatusHandler::with_sink(tx);

        handler
            .handle(br#"{"device_id":"car-001","status":"offline"}"#)
            .unwrap();

        let status = rx.recv().await.unwrap();
        assert_eq!(status.status, DeviceStatus::Offline);
    }
}
