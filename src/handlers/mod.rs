//! Type-specific handlers for inbound fleet messages
//!
//! A handler decodes one payload shape and logs it. Handlers may also
//! forward decoded records to a bounded channel for downstream consumers.

pub mod status;
pub mod telemetry;

pub use status::{decode_status, StatusHandler};
pub use telemetry::{decode_telemetry, TelemetryHandler};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Payload decode failure. Logged by the router, never propagated further.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid {record} payload: {source}")]
    InvalidPayload {
        record: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Processes the payload of a message routed to it
pub trait MessageHandler: Send + Sync {
    /// Stable name used in logs and metrics
    fn name(&self) -> &'static str;

    fn handle(&self, payload: &[u8]) -> Result<(), DecodeError>;
}

/// Offer a decoded record to an optional sink without blocking.
/// A full sink drops the record.
pub(crate) fn forward_record<T>(sink: Option<&mpsc::Sender<T>>, record: T, handler: &str) {
    let Some(sink) = sink else {
        return;
    };

    match sink.try_send(record) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(handler, "Record sink is full, dropping record");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(handler, "Record sink closed, dropping record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_record_without_sink() {
        forward_record::<u32>(None, 1, "test");
    }

    #[tokio::test]
    async fn test_forward_record_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);

        forward_record(Some(&tx), 1u32, "test");
        forward_record(Some(&tx), 2u32, "test");

        assert_eq!(rx.recv().await, Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_record_to_closed_sink() {
        let (tx, rx) = mpsc::channel::<u32>(1);
        drop(rx);
        forward_record(Some(&tx), 1, "test");
    }
}
