//! Mock implementations for testing
//!
//! Provides an in-memory `Transport` and a recording `MessageHandler` so the
//! lifecycle controller and router can be exercised without a broker.

use crate::error::BackendError;
use crate::handlers::{DecodeError, MessageHandler};
use crate::protocol::{InboundMessage, QoS};
use crate::transport::{Transport, TransportEvent, EVENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A publish recorded by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    subscriptions: Mutex<Vec<(String, QoS)>>,
    published: Mutex<Vec<PublishedMessage>>,
    events_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    fail_connect: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_publish: AtomicBool,
    connect_delay_ms: AtomicU64,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

/// Mock transport for testing. Clones share state, so a test can keep one
/// handle while the controller owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_failure(self) -> Self {
        self.set_connect_failure(true);
        self
    }

    pub fn with_subscribe_failure(self) -> Self {
        self.state.fail_subscribe.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_publish_failure(self) -> Self {
        self.state.fail_publish.store(true, Ordering::SeqCst);
        self
    }

    /// Hold every `connect` for `delay` before it answers
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn set_connect_failure(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_subscribe_failure(&self, fail: bool) {
        self.state.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Patterns subscribed so far, in call order, including resubscriptions
    pub fn subscribed_patterns(&self) -> Vec<String> {
        self.state
            .subscriptions
            .lock()
            .map(|subs| subs.iter().map(|(pattern, _)| pattern.clone()).collect())
            .unwrap_or_default()
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.state
            .published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.disconnect_calls.load(Ordering::SeqCst)
    }

    /// True between a successful connect and the next disconnect
    pub fn is_connected(&self) -> bool {
        self.state
            .events_tx
            .lock()
            .map(|tx| tx.is_some())
            .unwrap_or(false)
    }

    pub fn clear_history(&self) {
        if let Ok(mut subs) = self.state.subscriptions.lock() {
            subs.clear();
        }
        if let Ok(mut published) = self.state.published.lock() {
            published.clear();
        }
    }

    /// Push an event to the connected consumer. False if not connected.
    pub async fn inject(&self, event: TransportEvent) -> bool {
        let sender = self
            .state
            .events_tx
            .lock()
            .ok()
            .and_then(|tx| tx.clone());

        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Deliver an inbound message at QoS 1
    pub async fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        self.inject(TransportEvent::Message(InboundMessage::new(
            topic,
            payload.to_vec(),
            QoS::AtLeastOnce,
        )))
        .await
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = BackendError;

    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>, Self::Error> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);

        let delay_ms = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(BackendError::internal_error("Mock connection failure"));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        if let Ok(mut events_tx) = self.state.events_tx.lock() {
            *events_tx = Some(tx);
        }
        Ok(rx)
    }

    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), Self::Error> {
        if self.state.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BackendError::internal_error("Mock subscription failure"));
        }

        if let Ok(mut subs) = self.state.subscriptions.lock() {
            subs.push((pattern.to_string(), qos));
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error> {
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(BackendError::internal_error("Mock publish failure"));
        }

        if let Ok(mut published) = self.state.published.lock() {
            published.push(PublishedMessage {
                topic: topic.to_string(),
                qos,
                retain,
                payload,
            });
        }
        Ok(())
    }

    async fn disconnect(&self, _grace: Duration) -> Result<(), Self::Error> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender ends the consumer's event stream
        if let Ok(mut events_tx) = self.state.events_tx.lock() {
            events_tx.take();
        }
        Ok(())
    }
}

/// Handler that records every payload routed to it
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    name: &'static str,
    strict_json: bool,
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingHandler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            strict_json: false,
            payloads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reject payloads that are not JSON, after recording them
    pub fn strict_json(mut self) -> Self {
        self.strict_json = true;
        self
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads
            .lock()
            .map(|payloads| payloads.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.payloads.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl MessageHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle(&self, payload: &[u8]) -> Result<(), DecodeError> {
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload.to_vec());
        }

        if self.strict_json {
            serde_json::from_slice::<serde_json::Value>(payload).map_err(|source| {
                DecodeError::InvalidPayload {
                    record: self.name,
                    source,
                }
            })?;
        }
        Ok(())
    }
}
