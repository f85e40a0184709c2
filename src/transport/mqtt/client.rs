//! Impure I/O operations for the MQTT client
//!
//! This module owns the rumqttc client and the task that polls its event
//! loop. Inbound messages and link changes are forwarded to the channel
//! returned by `connect()`.

use super::connection::{configure_mqtt_options, to_mqtt_qos, MqttError, ReconnectConfig};
use super::event_router::{EventRoute, EventRouter};
use crate::config::MqttSection;
use crate::protocol::QoS;
use crate::transport::{Transport, TransportEvent, EVENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default bound on waiting for the broker's ConnAck
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of rumqttc's request queue
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Link state reported by the event loop task
#[derive(Debug, Clone, PartialEq)]
enum LinkState {
    Connecting,
    Up,
    Failed(String),
}

/// MQTT transport backed by rumqttc
pub struct MqttClient {
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    connect_timeout: Duration,
    client: Mutex<Option<AsyncClient>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl MqttClient {
    /// Create an unconnected client. Fails early on an unusable broker address.
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        configure_mqtt_options(&config)?;

        Ok(Self {
            config,
            reconnect_config: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            client: Mutex::new(None),
            event_loop_handle: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut link_rx: watch::Receiver<LinkState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                match &*link_rx.borrow_and_update() {
                    LinkState::Up => return Ok(()),
                    LinkState::Failed(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    LinkState::Connecting => {}
                }
                if link_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "Event loop stopped before ConnAck".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnAckTimeout(timeout)),
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>, MqttError> {
        let mut handle_guard = self.event_loop_handle.lock().await;
        if handle_guard
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return Err(MqttError::AlreadyConnected);
        }

        let mqtt_options = configure_mqtt_options(&self.config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (link_tx, link_rx) = watch::channel(LinkState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            broker = %self.config.broker_address,
            client_id = %self.config.client_id,
            "Connecting to MQTT broker"
        );

        let supervisor = Supervisor {
            client_id: self.config.client_id.clone(),
            event_loop,
            events_tx,
            link_tx,
            shutdown_rx,
            reconnect_config: self.reconnect_config.clone(),
        };
        let handle = tokio::spawn(supervisor.run());

        // Only a ConnAck counts as connected
        if let Err(e) = Self::wait_for_connection_confirmation(link_rx, self.connect_timeout).await
        {
            handle.abort();
            return Err(e);
        }

        *self.client.lock().await = Some(client);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        *handle_guard = Some(handle);

        info!(broker = %self.config.broker_address, "Connected to MQTT broker");
        Ok(events_rx)
    }

    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), MqttError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(MqttError::NotConnected)?;

        client
            .subscribe(pattern, to_mqtt_qos(qos))
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", pattern, qos = qos.level(), "Subscribe requested");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(MqttError::NotConnected)?;

        let size = payload.len();
        client
            .publish(topic, to_mqtt_qos(qos), retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", topic, size, retain, "Published message");
        Ok(())
    }

    async fn disconnect(&self, grace: Duration) -> Result<(), MqttError> {
        let Some(client) = self.client.lock().await.take() else {
            return Ok(());
        };

        // Mark the session as closing before DISCONNECT is queued, so the
        // broker dropping the socket afterwards is not taken for a lost link
        if let Some(shutdown_tx) = self.shutdown_tx.lock().await.take() {
            let _ = shutdown_tx.send(true);
        }

        let result = client
            .disconnect()
            .await
            .map_err(|e| MqttError::ConnectionFailed(Box::new(e)));

        // The event loop keeps polling until the broker closes the socket.
        // `client` stays alive until then so the request queue stays open.
        if let Some(mut handle) = self.event_loop_handle.lock().await.take() {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {
                    debug!("Event loop task shut down gracefully");
                }
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    debug!(
                        grace_ms = grace.as_millis() as u64,
                        "Broker kept the socket open past the grace period, aborting event loop"
                    );
                    handle.abort();
                }
            }
        }

        info!("MQTT client disconnected");
        result
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

/// Polls the rumqttc event loop and forwards what it sees
struct Supervisor {
    client_id: String,
    event_loop: EventLoop,
    events_tx: mpsc::Sender<TransportEvent>,
    link_tx: watch::Sender<LinkState>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect_config: ReconnectConfig,
}

impl Supervisor {
    async fn run(mut self) {
        debug!(client_id = %self.client_id, "Starting MQTT event loop");

        let mut established = false;
        let mut link_lost = false;
        let mut closing = false;
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed(), if !closing => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        debug!("Shutdown requested, draining until the broker closes the socket");
                        closing = true;
                    }
                }

                event_result = self.event_loop.poll() => {
                    let event = match event_result {
                        Ok(event) => event,
                        Err(e) => {
                            if closing || *self.shutdown_rx.borrow() {
                                debug!("Event loop closed during shutdown: {}", e);
                                break;
                            }
                            if !established {
                                error!(error = %e, "Connection to MQTT broker failed");
                                let _ = self.link_tx.send(LinkState::Failed(e.to_string()));
                                break;
                            }
                            if !link_lost {
                                link_lost = true;
                                warn!(error = %e, "Connection to MQTT broker lost");
                                if !Self::deliver(
                                    &self.events_tx,
                                    TransportEvent::ConnectionLost(e.to_string()),
                                )
                                .await
                                {
                                    break;
                                }
                            }

                            attempts = attempts.saturating_add(1);
                            let delay = self.reconnect_config.calculate_backoff_delay(attempts);
                            info!(
                                attempt = attempts,
                                delay_ms = delay.as_millis() as u64,
                                "Reconnecting to MQTT broker"
                            );
                            if !self.interruptible_sleep(delay).await {
                                break;
                            }
                            continue;
                        }
                    };

                    match EventRouter::route(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            attempts = 0;
                            established = true;
                            let _ = self.link_tx.send(LinkState::Up);
                            if link_lost {
                                link_lost = false;
                                info!("Reconnected to MQTT broker");
                                if !Self::deliver(
                                    &self.events_tx,
                                    TransportEvent::Reconnected,
                                )
                                .await
                                {
                                    break;
                                }
                            }
                        }
                        EventRoute::MessageReceived(message) => {
                            debug!(target: "mqtt_transport", topic = %message.topic, "Received MQTT message");
                            if !Self::deliver(
                                &self.events_tx,
                                TransportEvent::Message(message),
                            )
                            .await
                            {
                                break;
                            }
                        }
                        EventRoute::Disconnected => {
                            if closing || *self.shutdown_rx.borrow() {
                                break;
                            }
                            if !link_lost {
                                link_lost = true;
                                warn!("MQTT broker closed the session");
                                let reason = "broker sent disconnect".to_string();
                                if !Self::deliver(
                                    &self.events_tx,
                                    TransportEvent::ConnectionLost(reason),
                                )
                                .await
                                {
                                    break;
                                }
                            }
                        }
                        EventRoute::SubscriptionResult { packet_id, rejected } => {
                            if rejected > 0 {
                                warn!(packet_id, rejected, "Broker rejected subscription");
                            } else {
                                debug!(target: "mqtt_transport", packet_id, "Subscription confirmed");
                            }
                        }
                        EventRoute::DisconnectSent => {
                            debug!("Disconnect queued, waiting for the broker to close the socket");
                        }
                        EventRoute::Infrastructure => {}
                    }
                }
            }
        }

        debug!(client_id = %self.client_id, "MQTT event loop stopped");
    }

    /// Forward an event; false once the receiving side is gone
    async fn deliver(events_tx: &mpsc::Sender<TransportEvent>, event: TransportEvent) -> bool {
        if events_tx.send(event).await.is_err() {
            debug!("Transport event receiver dropped, stopping event loop");
            return false;
        }
        true
    }

    /// Sleep unless shutdown is requested first. Returns false on shutdown.
    async fn interruptible_sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            changed = self.shutdown_rx.changed() => {
                if changed.is_err() || *self.shutdown_rx.borrow() {
                    info!("Shutdown requested during reconnection delay");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> MqttSection {
        // Port 1 on loopback refuses connections immediately
        MqttSection {
            broker_address: "127.0.0.1:1".to_string(),
            client_id: "client-test".to_string(),
            ..MqttSection::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_address() {
        let config = MqttSection {
            broker_address: "http://broker:1883".to_string(),
            ..MqttSection::default()
        };
        assert!(matches!(
            MqttClient::new(config),
            Err(MqttError::InvalidBrokerAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        // Arrange
        let client = MqttClient::new(unreachable_config()).unwrap();

        // Act
        let result = client
            .publish("iot-car/car-1/command", QoS::AtLeastOnce, false, b"{}".to_vec())
            .await;

        // Assert
        assert!(matches!(result, Err(MqttError::NotConnected)));
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_fails() {
        let client = MqttClient::new(unreachable_config()).unwrap();
        let result = client.subscribe("iot-car/+/status", QoS::AtLeastOnce).await;
        assert!(matches!(result, Err(MqttError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_is_noop() {
        let client = MqttClient::new(unreachable_config()).unwrap();
        assert!(client.disconnect(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        // Arrange
        let client = MqttClient::new(unreachable_config())
            .unwrap()
            .with_connect_timeout(Duration::from_secs(5));

        // Act
        let result = client.connect().await;

        // Assert
        let err = result.expect_err("connect should fail without a broker");
        assert!(matches!(
            err,
            MqttError::ConnectionFailedStr(_) | MqttError::ConnAckTimeout(_)
        ));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_times_out() {
        let (_link_tx, link_rx) = watch::channel(LinkState::Connecting);
        let result =
            MqttClient::wait_for_connection_confirmation(link_rx, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(MqttError::ConnAckTimeout(_))));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_sees_up() {
        let (link_tx, link_rx) = watch::channel(LinkState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = link_tx.send(LinkState::Up);
        });

        let result =
            MqttClient::wait_for_connection_confirmation(link_rx, Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_reports_failure() {
        let (link_tx, link_rx) = watch::channel(LinkState::Connecting);
        link_tx
            .send(LinkState::Failed("connection refused".to_string()))
            .unwrap();

        let result =
            MqttClient::wait_for_connection_confirmation(link_rx, Duration::from_secs(1)).await;
        match result {
            Err(MqttError::ConnectionFailedStr(reason)) => assert_eq!(reason, "connection refused"),
            other => panic!("Expected ConnectionFailedStr, got {other:?}"),
        }
    }
}
