//! Connection lifecycle controller
//!
//! Drives a [`Transport`] through connect, subscribe, receive, reconnect and
//! disconnect. The controller owns the connection state; a single dispatch
//! task reads transport events and hands messages to the router, so routing
//! is serialized and keeps arrival order.

use super::state::{log_state_transition, next_state, ConnectionState, LifecycleEvent};
use crate::message_span;
use crate::observability::metrics::MetricsCollector;
use crate::protocol::{Command, QoS, TopicBuilder};
use crate::routing::MessageRouter;
use crate::transport::{Transport, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default bound on a graceful disconnect
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Cannot connect while {state}")]
    InvalidState { state: ConnectionState },
    #[error("Transport failed to connect")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("Failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Transport failed to publish")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// State shared between the controller and its dispatch task
struct Core<T> {
    transport: T,
    router: Arc<MessageRouter>,
    state_tx: watch::Sender<ConnectionState>,
    metrics: Arc<MetricsCollector>,
}

impl<T: Transport> Core<T> {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Apply an event. Returns the new state if it changed.
    fn apply(&self, event: LifecycleEvent) -> Option<ConnectionState> {
        self.transition(event).map(|(_, to)| to)
    }

    /// Like [`Core::apply`], but also returns the state that was left
    fn transition(&self, event: LifecycleEvent) -> Option<(ConnectionState, ConnectionState)> {
        let mut changed = None;
        self.state_tx.send_if_modified(|state| {
            let next = next_state(*state, &event);
            if next == *state {
                return false;
            }
            log_state_transition(*state, next, &event);
            changed = Some((*state, next));
            *state = next;
            true
        });

        if let Some((_, to)) = changed {
            self.metrics.state_changed(to.as_str());
        } else {
            debug!(state = %self.state(), event = ?event, "Event does not change state");
        }
        changed
    }

    /// Subscribe every pattern in the routing table, in order
    async fn subscribe_all(&self) {
        let mut failed = 0;

        for subscription in self.router.subscriptions() {
            let pattern = subscription.pattern().to_string();
            match self.transport.subscribe(&pattern, subscription.qos()).await {
                Ok(()) => {
                    info!(
                        pattern = %pattern,
                        qos = subscription.qos().level(),
                        handler = subscription.handler_name(),
                        "Subscribed"
                    );
                }
                Err(e) => {
                    failed += 1;
                    self.metrics.mqtt_subscription_failed();
                    error!(pattern = %pattern, error = %e, "Failed to subscribe");
                }
            }
        }

        if failed == 0 {
            self.apply(LifecycleEvent::SubscribeSucceeded);
        } else {
            self.apply(LifecycleEvent::SubscribeFailed { failed });
        }
    }

    /// Consume transport events until the transport closes the channel
    async fn dispatch(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message(message) => {
                    let span = message_span!(topic = %message.topic, bytes = message.payload.len());
                    span.in_scope(|| self.router.on_message(&message.topic, &message.payload));
                }
                TransportEvent::ConnectionLost(reason) => {
                    if self.apply(LifecycleEvent::ConnectionLost(reason)).is_some() {
                        self.metrics.mqtt_connection_lost();
                    }
                }
                TransportEvent::Reconnected => {
                    if self.apply(LifecycleEvent::Reconnected).is_some() {
                        self.metrics.mqtt_connection_established();
                        self.subscribe_all().await;
                    }
                }
            }
        }
        debug!("Transport event stream ended");
    }
}

/// Owns the connection state machine for one transport
pub struct ConnectionController<T: Transport + 'static> {
    core: Arc<Core<T>>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
    disconnect_grace: Duration,
    broadcast_topic: String,
}

impl<T: Transport + 'static> ConnectionController<T> {
    pub fn new(transport: T, router: Arc<MessageRouter>) -> Self {
        let metrics = router.metrics().clone();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            core: Arc::new(Core {
                transport,
                router,
                state_tx,
                metrics,
            }),
            dispatch_handle: Mutex::new(None),
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            broadcast_topic: crate::config::DEFAULT_TOPIC_FLEET_BROADCAST.to_string(),
        }
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    pub fn with_broadcast_topic(mut self, topic: impl Into<String>) -> Self {
        self.broadcast_topic = topic.into();
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.state_tx.subscribe()
    }

    pub fn transport(&self) -> &T {
        &self.core.transport
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.core.router
    }

    /// Connect and subscribe the routing table.
    ///
    /// Returns once the transport has connected or failed. Subscription
    /// failures are logged and leave the state at `Connected`.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if self.core.apply(LifecycleEvent::ConnectRequested).is_none() {
            return Err(ConnectError::InvalidState {
                state: self.state(),
            });
        }
        self.core.metrics.mqtt_connection_attempt();

        let events = match self.core.transport.connect().await {
            Ok(events) => events,
            Err(e) => {
                self.core
                    .apply(LifecycleEvent::TransportFailed(e.to_string()));
                self.core.metrics.mqtt_connection_failed();
                return Err(ConnectError::Transport(Box::new(e)));
            }
        };

        if self.core.apply(LifecycleEvent::TransportConnected).is_none() {
            // disconnect() ran while the transport was connecting
            if let Err(e) = self.core.transport.disconnect(self.disconnect_grace).await {
                warn!(error = %e, "Failed to close abandoned connection");
            }
            return Err(ConnectError::InvalidState {
                state: self.state(),
            });
        }
        self.core.metrics.mqtt_connection_established();

        let handle = tokio::spawn(Arc::clone(&self.core).dispatch(events));
        if let Some(previous) = self.dispatch_handle.lock().await.replace(handle) {
            previous.abort();
        }

        self.core.subscribe_all().await;
        Ok(())
    }

    /// Disconnect gracefully. Errors are logged, never returned. A second
    /// call is a no-op.
    pub async fn disconnect(&self) {
        let Some((from, _)) = self.core.transition(LifecycleEvent::DisconnectRequested) else {
            debug!("Already disconnected");
            return;
        };
        if from == ConnectionState::Failed {
            // A failed connect left nothing open on the transport
            debug!("Cleared failed connection state");
            return;
        }

        if let Err(e) = self.core.transport.disconnect(self.disconnect_grace).await {
            warn!(error = %e, "Transport disconnect failed");
        }

        if let Some(mut handle) = self.dispatch_handle.lock().await.take() {
            if tokio::time::timeout(self.disconnect_grace, &mut handle)
                .await
                .is_err()
            {
                debug!("Dispatch task still running after grace period, aborting");
                handle.abort();
            }
        }

        self.core.metrics.mqtt_disconnected();
        info!("Disconnected from broker");
    }

    /// Publish raw bytes. Fails immediately unless connected.
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        let state = self.state();
        if !state.can_publish() {
            self.core.metrics.mqtt_publish_failed();
            return Err(PublishError::NotConnected { state });
        }

        if let Err(e) = self
            .core
            .transport
            .publish(topic, qos, retain, payload)
            .await
        {
            self.core.metrics.mqtt_publish_failed();
            return Err(PublishError::Transport(Box::new(e)));
        }

        self.core.metrics.mqtt_message_published();
        Ok(())
    }

    /// Send a command to the device it names, at QoS 1, not retained
    pub async fn publish_command(&self, command: &Command) -> Result<(), PublishError> {
        let topic = TopicBuilder::command_topic(&command.device_id);
        let payload = serde_json::to_vec(command)?;
        self.publish(&topic, QoS::AtLeastOnce, false, payload).await?;

        info!(
            device_id = %command.device_id,
            action = %command.action,
            command_id = %command.command_id,
            "Command sent"
        );
        Ok(())
    }

    /// Send a command to the whole fleet on the broadcast topic
    pub async fn broadcast(&self, command: &Command) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(command)?;
        self.publish(&self.broadcast_topic, QoS::AtLeastOnce, false, payload)
            .await?;

        info!(
            topic = %self.broadcast_topic,
            action = %command.action,
            command_id = %command.command_id,
            "Command broadcast to fleet"
        );
        Ok(())
    }
}

impl<T: Transport + 'static> Drop for ConnectionController<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch_handle.get_mut().take() {
            handle.abort();
        }
    }
}
