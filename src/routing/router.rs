//! Inbound message routing
//!
//! The router owns the subscription table: an ordered list of
//! (pattern, QoS, handler) entries fixed when the router is built. Each
//! inbound message goes to the handler of the **first** entry whose pattern
//! matches the topic, in registration order. Later entries that would also
//! match are not consulted.
//!
//! # Example
//!
//! ```rust
//! use iot_car_backend::handlers::{StatusHandler, TelemetryHandler};
//! use iot_car_backend::protocol::QoS;
//! use iot_car_backend::routing::{MessageRouter, RouteOutcome};
//!
//! let router = MessageRouter::builder()
//!     .route("iot-car/+/telemetry", QoS::AtLeastOnce, TelemetryHandler::new())?
//!     .route("iot-car/+/status", QoS::AtLeastOnce, StatusHandler::new())?
//!     .build();
//!
//! let outcome = router.on_message("iot-car/car-1/status", br#"{"status":"online"}"#);
//! assert!(matches!(outcome, RouteOutcome::Handled { handler: "status", .. }));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::handlers::MessageHandler;
use crate::observability::metrics::MetricsCollector;
use crate::protocol::{matches, QoS, Topic, TopicPattern, TopicPatternError};
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

/// A pattern bound to the handler that receives its messages
#[derive(Clone)]
pub struct Subscription {
    pattern: TopicPattern,
    qos: QoS,
    handler: Arc<dyn MessageHandler>,
}

impl Subscription {
    pub fn new(pattern: TopicPattern, qos: QoS, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            pattern,
            qos,
            handler,
        }
    }

    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler.name()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern.to_string())
            .field("qos", &self.qos)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// What happened to a routed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The handler of subscription `index` processed the payload
    Handled { index: usize, handler: &'static str },
    /// The handler of subscription `index` rejected the payload
    HandlerFailed { index: usize, handler: &'static str },
    /// No subscription matched; the message was dropped
    Unmatched,
}

/// Dispatches inbound messages to the first matching subscription
#[derive(Debug)]
pub struct MessageRouter {
    subscriptions: Vec<Subscription>,
    metrics: Arc<MetricsCollector>,
}

impl MessageRouter {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Subscriptions in registration order
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// First subscription matching `topic`, with its index (pure function)
    pub fn find(&self, topic: &str) -> Option<(usize, &Subscription)> {
        let topic = Topic::parse(topic);
        self.subscriptions
            .iter()
            .enumerate()
            .find(|(_, subscription)| matches(&topic, &subscription.pattern))
    }

    /// Route one message. Handler failures and unmatched topics are logged
    /// and counted here; nothing is propagated to the caller.
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        self.metrics.message_received();

        let Some((index, subscription)) = self.find(topic) else {
            warn!(topic, "Unrecognized topic, dropping message");
            self.metrics.message_unmatched();
            return RouteOutcome::Unmatched;
        };

        let handler = subscription.handler.name();
        self.metrics.message_dispatched(handler);

        match subscription.handler.handle(payload) {
            Ok(()) => RouteOutcome::Handled { index, handler },
            Err(e) => {
                error!(topic, handler, error = %e, "Failed to handle message");
                self.metrics.handler_failed(handler);
                RouteOutcome::HandlerFailed { index, handler }
            }
        }
    }
}

/// Builds the immutable subscription table
#[derive(Default)]
pub struct RouterBuilder {
    subscriptions: Vec<Subscription>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RouterBuilder {
    /// Register `handler` for `pattern`. Order of calls is match priority.
    pub fn route<H>(self, pattern: &str, qos: QoS, handler: H) -> Result<Self, TopicPatternError>
    where
        H: MessageHandler + 'static,
    {
        let pattern = TopicPattern::parse(pattern)?;
        Ok(self.subscribe(Subscription::new(pattern, qos, Arc::new(handler))))
    }

    pub fn subscribe(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Finish the table, warning about patterns that shadow later ones
    pub fn build(self) -> MessageRouter {
        for (i, earlier) in self.subscriptions.iter().enumerate() {
            for later in &self.subscriptions[i + 1..] {
                if earlier.pattern.overlaps(&later.pattern) {
                    warn!(
                        first = %earlier.pattern,
                        shadowed = %later.pattern,
                        handler = earlier.handler_name(),
                        "Overlapping subscriptions, topics matching both go to the first"
                    );
                }
            }
        }

        MessageRouter {
            subscriptions: self.subscriptions,
            metrics: self.metrics.unwrap_or_default(),
        }
    }
}
