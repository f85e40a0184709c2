//! Thread-safe metrics collection
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! message routing, MQTT transport and connection lifecycle statistics.
//! A collector is shared by `Arc` between the router, the lifecycle
//! controller and the health server.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Thread-safe metrics collector using atomics and mutexes
#[derive(Debug)]
pub struct MetricsCollector {
    // Routing metrics (atomic for high frequency)
    messages_received: AtomicU64,
    messages_dispatched: AtomicU64,
    messages_unmatched: AtomicU64,
    handler_failures: AtomicU64,
    last_message_at: AtomicU64,

    // Per-handler statistics (mutex protected for complex data)
    handler_stats: Mutex<HashMap<String, HandlerStats>>,

    // MQTT metrics
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    subscription_failures: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    connection_start_time: AtomicU64,

    // Lifecycle metrics
    connection_state: Mutex<String>,
    state_transitions: AtomicU64,
    uptime_start: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            messages_unmatched: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            last_message_at: AtomicU64::new(0),
            handler_stats: Mutex::new(HashMap::new()),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            subscription_failures: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            connection_state: Mutex::new("disconnected".to_string()),
            state_transitions: AtomicU64::new(0),
            uptime_start: current_timestamp(),
        }
    }

    // Routing

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_message_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn message_dispatched(&self, handler: &str) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
        self.update_handler(handler, |stats| stats.dispatched += 1);
    }

    pub fn message_unmatched(&self) {
        self.messages_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_failed(&self, handler: &str) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        self.update_handler(handler, |stats| stats.failures += 1);
    }

    fn update_handler<F: FnOnce(&mut HandlerStats)>(&self, handler: &str, update: F) {
        if let Ok(mut stats) = self.handler_stats.lock() {
            update(stats.entry(handler.to_string()).or_default());
        }
    }

    // MQTT

    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_disconnected(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_subscription_failed(&self) {
        self.subscription_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle

    pub fn state_changed(&self, new_state: &str) {
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut state) = self.connection_state.lock() {
            *state = new_state.to_string();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    /// Calculate connection duration (pure function)
    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if !self.mqtt_connected.load(Ordering::Relaxed) {
            return 0;
        }
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();

        let handlers = self
            .handler_stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default();
        let current_state = self
            .connection_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            routing: RoutingMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
                messages_unmatched: self.messages_unmatched.load(Ordering::Relaxed),
                handler_failures: self.handler_failures.load(Ordering::Relaxed),
                last_message_at: self.last_message_at.load(Ordering::Relaxed),
                handlers,
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                subscription_failures: self.subscription_failures.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            lifecycle: LifecycleMetrics {
                current_state,
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.uptime_start),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct HandlerStats {
    pub dispatched: u64,
    pub failures: u64,
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub routing: RoutingMetrics,
    pub mqtt: MqttMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct RoutingMetrics {
    pub messages_received: u64,
    pub messages_dispatched: u64,
    pub messages_unmatched: u64,
    pub handler_failures: u64,
    /// Unix seconds of the last inbound message, 0 if none yet
    pub last_message_at: u64,
    pub handlers: HashMap<String, HandlerStats>,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub subscription_failures: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub state_transitions: u64,
    pub uptime_seconds: u64,
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
