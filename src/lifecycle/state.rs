//! Pure connection state machine
//!
//! `next_state` is the only place that decides transitions. Events that do
//! not apply to the current state leave it unchanged.

use std::fmt;
use tracing::{debug, error, info, warn};

/// Connection state owned by the lifecycle controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Failed => "failed",
        }
    }

    /// Publishing needs a live broker session
    pub fn can_publish(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Subscribed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    ConnectRequested,
    TransportConnected,
    TransportFailed(String),
    SubscribeSucceeded,
    SubscribeFailed { failed: usize },
    ConnectionLost(String),
    Reconnected,
    DisconnectRequested,
}

/// Determine next state after a lifecycle event (pure function)
pub fn next_state(current: ConnectionState, event: &LifecycleEvent) -> ConnectionState {
    use ConnectionState::*;

    match (current, event) {
        (Disconnected | Failed, LifecycleEvent::ConnectRequested) => Connecting,
        (Connecting, LifecycleEvent::TransportConnected) => Connected,
        (Connecting, LifecycleEvent::TransportFailed(_)) => Failed,
        (Connected | Subscribed, LifecycleEvent::SubscribeSucceeded) => Subscribed,
        (Connected, LifecycleEvent::SubscribeFailed { .. }) => Connected,
        (Connected | Subscribed, LifecycleEvent::ConnectionLost(_)) => Connecting,
        (Connecting, LifecycleEvent::Reconnected) => Connected,
        (_, LifecycleEvent::DisconnectRequested) => Disconnected,
        (state, _) => state,
    }
}

/// Log a transition at a level matching its severity
pub fn log_state_transition(from: ConnectionState, to: ConnectionState, event: &LifecycleEvent) {
    match event {
        LifecycleEvent::TransportFailed(reason) => {
            error!(from = %from, to = %to, reason = %reason, "Broker connection failed");
        }
        LifecycleEvent::ConnectionLost(reason) => {
            warn!(from = %from, to = %to, reason = %reason, "Broker connection lost");
        }
        LifecycleEvent::SubscribeFailed { failed } => {
            warn!(from = %from, to = %to, failed, "Subscription incomplete");
        }
        LifecycleEvent::ConnectRequested => {
            debug!(from = %from, to = %to, "Connection state changed");
        }
        _ => {
            info!(from = %from, to = %to, "Connection state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path() {
        let mut state = Disconnected;
        for (event, expected) in [
            (LifecycleEvent::ConnectRequested, Connecting),
            (LifecycleEvent::TransportConnected, Connected),
            (LifecycleEvent::SubscribeSucceeded, Subscribed),
            (LifecycleEvent::DisconnectRequested, Disconnected),
        ] {
            state = next_state(state, &event);
            assert_eq!(state, expected, "after {event:?}");
        }
    }

    #[test]
    fn test_connect_failure() {
        let state = next_state(Connecting, &LifecycleEvent::TransportFailed("refused".into()));
        assert_eq!(state, Failed);

        // Failed can be retried
        assert_eq!(next_state(Failed, &LifecycleEvent::ConnectRequested), Connecting);
    }

    #[test]
    fn test_subscribe_failure_stays_connected() {
        assert_eq!(
            next_state(Connected, &LifecycleEvent::SubscribeFailed { failed: 1 }),
            Connected
        );
    }

    #[test]
    fn test_loss_and_reconnect() {
        let lost = LifecycleEvent::ConnectionLost("io error".into());
        assert_eq!(next_state(Subscribed, &lost), Connecting);
        assert_eq!(next_state(Connected, &lost), Connecting);
        assert_eq!(next_state(Connecting, &LifecycleEvent::Reconnected), Connected);
        assert_eq!(
            next_state(Connected, &LifecycleEvent::SubscribeSucceeded),
            Subscribed
        );
    }

    #[test]
    fn test_disconnect_from_any_state() {
        for state in [Disconnected, Connecting, Connected, Subscribed, Failed] {
            assert_eq!(
                next_state(state, &LifecycleEvent::DisconnectRequested),
                Disconnected
            );
        }
    }

    #[test]
    fn test_irrelevant_events_are_ignored() {
        assert_eq!(next_state(Connecting, &LifecycleEvent::ConnectRequested), Connecting);
        assert_eq!(next_state(Subscribed, &LifecycleEvent::ConnectRequested), Subscribed);
        assert_eq!(next_state(Disconnected, &LifecycleEvent::Reconnected), Disconnected);
        assert_eq!(
            next_state(Disconnected, &LifecycleEvent::TransportConnected),
            Disconnected
        );
        assert_eq!(
            next_state(Disconnected, &LifecycleEvent::ConnectionLost("x".into())),
            Disconnected
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(Connected.can_publish());
        assert!(Subscribed.can_publish());
        assert!(!Connecting.can_publish());
        assert!(!Disconnected.can_publish());
        assert_eq!(Subscribed.to_string(), "subscribed");
    }
}
