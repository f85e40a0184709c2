//! Health check HTTP server for container orchestration
//!
//! Serves the connection state and metrics of a running backend:
//!
//! - `GET /health` - overall status with per-check detail
//! - `GET /ready` - 200 once the broker connection can carry traffic
//! - `GET /live` - 200 while the process is up
//! - `GET /metrics` - full [`MetricsSnapshot`](super::metrics::MetricsSnapshot) as JSON

use crate::error::BackendError;
use crate::lifecycle::ConnectionState;
use crate::observability::metrics::{current_timestamp, MetricsCollector};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    service_id: String,
    port: u16,
    metrics: Arc<MetricsCollector>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl HealthServer {
    pub fn new(
        service_id: impl Into<String>,
        port: u16,
        metrics: Arc<MetricsCollector>,
        state_rx: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            port,
            metrics,
            state_rx,
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Bind the port and serve in a background task.
    ///
    /// Binding happens before this returns, so a port that is already in use
    /// is reported here rather than inside the task.
    pub fn spawn(self: Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>), BackendError> {
        let port = self.port;
        let (addr, server) = warp::serve(self.routes())
            .try_bind_ephemeral(([0, 0, 0, 0], port))
            .map_err(|e| BackendError::health(format!("Failed to bind port {port}: {e}")))?;

        tracing::info!(%addr, "Health server listening");
        Ok((addr, tokio::spawn(server)))
    }

    /// All endpoints as one filter
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let with_server = warp::any().map(move || Arc::clone(&self));

        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server.clone())
            .and_then(health_handler);

        let ready = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server.clone())
            .and_then(ready_handler);

        let live = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(live_handler);

        let metrics = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server)
            .and_then(metrics_handler);

        health.or(ready).or(live).or(metrics)
    }

    fn health_status(&self) -> HealthStatus {
        let now = current_timestamp();
        let state = self.state();
        let snapshot = self.metrics.get_metrics();

        let mut checks = BTreeMap::new();
        checks.insert("mqtt".to_string(), mqtt_check(state, now));
        checks.insert("subscriptions".to_string(), subscription_check(state, now));

        let status = if checks.values().all(|check| check.status == "healthy") {
            "healthy"
        } else if state.can_publish() {
            "degraded"
        } else {
            "unhealthy"
        };

        HealthStatus {
            status: status.to_string(),
            timestamp: now,
            service_id: self.service_id.clone(),
            connection_state: state.as_str().to_string(),
            uptime_seconds: snapshot.lifecycle.uptime_seconds,
            checks,
        }
    }
}

fn mqtt_check(state: ConnectionState, now: u64) -> HealthCheck {
    let (status, message) = if state.can_publish() {
        ("healthy", "Connected to broker".to_string())
    } else {
        ("unhealthy", format!("Broker connection is {state}"))
    };

    HealthCheck {
        status: status.to_string(),
        message: Some(message),
        last_check: now,
    }
}

fn subscription_check(state: ConnectionState, now: u64) -> HealthCheck {
    let (status, message) = match state {
        ConnectionState::Subscribed => ("healthy", "All topic patterns subscribed"),
        ConnectionState::Connected => ("degraded", "One or more subscriptions failed"),
        _ => ("unhealthy", "Not subscribed"),
    };

    HealthCheck {
        status: status.to_string(),
        message: Some(message.to_string()),
        last_check: now,
    }
}

async fn health_handler(server: Arc<HealthServer>) -> Result<impl warp::Reply, Infallible> {
    let status = server.health_status();
    let code = if status.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(warp::reply::with_status(warp::reply::json(&status), code))
}

async fn ready_handler(server: Arc<HealthServer>) -> Result<impl warp::Reply, Infallible> {
    let state = server.state();
    let response = ReadinessResponse {
        ready: state.can_publish(),
        state: state.as_str().to_string(),
        timestamp: current_timestamp(),
    };
    let code = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(warp::reply::with_status(warp::reply::json(&response), code))
}

async fn live_handler() -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&LivenessResponse {
        alive: true,
        timestamp: current_timestamp(),
    }))
}

async fn metrics_handler(server: Arc<HealthServer>) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&server.metrics.get_metrics()))
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    service_id: String,
    connection_state: String,
    uptime_seconds: u64,
    checks: BTreeMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    state: String,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}
