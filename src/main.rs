//! IoT Car Backend - Main Entry Point
//!
//! Connects to the broker, subscribes to the fleet's telemetry and status
//! topics and logs every decoded message until SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use iot_car_backend::config::AppConfig;
use iot_car_backend::error::{BackendError, BackendResult};
use iot_car_backend::handlers::{StatusHandler, TelemetryHandler};
use iot_car_backend::lifecycle::ConnectionController;
use iot_car_backend::lifecycle_span;
use iot_car_backend::observability::{init_default_logging, HealthServer, MetricsCollector};
use iot_car_backend::routing::fleet_router;
use iot_car_backend::transport::mqtt::MqttClient;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, Instrument};

/// Backend for a fleet of MQTT-connected cars
#[derive(Parser)]
#[command(name = "iot-car-backend")]
#[command(about = "Routes telemetry and status messages from a fleet of IoT cars")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and route messages until signalled
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting IoT car backend v{}", env!("CARGO_PKG_VERSION"));

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", BackendError::from(e).report());
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => {
            let span = lifecycle_span!(phase = "run", client_id = %config.mqtt.client_id);
            run_backend(config).instrument(span).await
        }
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e.report());
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_backend(config: AppConfig) -> BackendResult<()> {
    info!(
        broker = %config.mqtt.broker_address,
        client_id = %config.mqtt.client_id,
        "Application starting"
    );

    let metrics = Arc::new(MetricsCollector::new());
    let router = fleet_router(
        &config.mqtt,
        TelemetryHandler::new(),
        StatusHandler::new(),
        Arc::clone(&metrics),
    )?;

    let transport = MqttClient::new(config.mqtt.clone())?;
    let controller = ConnectionController::new(transport, Arc::new(router))
        .with_disconnect_grace(config.mqtt.disconnect_grace())
        .with_broadcast_topic(config.mqtt.topic_fleet_broadcast.clone());

    let health_task = match config.health.port {
        Some(port) => {
            let server = Arc::new(HealthServer::new(
                config.mqtt.client_id.clone(),
                port,
                Arc::clone(&metrics),
                controller.subscribe_state(),
            ));
            let (_, handle) = server.spawn()?;
            Some(handle)
        }
        None => None,
    };

    controller.connect().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| BackendError::internal_error(format!("Failed to install SIGINT handler: {e}")))?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| BackendError::internal_error(format!("Failed to install SIGTERM handler: {e}")))?;

    info!("Backend is running and waiting for fleet messages...");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    controller.disconnect().await;
    if let Some(handle) = health_task {
        handle.abort();
    }

    let snapshot = metrics.get_metrics();
    info!(
        received = snapshot.routing.messages_received,
        dispatched = snapshot.routing.messages_dispatched,
        unmatched = snapshot.routing.messages_unmatched,
        handler_failures = snapshot.routing.handler_failures,
        "Final routing statistics"
    );
    Ok(())
}

fn handle_config_command(config: &AppConfig, show: bool) -> BackendResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| BackendError::internal_error(format!("Failed to render configuration: {e}")))?;
        println!("Current configuration:");
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
