//! Fleet Command Utility
//!
//! Sends a single drive command to one car, or to the whole fleet on the
//! broadcast topic, then disconnects.
//!
//! ## Usage
//!
//! ```bash
//! # One car
//! fleet-command --device-id car-7 forward
//!
//! # Every car
//! fleet-command --broadcast stop
//!
//! # Another broker
//! MQTT_BROKER_ADDRESS=mqtts://broker.example.com fleet-command --device-id car-7 left
//! ```

use clap::Parser;
use iot_car_backend::config::AppConfig;
use iot_car_backend::error::{BackendError, BackendResult};
use iot_car_backend::lifecycle::ConnectionController;
use iot_car_backend::observability::init_default_logging;
use iot_car_backend::protocol::{Command, CommandAction};
use iot_car_backend::routing::MessageRouter;
use iot_car_backend::transport::mqtt::MqttClient;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "fleet-command",
    about = "Send a drive command to one car or to the whole fleet"
)]
struct Args {
    /// Action to send: forward, backward, left, right or stop
    action: CommandAction,

    /// Target car
    #[arg(long, required_unless_present = "broadcast", conflicts_with = "broadcast")]
    device_id: Option<String>,

    /// Send to every car on the fleet broadcast topic
    #[arg(long)]
    broadcast: bool,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_default_logging(args.verbose);

    if let Err(e) = send(args).await {
        error!("Failed to send command: {}", e.report());
        process::exit(1);
    }
}

async fn send(args: Args) -> BackendResult<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;

    // A second session with the backend's client id would take over its session
    config.mqtt.client_id = format!(
        "{}-cmd-{}",
        config.mqtt.client_id,
        &Uuid::new_v4().simple().to_string()[..8]
    );

    let transport = MqttClient::new(config.mqtt.clone())?;
    let controller = ConnectionController::new(transport, Arc::new(MessageRouter::builder().build()))
        .with_disconnect_grace(config.mqtt.disconnect_grace())
        .with_broadcast_topic(config.mqtt.topic_fleet_broadcast.clone());

    controller.connect().await?;

    let result = match (&args.device_id, args.broadcast) {
        (_, true) => {
            let command = Command::new("fleet", args.action);
            controller.broadcast(&command).await
        }
        (Some(device_id), false) => {
            let command = Command::new(device_id.as_str(), args.action);
            controller.publish_command(&command).await
        }
        (None, false) => {
            controller.disconnect().await;
            return Err(BackendError::internal_error(
                "either --device-id or --broadcast is required",
            ));
        }
    };

    controller.disconnect().await;
    result?;

    info!("Done");
    Ok(())
}
