//! End-to-end message flow: transport event -> dispatch -> router -> handler
//!
//! Uses the standard fleet routing table over the mock transport and reads
//! decoded records from the handlers' sinks.


use iot_car_backend::protocol::{DeviceStatus, QoS};
use std::time::Duration;
use test_helpers::{fleet_harness, recv_within, STATUS_SAMPLE, TELEMETRY_SAMPLE};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_telemetry_sample_reaches_handler() {
    // Arrange
    let mut harness = fleet_harness();
    harness.controller.connect().await.unwrap();

    // Act
    assert!(
        harness
            .transport
            .deliver("iot-car/car-7/telemetry", TELEMETRY_SAMPLE)
            .await
    );

    // Assert
    let telemetry = recv_within(&mut harness.telemetry_rx, WAIT)
        .await
        .expect("telemetry record");
    assert_eq!(telemetry.device_id, "car-7");
    assert_eq!(telemetry.battery, 80);
    assert_eq!(telemetry.distance_front, 30);
    assert_eq!(telemetry.current_action, "forward");

    let routing = harness.metrics.get_metrics().routing;
    assert_eq!(routing.messages_dispatched, 1);
    assert_eq!(routing.handlers["telemetry"].dispatched, 1);
}

#[tokio::test]
async fn test_status_routed_to_status_handler() {
    let mut harness = fleet_harness();
    harness.controller.connect().await.unwrap();

    harness
        .transport
        .deliver("iot-car/car-7/status", STATUS_SAMPLE)
        .await;

    let status = recv_within(&mut harness.status_rx, WAIT)
        .await
        .expect("status record");
    assert_eq!(status.device_id, "car-7");
    assert_eq!(status.status, DeviceStatus::Online);
    assert!(harness.telemetry_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_decode_failure_does_not_stop_later_messages() {
    // Arrange
    let mut harness = fleet_harness();
    harness.controller.connect().await.unwrap();

    // Act
    harness
        .transport
        .deliver("iot-car/car-7/telemetry", b"{not json")
        .await;
    harness
        .transport
        .deliver("iot-car/car-7/telemetry", TELEMETRY_SAMPLE)
        .await;

    // Assert
    let telemetry = recv_within(&mut harness.telemetry_rx, WAIT)
        .await
        .expect("second message still decoded");
    assert_eq!(telemetry.battery, 80);

    let routing = harness.metrics.get_metrics().routing;
    assert_eq!(routing.messages_received, 2);
    assert_eq!(routing.handler_failures, 1);
    assert_eq!(routing.handlers["telemetry"].failures, 1);
}

#[tokio::test]
async fn test_unknown_topic_dropped_and_flow_continues() {
    let mut harness = fleet_harness();
    harness.controller.connect().await.unwrap();

    harness
        .transport
        .deliver("iot-car/car-7/diagnostics", b"{}")
        .await;
    harness
        .transport
        .deliver("iot-car/car-8/telemetry", TELEMETRY_SAMPLE)
        .await;

    assert!(recv_within(&mut harness.telemetry_rx, WAIT).await.is_some());
    assert_eq!(harness.metrics.get_metrics().routing.messages_unmatched, 1);
}

#[tokio::test]
async fn test_messages_processed_in_arrival_order() {
    let mut harness = fleet_harness();
    harness.controller.connect().await.unwrap();

    for battery in [90, 80, 70] {
        let payload = format!(
            r#"{{"device_id":"car-1","timestamp":0,"battery":{battery},"distance_front":0,"temperature":0,"current_action":"stop","wifi_rssi":0}}"#
        );
        harness
            .transport
            .deliver("iot-car/car-1/telemetry", payload.as_bytes())
            .await;
    }

    let mut seen = Vec::new();
    while seen.len() < 3 {
        match recv_within(&mut harness.telemetry_rx, WAIT).await {
            Some(telemetry) => seen.push(telemetry.battery),
            None => break,
        }
    }
    assert_eq!(seen, vec![90, 80, 70]);
}

#[tokio::test]
async fn test_command_round_trip_topics() {
    let harness = fleet_harness();
    harness.controller.connect().await.unwrap();

    let command = iot_car_backend::protocol::Command::new(
        "car-7",
        iot_car_backend::protocol::CommandAction::Left,
    );
    harness.controller.publish_command(&command).await.unwrap();
    harness.controller.broadcast(&command).await.unwrap();

    let published = harness.transport.published_messages();
    assert_eq!(published[0].topic, "iot-car/car-7/command");
    assert_eq!(published[1].topic, "iot-car/fleet/broadcast");
    assert!(published.iter().all(|m| m.qos == QoS::AtLeastOnce && !m.retain));
}
