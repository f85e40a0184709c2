//! Pure classification of MQTT client events
//!
//! The event loop polls rumqttc and hands each event here to decide what it
//! means for the link and which messages to deliver.

use super::connection::from_mqtt_qos;
use crate::protocol::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// What an event means to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the session
    ConnectionAcknowledged,
    /// Application message on a subscribed topic
    MessageReceived(InboundMessage),
    /// Broker closed the session
    Disconnected,
    /// Broker answered a subscribe request
    SubscriptionResult { packet_id: u16, rejected: usize },
    /// Our own disconnect packet went out
    DisconnectSent,
    /// Pings, acks and other protocol traffic
    Infrastructure,
}

pub struct EventRouter;

impl EventRouter {
    /// Classify a polled event (pure function)
    pub fn route(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage::new(
                    String::from_utf8_lossy(&publish.topic).to_string(),
                    publish.payload.clone(),
                    from_mqtt_qos(publish.qos),
                )),
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionResult {
                    packet_id: suback.pkid,
                    rejected: suback
                        .return_codes
                        .iter()
                        .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                        .count(),
                },
                _ => EventRoute::Infrastructure,
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QoS;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish, SubAck,
    };
    use rumqttc::v5::mqttbytes::QoS as MqttQoS;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            EventRouter::route(&connack),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: MqttQoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("iot-car/car-7/telemetry"),
            pkid: 1,
            payload: Bytes::from(r#"{"battery":80}"#),
            properties: None,
        }));

        match EventRouter::route(&publish) {
            EventRoute::MessageReceived(message) => {
                assert_eq!(message.topic, "iot-car/car-7/telemetry");
                assert_eq!(message.payload, Bytes::from(r#"{"battery":80}"#));
                assert_eq!(message.qos, QoS::AtLeastOnce);
            }
            other => panic!("Expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_route_broker_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(EventRouter::route(&disconnect), EventRoute::Disconnected);
    }

    #[test]
    fn test_route_suback_counts_rejections() {
        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![
                SubscribeReasonCode::Success(MqttQoS::AtLeastOnce),
                SubscribeReasonCode::NotAuthorized,
            ],
            properties: None,
        }));
        assert_eq!(
            EventRouter::route(&suback),
            EventRoute::SubscriptionResult {
                packet_id: 7,
                rejected: 1
            }
        );
    }

    #[test]
    fn test_route_outgoing() {
        assert_eq!(
            EventRouter::route(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        );
        assert_eq!(
            EventRouter::route(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::Infrastructure
        );
    }
}
