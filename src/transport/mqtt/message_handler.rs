//! Pure classification of rumqttc events
//!
//! The session driver asks [`MessageHandler`] what an event or error means
//! and only then performs I/O.

use bytes::Bytes;
use rumqttc::{ConnectionError, Event, Outgoing, Packet, SubscribeReasonCode};

/// Routing decision for one rumqttc event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK: the session is usable
    ConnectionAcknowledged,
    /// PUBLISH from the broker
    MessageReceived { topic: String, payload: Bytes },
    /// The broker sent DISCONNECT
    BrokerDisconnected,
    /// SUBACK; `rejected` is set when any topic got the failure code
    SubscriptionAcknowledged { pkid: u16, rejected: bool },
    /// DISCONNECT requested by this client went out
    LocalDisconnect,
    /// Pings, acks and other protocol traffic
    Infrastructure(String),
    /// Any other outgoing packet
    Outgoing,
}

/// How a failed poll should be reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The broker answered CONNACK with a refusal code (bad credentials, ...)
    Refused(String),
    /// Socket, TLS, WebSocket or protocol failure
    Network(String),
}

pub struct MessageHandler;

impl MessageHandler {
    /// Route a rumqttc event (pure function)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
            Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
            },
            Event::Incoming(Packet::Disconnect) => EventRoute::BrokerDisconnected,
            Event::Incoming(Packet::SubAck(suback)) => EventRoute::SubscriptionAcknowledged {
                pkid: suback.pkid,
                rejected: Self::has_rejection(&suback.return_codes),
            },
            Event::Incoming(other) => EventRoute::Infrastructure(format!("{other:?}")),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::LocalDisconnect,
            Event::Outgoing(_) => EventRoute::Outgoing,
        }
    }

    /// Whether a SUBACK carries a failure code (pure function)
    pub fn has_rejection(return_codes: &[SubscribeReasonCode]) -> bool {
        return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
    }

    /// Classify an event loop error (pure function)
    pub fn classify_failure(error: &ConnectionError) -> FailureKind {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                FailureKind::Refused(format!("Connection refused: {code:?}"))
            }
            other => FailureKind::Network(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Publish::new(
            "api/notification/gate",
            QoS::AtLeastOnce,
            r#"{"data":"ok","status":"success","timestamp":0}"#,
        );
        let route = MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Publish(publish)));
        match route {
            EventRoute::MessageReceived { topic, payload } => {
                assert_eq!(topic, "api/notification/gate");
                assert!(payload.starts_with(b"{\"data\""));
            }
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn test_route_suback() {
        let accepted = SubAck::new(3, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(accepted))),
            EventRoute::SubscriptionAcknowledged {
                pkid: 3,
                rejected: false
            }
        );

        let refused = SubAck::new(
            4,
            vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
            ],
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(refused))),
            EventRoute::SubscriptionAcknowledged {
                pkid: 4,
                rejected: true
            }
        );
    }

    #[test]
    fn test_route_disconnects() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::BrokerDisconnected
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::LocalDisconnect
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::Outgoing
        );
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PingResp)),
            EventRoute::Infrastructure(_)
        ));
    }

    #[test]
    fn test_classify_failure() {
        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert!(matches!(
            MessageHandler::classify_failure(&refused),
            FailureKind::Refused(message) if message.contains("NotAuthorized")
        ));

        let network = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert!(matches!(
            MessageHandler::classify_failure(&network),
            FailureKind::Network(_)
        ));
    }
}
