//! Transport layer for the gate client
//!
//! A [`Transport`] opens sessions; a [`TransportSession`] is one live broker
//! connection. Sessions never return results for publish/subscribe traffic:
//! requests are queued and their outcome is observed through the events the
//! session pushes into its [`EventSink`].

use crate::config::BrokerSection;
use crate::credentials::Credentials;
use bytes::Bytes;
use rumqttc::QoS;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid transport options: {0}")]
    Options(String),
    #[error("{operation} failed: {message}")]
    RequestFailed {
        operation: &'static str,
        message: String,
    },
    #[error("Session is closed")]
    SessionClosed,
}

/// Connection lifecycle notifications, in the order the broker client reports them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connect,
    Reconnect,
    Offline,
    Disconnect,
    Close,
    Error(String),
}

/// Everything a session can report
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Lifecycle(LifecycleEvent),
    Message { topic: String, payload: Bytes },
    /// The broker refused one or more topics of a SUBSCRIBE
    SubscriptionRejected { pkid: u16 },
}

/// Monotonic identifier of a session opened by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn next(self) -> Self {
        SessionId(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An event tagged with the session that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: TransportEvent,
}

/// Where a session pushes its events; all sessions share one ordered channel
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Push an event; returns false once the receiving side is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }

    pub fn lifecycle(&self, event: LifecycleEvent) -> bool {
        self.emit(TransportEvent::Lifecycle(event))
    }
}

/// Parameters for opening a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Fresh per connection attempt
    pub client_id: String,
    pub credentials: Credentials,
    pub broker: BrokerSection,
}

/// Opens broker sessions
pub trait Transport: Send + Sync {
    type Session: TransportSession;

    /// Start a session; connection progress is reported through `sink`
    fn open(&self, options: SessionOptions, sink: EventSink)
        -> Result<Self::Session, TransportError>;
}

/// One live broker session
pub trait TransportSession: Send {
    fn publish(&self, topic: &str, payload: String, qos: QoS) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Disconnect cleanly and stop reporting events
    fn close(&mut self);
}

/// Map a numeric QoS level to rumqttc's enum
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), Some(QoS::AtMostOnce));
        assert_eq!(qos_from_level(1), Some(QoS::AtLeastOnce));
        assert_eq!(qos_from_level(2), Some(QoS::ExactlyOnce));
        assert_eq!(qos_from_level(3), None);
    }

    #[test]
    fn test_sink_tags_events_with_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(SessionId(7), tx);

        assert!(sink.lifecycle(LifecycleEvent::Connect));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.session, SessionId(7));
        assert_eq!(event.event, TransportEvent::Lifecycle(LifecycleEvent::Connect));

        drop(rx);
        assert!(!sink.lifecycle(LifecycleEvent::Close));
    }

    #[test]
    fn test_session_id_ordering() {
        let first = SessionId(1);
        assert!(first.next() > first);
        assert_eq!(first.next().to_string(), "#2");
    }
}
