//! Inbound side of the topic catalog
//!
//! The router decodes broker messages against the catalog, keeps the latest
//! gate status and statistics, and broadcasts typed events in arrival order.

use crate::observability::metrics::metrics;
use crate::protocol::{
    format_local_time, GateStatistics, GateStatus, NotificationPayload, NotificationStatus,
    NotificationTopic, PayloadShape, StatisticsResetResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 64;

/// Transient controller notification, ready to show to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Wire topic the notification arrived on
    pub topic: &'static str,
    /// `"HH:MM:SS - text"`
    pub message: String,
    pub is_error: bool,
    pub timestamp: i64,
}

/// Events broadcast to consumers
#[derive(Debug, Clone, PartialEq)]
pub enum GateEvent {
    StatusUpdated(GateStatus),
    StatisticsUpdated(GateStatistics),
    Notification(Notification),
    /// Non-fatal warning, e.g. "still not connected"
    Advisory(String),
}

pub struct MessageRouter {
    gate_status: watch::Sender<Option<GateStatus>>,
    statistics: watch::Sender<Option<GateStatistics>>,
    events: broadcast::Sender<GateEvent>,
}

impl MessageRouter {
    pub fn new() -> Self {
        let (gate_status, _) = watch::channel(None);
        let (statistics, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gate_status,
            statistics,
            events,
        }
    }

    pub fn gate_status(&self) -> Option<GateStatus> {
        self.gate_status.borrow().clone()
    }

    pub fn statistics(&self) -> Option<GateStatistics> {
        self.statistics.borrow().clone()
    }

    pub fn watch_gate_status(&self) -> watch::Receiver<Option<GateStatus>> {
        self.gate_status.subscribe()
    }

    pub fn watch_statistics(&self) -> watch::Receiver<Option<GateStatistics>> {
        self.statistics.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GateEvent> {
        self.events.subscribe()
    }

    /// Sender half, for handles that hand out their own receivers
    pub fn event_sender(&self) -> broadcast::Sender<GateEvent> {
        self.events.clone()
    }

    /// Broadcast a watchdog advisory
    pub fn emit_advisory(&self, message: String) {
        warn!("{}", message);
        metrics().advisory_emitted();
        self.publish(GateEvent::Advisory(message));
    }

    fn publish(&self, event: GateEvent) {
        // No subscribers is fine: state is still kept in the watch channels
        let _ = self.events.send(event);
    }

    /// Decode and route one inbound message.
    /// Returns the broadcast event, or None when the message was dropped
    pub fn dispatch(&self, topic: &str, raw_payload: &[u8]) -> Option<GateEvent> {
        let Ok(notification_topic) = topic.parse::<NotificationTopic>() else {
            debug!(topic = %topic, "Ignoring message on unregistered topic");
            metrics().message_ignored();
            return None;
        };

        let value: Value = match serde_json::from_slice(raw_payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(topic = %topic, "Malformed JSON payload dropped: {}", e);
                metrics().message_malformed();
                return None;
            }
        };

        let event = match notification_topic.shape() {
            PayloadShape::GateStatus => {
                let status: GateStatus = decode(topic, value)?;
                self.gate_status.send_replace(Some(status.clone()));
                GateEvent::StatusUpdated(status)
            }
            PayloadShape::Statistics => {
                let statistics: GateStatistics = decode(topic, value)?;
                self.statistics.send_replace(Some(statistics.clone()));
                GateEvent::StatisticsUpdated(statistics)
            }
            PayloadShape::StatisticsReset => {
                let response: StatisticsResetResponse = decode(topic, value)?;
                GateEvent::Notification(Notification {
                    topic: notification_topic.as_str(),
                    message: compose_message(
                        response.timestamp,
                        &format!("reset_counters {}", response.reset_type.as_str()),
                    ),
                    is_error: response.status == NotificationStatus::Error,
                    timestamp: response.timestamp,
                })
            }
            _ => {
                let payload: NotificationPayload = decode(topic, value)?;
                GateEvent::Notification(Notification {
                    topic: notification_topic.as_str(),
                    message: compose_message(payload.timestamp, &payload.data_text()),
                    is_error: payload.status == NotificationStatus::Error,
                    timestamp: payload.timestamp,
                })
            }
        };

        metrics().message_routed();
        debug!(topic = %topic, "Message routed");
        self.publish(event.clone());
        Some(event)
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn decode<T: DeserializeOwned>(topic: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(topic = %topic, "Payload does not match topic shape, dropped: {}", e);
            metrics().message_malformed();
            None
        }
    }
}

/// `"HH:MM:SS - text"` in local time
fn compose_message(timestamp_ms: i64, text: &str) -> String {
    let time = format_local_time(timestamp_ms).unwrap_or_else(|| timestamp_ms.to_string());
    format!("{time} - {text}")
}
