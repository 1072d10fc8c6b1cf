//! Topic catalog for the gate controller
//!
//! Every topic the client publishes to or subscribes on is declared here,
//! together with its direction and the payload shape it carries. The wire
//! strings are fixed by the controller firmware and must match exactly.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Direction of a catalog entry relative to this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The client publishes commands on this topic
    Publish,
    /// The client subscribes to notifications on this topic
    Subscribe,
}

/// Payload shape declared for a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{cmd: "on", user?: string}`
    Command,
    /// Bare string `"24h" | "total" | "all"`
    ResetScope,
    /// `{data, status, timestamp}`
    Notification,
    /// `{timestamp, status, data: sensor snapshot}`
    GateStatus,
    /// `{timestamp, totale_storico, ultime_24_ore}`
    Statistics,
    /// `{action: "reset_counters", type, status, timestamp}`
    StatisticsReset,
}

/// One row of the topic catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub topic: &'static str,
    pub direction: Direction,
    pub shape: PayloadShape,
}

/// Topics the client publishes commands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishTopic {
    Gate,
    Partial,
    SmallGate,
    GarageLight,
    GateStatus,
    Statistics,
    Learning,
    ResetStatistics,
}

impl PublishTopic {
    pub const ALL: [PublishTopic; 8] = [
        PublishTopic::Gate,
        PublishTopic::Partial,
        PublishTopic::SmallGate,
        PublishTopic::GarageLight,
        PublishTopic::GateStatus,
        PublishTopic::Statistics,
        PublishTopic::Learning,
        PublishTopic::ResetStatistics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishTopic::Gate => "api/gate",
            PublishTopic::Partial => "api/gate/partial",
            PublishTopic::SmallGate => "api/small_gate",
            PublishTopic::GarageLight => "api/garage/light",
            PublishTopic::GateStatus => "api/gate/status",
            PublishTopic::Statistics => "api/gate/statistics",
            PublishTopic::Learning => "api/gate/learning",
            PublishTopic::ResetStatistics => "api/gate/statistics/reset",
        }
    }

    pub fn shape(&self) -> PayloadShape {
        match self {
            PublishTopic::ResetStatistics => PayloadShape::ResetScope,
            _ => PayloadShape::Command,
        }
    }
}

/// Topics the controller publishes notifications on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationTopic {
    SmallGate,
    GarageLight,
    Partial,
    Gate,
    GateStatus,
    Statistics,
    Learning,
    StatisticsReset,
    GateError,
    PartialError,
    LearningError,
}

impl NotificationTopic {
    pub const ALL: [NotificationTopic; 11] = [
        NotificationTopic::SmallGate,
        NotificationTopic::GarageLight,
        NotificationTopic::Partial,
        NotificationTopic::Gate,
        NotificationTopic::GateStatus,
        NotificationTopic::Statistics,
        NotificationTopic::Learning,
        NotificationTopic::StatisticsReset,
        NotificationTopic::GateError,
        NotificationTopic::PartialError,
        NotificationTopic::LearningError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTopic::SmallGate => "api/notification/small_gate",
            NotificationTopic::GarageLight => "api/notification/garage/light",
            NotificationTopic::Partial => "api/notification/gate/partial",
            NotificationTopic::Gate => "api/notification/gate",
            NotificationTopic::GateStatus => "api/notification/gate/status",
            NotificationTopic::Statistics => "api/notification/statistics",
            NotificationTopic::Learning => "api/notification/gate/learning",
            NotificationTopic::StatisticsReset => "api/notification/statistics/reset",
            NotificationTopic::GateError => "api/notification/gate/error",
            NotificationTopic::PartialError => "api/notification/gate/partial/error",
            NotificationTopic::LearningError => "api/notification/gate/learning/error",
        }
    }

    pub fn shape(&self) -> PayloadShape {
        match self {
            NotificationTopic::GateStatus => PayloadShape::GateStatus,
            NotificationTopic::Statistics => PayloadShape::Statistics,
            NotificationTopic::StatisticsReset => PayloadShape::StatisticsReset,
            _ => PayloadShape::Notification,
        }
    }

    /// Wire strings of every notification topic, in catalog order
    pub fn all_topics() -> Vec<&'static str> {
        Self::ALL.iter().map(NotificationTopic::as_str).collect()
    }
}

impl fmt::Display for PublishTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for NotificationTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishTopic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublishTopic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| TopicError::NotPublishable(s.to_string()))
    }
}

impl FromStr for NotificationTopic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationTopic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| TopicError::NotSubscribable(s.to_string()))
    }
}

static TOPIC_CATALOG: Lazy<HashMap<&'static str, CatalogEntry>> = Lazy::new(|| {
    let publish = PublishTopic::ALL.iter().map(|topic| CatalogEntry {
        topic: topic.as_str(),
        direction: Direction::Publish,
        shape: topic.shape(),
    });
    let subscribe = NotificationTopic::ALL.iter().map(|topic| CatalogEntry {
        topic: topic.as_str(),
        direction: Direction::Subscribe,
        shape: topic.shape(),
    });
    publish
        .chain(subscribe)
        .map(|entry| (entry.topic, entry))
        .collect()
});

/// Look a wire topic up in the catalog
pub fn lookup(topic: &str) -> Option<&'static CatalogEntry> {
    TOPIC_CATALOG.get(topic)
}

/// Number of entries in the catalog
pub fn catalog_len() -> usize {
    TOPIC_CATALOG.len()
}

/// Topic lookup errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic is not a publish topic: {0}")]
    NotPublishable(String),
    #[error("Topic is not a notification topic: {0}")]
    NotSubscribable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_catalog_contains_every_topic() {
        assert_eq!(catalog_len(), PublishTopic::ALL.len() + NotificationTopic::ALL.len());

        for topic in PublishTopic::ALL {
            let entry = lookup(topic.as_str()).expect("publish topic in catalog");
            assert_eq!(entry.direction, Direction::Publish);
            assert_eq!(entry.shape, topic.shape());
        }

        for topic in NotificationTopic::ALL {
            let entry = lookup(topic.as_str()).expect("notification topic in catalog");
            assert_eq!(entry.direction, Direction::Subscribe);
            assert_eq!(entry.shape, topic.shape());
        }
    }

    #[test]
    fn test_wire_strings() {
        assert_eq!(PublishTopic::Gate.as_str(), "api/gate");
        assert_eq!(PublishTopic::SmallGate.as_str(), "api/small_gate");
        assert_eq!(
            PublishTopic::ResetStatistics.as_str(),
            "api/gate/statistics/reset"
        );
        assert_eq!(
            NotificationTopic::GateStatus.as_str(),
            "api/notification/gate/status"
        );
        assert_eq!(
            NotificationTopic::LearningError.as_str(),
            "api/notification/gate/learning/error"
        );
    }

    #[test]
    fn test_shapes() {
        assert_eq!(PublishTopic::ResetStatistics.shape(), PayloadShape::ResetScope);
        assert_eq!(PublishTopic::GateStatus.shape(), PayloadShape::Command);
        assert_eq!(NotificationTopic::Statistics.shape(), PayloadShape::Statistics);
        assert_eq!(
            NotificationTopic::StatisticsReset.shape(),
            PayloadShape::StatisticsReset
        );
        assert_eq!(NotificationTopic::GateError.shape(), PayloadShape::Notification);
    }

    #[test]
    fn test_from_str_respects_direction() {
        assert_eq!("api/gate".parse::<PublishTopic>(), Ok(PublishTopic::Gate));
        assert_eq!(
            "api/notification/gate".parse::<NotificationTopic>(),
            Ok(NotificationTopic::Gate)
        );
        assert!("api/notification/gate".parse::<PublishTopic>().is_err());
        assert!("api/gate".parse::<NotificationTopic>().is_err());
    }

    #[test]
    fn test_all_topics_are_unique() {
        let topics = NotificationTopic::all_topics();
        let mut deduped = topics.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(topics.len(), deduped.len());
    }

    proptest! {
        #[test]
        fn unknown_topics_are_not_in_catalog(topic in "[a-z/_]{0,40}") {
            prop_assume!(!topic.starts_with("api/"));
            prop_assert!(lookup(&topic).is_none());
        }

        #[test]
        fn catalog_lookup_is_exact(suffix in "[a-z]{1,8}") {
            // Catalog matching is exact: no wildcard or prefix semantics
            let topic = format!("api/gate/{suffix}x");
            prop_assert!(lookup(&topic).is_none());
        }
    }
}
