//! Wire payloads exchanged with the gate controller
//!
//! Field names follow the controller firmware, which uses Italian keys and
//! values. The Rust side uses English names and maps them with serde.

use super::topics::PublishTopic;
use chrono::{DateTime, Local, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Outcome flag carried by every controller notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Success,
    Error,
}

/// Physical state of the main gate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GateState {
    #[serde(rename = "chiuso")]
    Closed,
    #[serde(rename = "aperto")]
    Open,
    #[serde(rename = "stop")]
    Stopped,
    #[serde(rename = "in apertura")]
    Opening,
    #[serde(rename = "in chiusura")]
    Closing,
    #[serde(rename = "sconosciuto")]
    Unknown,
}

impl GateState {
    /// Wire label as sent by the controller
    pub fn label(&self) -> &'static str {
        match self {
            GateState::Closed => "chiuso",
            GateState::Open => "aperto",
            GateState::Stopped => "stop",
            GateState::Opening => "in apertura",
            GateState::Closing => "in chiusura",
            GateState::Unknown => "sconosciuto",
        }
    }

    /// Whether the gate is currently moving
    pub fn is_moving(&self) -> bool {
        matches!(self, GateState::Opening | GateState::Closing)
    }
}

/// State of a single sensor or peripheral
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceStatus {
    #[serde(rename = "attivo")]
    Active,
    #[serde(rename = "disattivo")]
    Inactive,
    #[serde(rename = "sconosciuto")]
    Unknown,
}

impl DeviceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "attivo",
            DeviceStatus::Inactive => "disattivo",
            DeviceStatus::Unknown => "sconosciuto",
        }
    }
}

/// Sensor and position snapshot reported by the controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateStatusData {
    #[serde(rename = "stato")]
    pub state: GateState,
    /// Opening limit switch
    #[serde(rename = "fcApertura")]
    pub open_limit: DeviceStatus,
    /// Closing limit switch
    #[serde(rename = "fcChiusura")]
    pub close_limit: DeviceStatus,
    #[serde(rename = "fotocellule")]
    pub photocells: DeviceStatus,
    /// Safety edges
    #[serde(rename = "coste")]
    pub edges: DeviceStatus,
    /// Radio receiver
    #[serde(rename = "ricevente")]
    pub receiver: DeviceStatus,
    /// Position as a percentage string, or "sconosciuto"
    #[serde(rename = "posizione")]
    pub position: String,
    /// Motor consumption, or "sconosciuto"
    #[serde(rename = "consumo")]
    pub consumption: String,
}

impl GateStatusData {
    /// Parse `posizione` ("45%" or "45") into a 0-100 value
    pub fn position_percent(&self) -> Option<u8> {
        let trimmed = self.position.trim().trim_end_matches('%').trim();
        trimmed.parse::<u8>().ok().filter(|value| *value <= 100)
    }
}

/// Latest gate status, published on `api/notification/gate/status`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GateStatus {
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub status: Option<NotificationStatus>,
    #[serde(default)]
    pub data: Option<GateStatusData>,
}

/// Per-action activation counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatisticsCounters {
    #[serde(rename = "cancello")]
    pub gate: u64,
    #[serde(rename = "luce_garage")]
    pub garage_light: u64,
    #[serde(rename = "pedonabile")]
    pub partial: u64,
    #[serde(rename = "cancellino")]
    pub small_gate: u64,
}

/// Activation statistics, published on `api/notification/statistics`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateStatistics {
    pub timestamp: i64,
    #[serde(rename = "totale_storico")]
    pub total: StatisticsCounters,
    #[serde(rename = "ultime_24_ore")]
    pub last_24h: StatisticsCounters,
}

/// Which statistics counters to reset
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatisticsResetType {
    #[serde(rename = "24h")]
    Last24h,
    #[serde(rename = "total")]
    Total,
    #[serde(rename = "all")]
    All,
}

impl StatisticsResetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatisticsResetType::Last24h => "24h",
            StatisticsResetType::Total => "total",
            StatisticsResetType::All => "all",
        }
    }
}

impl std::str::FromStr for StatisticsResetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(StatisticsResetType::Last24h),
            "total" => Ok(StatisticsResetType::Total),
            "all" => Ok(StatisticsResetType::All),
            other => Err(format!("unknown reset scope '{other}' (expected 24h, total or all)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResetAction {
    ResetCounters,
}

/// Acknowledgement published on `api/notification/statistics/reset`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticsResetResponse {
    pub action: ResetAction,
    #[serde(rename = "type")]
    pub reset_type: StatisticsResetType,
    pub status: NotificationStatus,
    pub timestamp: i64,
}

/// Generic controller notification `{data, status, timestamp}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload<T = Value> {
    pub data: T,
    pub status: NotificationStatus,
    pub timestamp: i64,
}

impl NotificationPayload<Value> {
    /// Render `data` the way a human expects to read it
    pub fn data_text(&self) -> String {
        match &self.data {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Command verb; the controller only understands "on"
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandVerb {
    #[default]
    On,
}

/// `{cmd: "on", user?: string}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandPayload {
    pub cmd: CommandVerb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl CommandPayload {
    /// Anonymous "on" command
    pub fn on() -> Self {
        Self::default()
    }

    /// "on" command attributed to a user; blank names are dropped
    pub fn from_user<S: Into<String>>(user: Option<S>) -> Self {
        let user = user
            .map(Into::into)
            .filter(|name: &String| !name.trim().is_empty());
        Self {
            cmd: CommandVerb::On,
            user,
        }
    }
}

/// Outbound command: one variant per publish topic, carrying that topic's payload type
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    Gate(CommandPayload),
    Partial(CommandPayload),
    SmallGate(CommandPayload),
    GarageLight(CommandPayload),
    RequestStatus(CommandPayload),
    RequestStatistics(CommandPayload),
    Learning(CommandPayload),
    ResetStatistics(StatisticsResetType),
}

impl OutboundCommand {
    pub fn topic(&self) -> PublishTopic {
        match self {
            OutboundCommand::Gate(_) => PublishTopic::Gate,
            OutboundCommand::Partial(_) => PublishTopic::Partial,
            OutboundCommand::SmallGate(_) => PublishTopic::SmallGate,
            OutboundCommand::GarageLight(_) => PublishTopic::GarageLight,
            OutboundCommand::RequestStatus(_) => PublishTopic::GateStatus,
            OutboundCommand::RequestStatistics(_) => PublishTopic::Statistics,
            OutboundCommand::Learning(_) => PublishTopic::Learning,
            OutboundCommand::ResetStatistics(_) => PublishTopic::ResetStatistics,
        }
    }

    /// Serialize the payload to its wire text
    pub fn encode(&self) -> Result<String, CommandError> {
        let value = match self {
            OutboundCommand::ResetStatistics(scope) => serde_json::to_value(scope),
            OutboundCommand::Gate(payload)
            | OutboundCommand::Partial(payload)
            | OutboundCommand::SmallGate(payload)
            | OutboundCommand::GarageLight(payload)
            | OutboundCommand::RequestStatus(payload)
            | OutboundCommand::RequestStatistics(payload)
            | OutboundCommand::Learning(payload) => serde_json::to_value(payload),
        }
        .map_err(CommandError::Serialization)?;
        encode_wire(&value)
    }

    /// Build a command from a wire topic and an untyped JSON payload,
    /// validating the payload against the topic's declared shape.
    /// A `null` payload is rejected on every publish topic
    pub fn from_wire(topic: &str, payload: &Value) -> Result<Self, CommandError> {
        let topic: PublishTopic = topic
            .parse()
            .map_err(|_| CommandError::UnknownTopic(topic.to_string()))?;

        let command = match topic {
            PublishTopic::ResetStatistics => {
                OutboundCommand::ResetStatistics(decode_shape(topic, payload)?)
            }
            PublishTopic::Gate => OutboundCommand::Gate(decode_shape(topic, payload)?),
            PublishTopic::Partial => OutboundCommand::Partial(decode_shape(topic, payload)?),
            PublishTopic::SmallGate => OutboundCommand::SmallGate(decode_shape(topic, payload)?),
            PublishTopic::GarageLight => {
                OutboundCommand::GarageLight(decode_shape(topic, payload)?)
            }
            PublishTopic::GateStatus => {
                OutboundCommand::RequestStatus(decode_shape(topic, payload)?)
            }
            PublishTopic::Statistics => {
                OutboundCommand::RequestStatistics(decode_shape(topic, payload)?)
            }
            PublishTopic::Learning => OutboundCommand::Learning(decode_shape(topic, payload)?),
        };
        Ok(command)
    }
}

fn decode_shape<T: DeserializeOwned>(topic: PublishTopic, payload: &Value) -> Result<T, CommandError> {
    if payload.is_null() {
        return Err(CommandError::PayloadMismatch {
            topic: topic.as_str().to_string(),
            reason: "payload is required".to_string(),
        });
    }
    T::deserialize(payload).map_err(|e| CommandError::PayloadMismatch {
        topic: topic.as_str().to_string(),
        reason: e.to_string(),
    })
}

/// JSON text for a payload value; `null` becomes the empty string.
///
/// Every publish topic requires a payload, so [`OutboundCommand::encode`]
/// never produces `null`. The empty-string form exists for callers encoding
/// raw values.
pub fn encode_wire(value: &Value) -> Result<String, CommandError> {
    if value.is_null() {
        return Ok(String::new());
    }
    serde_json::to_string(value).map_err(CommandError::Serialization)
}

/// Format a controller timestamp (milliseconds since epoch) as local wall-clock time
pub fn format_local_time(timestamp_ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|utc| utc.with_timezone(&Local).format("%H:%M:%S").to_string())
}

/// Outbound command validation errors
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Topic is not a publish topic: {0}")]
    UnknownTopic(String),
    #[error("Payload does not match the shape declared for {topic}: {reason}")]
    PayloadMismatch { topic: String, reason: String },
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
}
