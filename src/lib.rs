//! gatelink - remote control client for a gate/garage controller over MQTT
//!
//! # Overview
//!
//! This crate keeps an authenticated MQTT session to the controller's broker
//! alive and turns broker traffic into typed application state:
//! - Topic catalog with typed payloads for commands and notifications
//! - MQTT-over-WebSocket transport with reconnect and resubscribe
//! - Connection manager with a stale-session guard
//! - Message router, command façade and a periodic refresh cycle
//! - A single-task runtime ([`GateClient`]) driven through a [`GateHandle`]
//!
//! # Quick Start
//!
//! ```rust
//! use gatelink::protocol::{GateAction, OutboundCommand, PublishTopic};
//!
//! let command = GateAction::Gate.command(Some("Mario"));
//! assert_eq!(command.topic(), PublishTopic::Gate);
//! assert_eq!(command.encode().unwrap(), r#"{"cmd":"on","user":"Mario"}"#);
//!
//! let reset = OutboundCommand::ResetStatistics("24h".parse().unwrap());
//! assert_eq!(reset.encode().unwrap(), r#""24h""#);
//! ```

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod refresh;
pub mod routing;
pub mod session;
pub mod testing;
pub mod transport;

pub use client::{AppState, GateClient, GateHandle};
pub use config::*;
pub use credentials::{
    CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore, UserProfile,
};
pub use error::{ErrorKind, GateError, GateResult, StatusError};
pub use protocol::*;
pub use routing::{BatchOutcome, GateEvent, Notification, SubscribeOptions};
pub use session::ConnectionStatus;
pub use transport::mqtt::MqttTransport;
