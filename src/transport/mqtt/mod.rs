//! MQTT-over-WebSocket transport built on rumqttc
//!
//! Split the same way as the rest of the transport code: pure functions for
//! options and event classification, one impure module for the event loop.
//!
//! - [`connection`] - broker options and the fixed reconnect policy
//! - [`message_handler`] - classification of rumqttc events
//! - [`client`] - session driver task and the [`MqttTransport`] entry point

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttSession, MqttTransport};
pub use connection::{configure_mqtt_options, ReconnectPolicy};
pub use message_handler::{EventRoute, MessageHandler};
