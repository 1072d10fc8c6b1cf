//! Pure connection configuration for the MQTT transport
//!
//! Builds rumqttc options from the broker section and tracks reconnect
//! streaks. No I/O happens here.

use crate::config::{BrokerProtocol, BrokerSection};
use crate::transport::{SessionOptions, TransportError};
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;

/// Build rumqttc options for a WebSocket session
///
/// rumqttc's WebSocket transport takes the full broker URL in place of the
/// host name.
pub fn configure_mqtt_options(options: &SessionOptions) -> Result<MqttOptions, TransportError> {
    let broker = &options.broker;
    let url = broker
        .url()
        .map_err(|e| TransportError::InvalidBrokerUrl(e.to_string()))?;

    if options.client_id.is_empty() {
        return Err(TransportError::Options("client id must not be empty".to_string()));
    }

    let mut mqtt_options = MqttOptions::new(options.client_id.clone(), url.as_str(), broker.port);

    let transport = match broker.protocol {
        BrokerProtocol::Wss => RumqttcTransport::wss_with_default_config(),
        BrokerProtocol::Ws => RumqttcTransport::Ws,
    };
    mqtt_options.set_transport(transport);

    mqtt_options.set_credentials(
        options.credentials.username.clone(),
        options.credentials.password.clone(),
    );
    mqtt_options.set_keep_alive(broker.keep_alive());
    mqtt_options.set_clean_session(broker.clean_session);

    Ok(mqtt_options)
}

/// Fixed-period reconnection, retried until the session is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    period: Duration,
}

impl ReconnectPolicy {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn from_broker(broker: &BrokerSection) -> Self {
        Self::new(broker.reconnect_period())
    }

    /// Delay before the next attempt; the same for every attempt
    pub fn delay(&self) -> Duration {
        self.period
    }
}

/// Failed attempts since the last successful connection
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectStreak {
    failures: u32,
}

impl ReconnectStreak {
    /// Record a failure; returns true for the first failure of a streak,
    /// which is when the session goes offline
    pub fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        self.failures == 1
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;

    fn session_options(host: &str) -> SessionOptions {
        SessionOptions {
            client_id: "gatelink-test".to_string(),
            credentials: Credentials::new("mario", "pw"),
            broker: BrokerSection {
                host: host.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&session_options("gate.example.com")).unwrap();
        assert_eq!(options.client_id(), "gatelink-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.clean_session());
        assert_eq!(
            options.credentials(),
            Some(("mario".to_string(), "pw".to_string()))
        );
    }

    #[test]
    fn test_invalid_broker_url() {
        let result = configure_mqtt_options(&session_options("bad host"));
        assert!(matches!(result, Err(TransportError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let mut options = session_options("gate.example.com");
        options.client_id.clear();
        assert!(matches!(
            configure_mqtt_options(&options),
            Err(TransportError::Options(_))
        ));
    }

    #[test]
    fn test_reconnect_delay_is_fixed() {
        let policy = ReconnectPolicy::from_broker(&BrokerSection::default());
        assert_eq!(policy.delay(), Duration::from_millis(5000));
        assert_eq!(policy.delay(), policy.delay());
    }

    #[test]
    fn test_streak_reports_offline_once() {
        let mut streak = ReconnectStreak::default();
        assert!(streak.record_failure());
        assert!(!streak.record_failure());
        assert!(!streak.record_failure());
        assert_eq!(streak.failures(), 3);

        streak.reset();
        assert!(streak.record_failure());
    }
}
