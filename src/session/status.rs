//! Connection status and the board it is published on
//!
//! Status changes are last-write-wins: every lifecycle event of the current
//! session overwrites the previous value without debouncing.

use crate::error::StatusError;
use crate::observability::metrics::metrics;
use crate::transport::LifecycleEvent;
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Single active connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
    Offline,
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Reconnecting => "Reconnecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Offline => "Offline",
            ConnectionStatus::Error => "Error",
        }
    }

    /// Status after a lifecycle event (pure function)
    pub fn after(event: &LifecycleEvent) -> ConnectionStatus {
        match event {
            LifecycleEvent::Connect => ConnectionStatus::Connected,
            LifecycleEvent::Error(_) => ConnectionStatus::Error,
            LifecycleEvent::Disconnect | LifecycleEvent::Close => ConnectionStatus::Disconnected,
            LifecycleEvent::Offline => ConnectionStatus::Offline,
            LifecycleEvent::Reconnect => ConnectionStatus::Reconnecting,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Log a status transition
pub fn log_status_transition(from: ConnectionStatus, to: ConnectionStatus) {
    match (from, to) {
        (ConnectionStatus::Connecting, ConnectionStatus::Connected) => {
            info!("Gate connection established");
        }
        (ConnectionStatus::Reconnecting, ConnectionStatus::Connected) => {
            info!("Reconnection successful");
        }
        (ConnectionStatus::Connected, ConnectionStatus::Offline) => {
            warn!("Gate connection lost, broker offline");
        }
        (_, ConnectionStatus::Error) => {
            error!("Gate connection status: {} -> Error", from);
        }
        _ => {
            debug!("Gate connection status: {} -> {}", from, to);
        }
    }
}

/// Publishes the connection status and the latest error to observers
#[derive(Debug)]
pub struct StatusBoard {
    status: watch::Sender<ConnectionStatus>,
    error: watch::Sender<Option<StatusError>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (error, _) = watch::channel(None);
        Self { status, error }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn latest_error(&self) -> Option<StatusError> {
        self.error.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn watch_error(&self) -> watch::Receiver<Option<StatusError>> {
        self.error.subscribe()
    }

    /// Overwrite the status; observers are only woken on a change
    pub fn set_status(&self, next: ConnectionStatus) {
        let previous = self.status();
        if previous == next {
            return;
        }
        log_status_transition(previous, next);
        metrics().set_connection_status(next.label());
        self.status.send_replace(next);
    }

    /// Record the latest error; the status is left to the caller
    pub fn record_error(&self, error: StatusError) {
        warn!(kind = %error.kind, "{}", error.message);
        self.error.send_replace(Some(error));
    }

    /// Record an error and switch to `Error`
    pub fn fail(&self, error: StatusError) {
        self.record_error(error);
        self.set_status(ConnectionStatus::Error);
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_lifecycle_transitions() {
        let cases = [
            (LifecycleEvent::Connect, ConnectionStatus::Connected),
            (LifecycleEvent::Error("refused".into()), ConnectionStatus::Error),
            (LifecycleEvent::Disconnect, ConnectionStatus::Disconnected),
            (LifecycleEvent::Close, ConnectionStatus::Disconnected),
            (LifecycleEvent::Offline, ConnectionStatus::Offline),
            (LifecycleEvent::Reconnect, ConnectionStatus::Reconnecting),
        ];
        for (event, expected) in cases {
            assert_eq!(ConnectionStatus::after(&event), expected, "{event:?}");
        }
    }

    #[test]
    fn test_only_connected_is_connected() {
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(!ConnectionStatus::Reconnecting.is_connected());
        assert!(!ConnectionStatus::Offline.is_connected());
    }

    #[test]
    fn test_board_starts_disconnected() {
        let board = StatusBoard::new();
        assert_eq!(board.status(), ConnectionStatus::Disconnected);
        assert!(board.latest_error().is_none());
    }

    #[test]
    fn test_watchers_see_changes_only() {
        let board = StatusBoard::new();
        let mut rx = board.watch_status();

        board.set_status(ConnectionStatus::Disconnected);
        assert!(!rx.has_changed().unwrap());

        board.set_status(ConnectionStatus::Connecting);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Connecting);
    }

    #[test]
    fn test_fail_records_error_and_status() {
        let board = StatusBoard::new();
        board.fail(StatusError::topic("subscribe api/notification/gate failed"));

        assert_eq!(board.status(), ConnectionStatus::Error);
        let error = board.latest_error().unwrap();
        assert_eq!(error.kind, ErrorKind::Topic);
    }
}
