//! Advisory connection watchdog
//!
//! Armed on every activation attempt (even one whose session failed to
//! open) and whenever the status leaves `Connected`. Disarmed on `Connected`
//! or teardown. When the window elapses it fires one advisory
//! per arming. It never touches the connection status.

use super::status::ConnectionStatus;
use crate::transport::SessionId;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ConnectionWatchdog {
    window: Duration,
    deadline: Option<Instant>,
    attempt: Option<SessionId>,
    status: ConnectionStatus,
}

impl ConnectionWatchdog {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            attempt: None,
            status: ConnectionStatus::Disconnected,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Feed the latest activation attempt and status (pure state update)
    pub fn observe(&mut self, attempt: Option<SessionId>, status: ConnectionStatus, now: Instant) {
        let new_attempt = attempt.is_some() && attempt != self.attempt;
        let left_connected = self.status.is_connected() && !status.is_connected();
        self.attempt = attempt;
        self.status = status;

        if status.is_connected() || status == ConnectionStatus::Disconnected {
            self.deadline = None;
        } else if new_attempt || left_connected {
            self.deadline = Some(now + self.window);
        }
    }

    /// Fire the advisory if the deadline has passed; disarms until the next arming
    pub fn poll_expired(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(format!(
                    "Not connected to the gate after {}s (status: {})",
                    self.window.as_secs(),
                    self.status
                ))
            }
            _ => None,
        }
    }
}
