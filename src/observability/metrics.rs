//! Thread-safe metrics collection
//!
//! Process-wide atomic counters for session lifecycle, inbound routing and
//! outbound commands. Read them through [`MetricsCollector::get_metrics`].

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector
pub struct MetricsCollector {
    // Session lifecycle
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    stale_events_discarded: AtomicU64,
    status_transitions: AtomicU64,
    reconnect_attempts: AtomicU64,
    advisories: AtomicU64,
    current_status: Mutex<String>,
    last_connected_at: AtomicU64,

    // Inbound routing
    messages_received: AtomicU64,
    messages_routed: AtomicU64,
    messages_malformed: AtomicU64,
    messages_ignored: AtomicU64,

    // Outbound commands
    commands_published: AtomicU64,
    commands_rejected: AtomicU64,
    publish_failures: AtomicU64,
    topic_errors: AtomicU64,
    refresh_polls: AtomicU64,

    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            stale_events_discarded: AtomicU64::new(0),
            status_transitions: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            advisories: AtomicU64::new(0),
            current_status: Mutex::new("Disconnected".to_string()),
            last_connected_at: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            messages_malformed: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            commands_published: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            topic_errors: AtomicU64::new(0),
            refresh_polls: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Session lifecycle
    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_event_discarded(&self) {
        self.stale_events_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn advisory_emitted(&self) {
        self.advisories.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the connection status; counts a transition only when it changes
    pub fn set_connection_status(&self, status: &str) {
        if let Ok(mut current) = self.current_status.lock() {
            if *current != status {
                self.status_transitions.fetch_add(1, Ordering::Relaxed);
                *current = status.to_string();
                if status == "Connected" {
                    self.last_connected_at
                        .store(current_timestamp(), Ordering::Relaxed);
                }
            }
        }
    }

    // Inbound routing
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_malformed(&self) {
        self.messages_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }

    // Outbound commands
    pub fn command_published(&self) {
        self.commands_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn topic_error(&self) {
        self.topic_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_poll(&self) {
        self.refresh_polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.sessions_opened,
            &self.sessions_closed,
            &self.stale_events_discarded,
            &self.status_transitions,
            &self.reconnect_attempts,
            &self.advisories,
            &self.last_connected_at,
            &self.messages_received,
            &self.messages_routed,
            &self.messages_malformed,
            &self.messages_ignored,
            &self.commands_published,
            &self.commands_rejected,
            &self.publish_failures,
            &self.topic_errors,
            &self.refresh_polls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut status) = self.current_status.lock() {
            *status = "Disconnected".to_string();
        }
        self.started_at.store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let status = self
            .current_status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string());
        let opened = self.sessions_opened.load(Ordering::Relaxed);
        let closed = self.sessions_closed.load(Ordering::Relaxed);

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            session: SessionMetrics {
                status,
                sessions_opened: opened,
                sessions_closed: closed,
                active_sessions: opened.saturating_sub(closed),
                stale_events_discarded: self.stale_events_discarded.load(Ordering::Relaxed),
                status_transitions: self.status_transitions.load(Ordering::Relaxed),
                reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
                advisories: self.advisories.load(Ordering::Relaxed),
                last_connected_at: self.last_connected_at.load(Ordering::Relaxed),
            },
            routing: RoutingMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_routed: self.messages_routed.load(Ordering::Relaxed),
                messages_malformed: self.messages_malformed.load(Ordering::Relaxed),
                messages_ignored: self.messages_ignored.load(Ordering::Relaxed),
            },
            commands: CommandMetrics {
                commands_published: self.commands_published.load(Ordering::Relaxed),
                commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                topic_errors: self.topic_errors.load(Ordering::Relaxed),
                refresh_polls: self.refresh_polls.load(Ordering::Relaxed),
            },
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub session: SessionMetrics,
    pub routing: RoutingMetrics,
    pub commands: CommandMetrics,
}

#[derive(Debug, Serialize)]
pub struct SessionMetrics {
    pub status: String,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub active_sessions: u64,
    pub stale_events_discarded: u64,
    pub status_transitions: u64,
    pub reconnect_attempts: u64,
    pub advisories: u64,
    /// Unix seconds; 0 when never connected
    pub last_connected_at: u64,
}

#[derive(Debug, Serialize)]
pub struct RoutingMetrics {
    pub messages_received: u64,
    pub messages_routed: u64,
    pub messages_malformed: u64,
    pub messages_ignored: u64,
}

#[derive(Debug, Serialize)]
pub struct CommandMetrics {
    pub commands_published: u64,
    pub commands_rejected: u64,
    pub publish_failures: u64,
    pub topic_errors: u64,
    pub refresh_polls: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
