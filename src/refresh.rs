//! Refresh cycle: keeps gate status and statistics fresh while connected
//!
//! Entering `Connected` subscribes to every notification topic, requests a
//! status and statistics snapshot, and starts polling. Leaving `Connected`
//! stops polling and unsubscribes. The interval lives inside `Polling`, so
//! going back to `Idle` drops it and re-entry always starts a single new one.

use crate::observability::metrics::metrics;
use crate::protocol::{CommandPayload, NotificationTopic, OutboundCommand};
use crate::routing::{SubscribeOptions, TopicFacade};
use crate::session::ConnectionStatus;
use crate::transport::TransportSession;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

enum RefreshState {
    Idle,
    Polling { interval: Interval },
}

pub struct RefreshCycle {
    period: Duration,
    state: RefreshState,
}

impl RefreshCycle {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            state: RefreshState::Idle,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_polling(&self) -> bool {
        matches!(self.state, RefreshState::Polling { .. })
    }

    /// Follow a connection status change. Returns true when the cycle changed state
    pub fn on_status<S: TransportSession>(
        &mut self,
        status: ConnectionStatus,
        facade: &TopicFacade<'_, S>,
    ) -> bool {
        match (&self.state, status.is_connected()) {
            (RefreshState::Idle, true) => {
                info!(period_ms = self.period.as_millis() as u64, "Connected, starting refresh cycle");
                let outcome =
                    facade.subscribe(NotificationTopic::all_topics(), SubscribeOptions::default());
                if !outcome.all_succeeded() {
                    warn!(failed = ?outcome.failed, "Some notification topics could not be subscribed");
                }
                request_snapshot(facade);

                let mut interval = interval_at(Instant::now() + self.period, self.period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.state = RefreshState::Polling { interval };
                true
            }
            (RefreshState::Polling { .. }, false) => {
                info!(status = %status, "Left Connected, stopping refresh cycle");
                self.state = RefreshState::Idle;
                if facade.has_session() {
                    facade.unsubscribe(NotificationTopic::all_topics());
                } else {
                    debug!("Session already gone, nothing to unsubscribe");
                }
                true
            }
            _ => false,
        }
    }

    /// Wait for the next poll. Never completes while idle
    pub async fn tick(&mut self) {
        match &mut self.state {
            RefreshState::Polling { interval } => {
                interval.tick().await;
            }
            RefreshState::Idle => std::future::pending::<()>().await,
        }
    }

    /// Send the periodic requests
    pub fn on_tick<S: TransportSession>(&self, facade: &TopicFacade<'_, S>) {
        if !self.is_polling() {
            return;
        }
        metrics().refresh_poll();
        request_snapshot(facade);
    }
}

fn request_snapshot<S: TransportSession>(facade: &TopicFacade<'_, S>) {
    let requests = [
        OutboundCommand::RequestStatus(CommandPayload::on()),
        OutboundCommand::RequestStatistics(CommandPayload::on()),
    ];
    for request in &requests {
        if let Err(e) = facade.publish(request) {
            warn!(topic = %request.topic(), "Refresh request rejected: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PublishTopic;
    use crate::session::StatusBoard;
    use crate::testing::mocks::RecordingSession;
    use rumqttc::QoS;

    const PERIOD: Duration = Duration::from_secs(5);

    fn facade<'a>(
        session: &'a RecordingSession,
        board: &'a StatusBoard,
    ) -> TopicFacade<'a, RecordingSession> {
        TopicFacade::new(Some(session), board, QoS::AtLeastOnce, QoS::AtMostOnce)
    }

    fn requests_on(session: &RecordingSession, topic: PublishTopic) -> usize {
        session
            .published()
            .iter()
            .filter(|message| message.topic == topic.as_str())
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_entering_connected_subscribes_and_requests_once() {
        let session = RecordingSession::default();
        let board = StatusBoard::new();
        let mut cycle = RefreshCycle::new(PERIOD);

        assert!(cycle.on_status(ConnectionStatus::Connected, &facade(&session, &board)));
        assert!(!cycle.on_status(ConnectionStatus::Connected, &facade(&session, &board)));

        assert!(cycle.is_polling());
        assert_eq!(session.subscriptions().len(), NotificationTopic::ALL.len());
        assert_eq!(requests_on(&session, PublishTopic::GateStatus), 1);
        assert_eq!(requests_on(&session, PublishTopic::Statistics), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_period() {
        let session = RecordingSession::default();
        let board = StatusBoard::new();
        let mut cycle = RefreshCycle::new(PERIOD);
        cycle.on_status(ConnectionStatus::Connected, &facade(&session, &board));

        let started = Instant::now();
        cycle.tick().await;
        assert_eq!(started.elapsed(), PERIOD);
        cycle.on_tick(&facade(&session, &board));

        cycle.tick().await;
        assert_eq!(started.elapsed(), PERIOD * 2);
        cycle.on_tick(&facade(&session, &board));

        assert_eq!(requests_on(&session, PublishTopic::GateStatus), 3);
        assert_eq!(requests_on(&session, PublishTopic::Statistics), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_connected_unsubscribes_and_idles() {
        let session = RecordingSession::default();
        let board = StatusBoard::new();
        let mut cycle = RefreshCycle::new(PERIOD);
        cycle.on_status(ConnectionStatus::Connected, &facade(&session, &board));

        assert!(cycle.on_status(ConnectionStatus::Offline, &facade(&session, &board)));
        assert!(!cycle.is_polling());
        assert!(session.subscriptions().is_empty());

        let idle_tick = tokio::time::timeout(PERIOD * 3, cycle.tick()).await;
        assert!(idle_tick.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_while_idle_publishes_nothing() {
        let session = RecordingSession::default();
        let board = StatusBoard::new();
        let cycle = RefreshCycle::new(PERIOD);
        cycle.on_tick(&facade(&session, &board));
        assert!(session.published().is_empty());
    }
}
