//! Connection manager: owns at most one broker session
//!
//! The manager opens and tears down sessions in response to credentials and
//! the connection gate, and folds the current session's lifecycle events
//! into the [`StatusBoard`]. Events tagged with any other [`SessionId`] are
//! discarded before they can touch state.

use super::status::{ConnectionStatus, StatusBoard};
use crate::config::BrokerSection;
use crate::credentials::Credentials;
use crate::error::StatusError;
use crate::observability::metrics::metrics;
use crate::routing::TopicFacade;
use crate::transport::{
    qos_from_level, EventSink, LifecycleEvent, SessionEvent, SessionId, SessionOptions, Transport,
    TransportEvent, TransportSession,
};
use rumqttc::QoS;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct ActiveSession<S> {
    id: SessionId,
    client_id: String,
    transport: S,
}

pub struct ConnectionManager<T: Transport> {
    transport: T,
    broker: BrokerSection,
    board: StatusBoard,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    session: Option<ActiveSession<T::Session>>,
    last_session: SessionId,
    credentials: Option<Credentials>,
    gate_open: bool,
    subscribe_qos: QoS,
    publish_qos: QoS,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager and the receiving end of its shared session event channel
    pub fn new(transport: T, broker: BrokerSection) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscribe_qos = qos_from_level(broker.subscribe_qos).unwrap_or(QoS::AtLeastOnce);
        let publish_qos = qos_from_level(broker.publish_qos).unwrap_or(QoS::AtMostOnce);
        let manager = Self {
            transport,
            broker,
            board: StatusBoard::new(),
            events_tx,
            session: None,
            last_session: SessionId(0),
            credentials: None,
            gate_open: true,
            subscribe_qos,
            publish_qos,
        };
        (manager, events_rx)
    }

    /// Open a session for `credentials`, replacing any current one.
    /// Returns true when a session was opened
    pub fn activate(&mut self, credentials: Credentials) -> bool {
        if !credentials.is_complete() {
            debug!("Activation skipped: incomplete credentials");
            return false;
        }

        self.credentials = Some(credentials.clone());
        if !self.gate_open {
            info!(username = %credentials.username, "Connection gate closed, credentials kept for later");
            return false;
        }

        self.close_session();
        self.open_session(credentials)
    }

    fn open_session(&mut self, credentials: Credentials) -> bool {
        let id = self.last_session.next();
        self.last_session = id;
        let client_id = Uuid::new_v4().to_string();

        let _span = crate::session_span!(session = %id, client_id = %client_id).entered();
        let options = SessionOptions {
            client_id: client_id.clone(),
            credentials,
            broker: self.broker.clone(),
        };

        match self
            .transport
            .open(options, EventSink::new(id, self.events_tx.clone()))
        {
            Ok(transport) => {
                metrics().session_opened();
                info!("Session opened");
                self.session = Some(ActiveSession {
                    id,
                    client_id,
                    transport,
                });
                self.board.set_status(ConnectionStatus::Connecting);
                true
            }
            Err(e) => {
                warn!("Failed to open session: {}", e);
                self.board.fail(StatusError::general(e.to_string()));
                false
            }
        }
    }

    fn close_session(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        session.transport.close();
        metrics().session_closed();
        info!(session = %session.id, client_id = %session.client_id, "Session closed");
        true
    }

    /// Close the current session, if any. Idempotent
    pub fn deactivate(&mut self) {
        if !self.close_session() {
            debug!("Deactivate with no active session");
        }
        self.board.set_status(ConnectionStatus::Disconnected);
    }

    /// Allow or forbid sessions; remembered credentials survive a closed gate
    pub fn set_connection_gate(&mut self, enabled: bool) {
        if self.gate_open == enabled {
            return;
        }
        self.gate_open = enabled;
        info!(enabled, "Connection gate changed");

        if !enabled {
            self.deactivate();
        } else if let Some(credentials) = self.credentials.clone() {
            self.activate(credentials);
        }
    }

    /// Deactivate and drop the remembered credentials
    pub fn forget_credentials(&mut self) {
        self.credentials = None;
        self.deactivate();
    }

    /// Apply an event from the shared channel.
    /// Returns inbound messages of the current session for routing
    pub fn handle_event(&mut self, event: SessionEvent) -> Option<TransportEvent> {
        if self.current_session() != Some(event.session) {
            metrics().stale_event_discarded();
            debug!(
                session = %event.session,
                current = ?self.current_session(),
                "Discarding event from superseded session"
            );
            return None;
        }

        match event.event {
            TransportEvent::Lifecycle(lifecycle) => {
                if let LifecycleEvent::Error(message) = &lifecycle {
                    self.board.record_error(StatusError::general(message));
                }
                self.board.set_status(ConnectionStatus::after(&lifecycle));
                None
            }
            TransportEvent::SubscriptionRejected { pkid } => {
                metrics().topic_error();
                self.board.fail(StatusError::topic(format!(
                    "subscribe rejected by broker (packet {pkid})"
                )));
                None
            }
            message @ TransportEvent::Message { .. } => {
                metrics().message_received();
                Some(message)
            }
        }
    }

    /// Outbound view over the current session
    pub fn facade(&self) -> TopicFacade<'_, T::Session> {
        TopicFacade::new(
            self.session.as_ref().map(|session| &session.transport),
            &self.board,
            self.subscribe_qos,
            self.publish_qos,
        )
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn status(&self) -> ConnectionStatus {
        self.board.status()
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    /// Id given to the latest activation attempt, whether or not it opened
    pub fn last_attempt(&self) -> Option<SessionId> {
        (self.last_session != SessionId(0)).then_some(self.last_session)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.client_id.as_str())
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn is_gate_open(&self) -> bool {
        self.gate_open
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.close_session();
    }
}
