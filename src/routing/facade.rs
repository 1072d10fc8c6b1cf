//! Outbound side of the topic catalog
//!
//! The façade validates commands against the catalog, serializes them and
//! hands them to the active session. Failures never propagate as `Err`
//! except for payload validation: transport failures become Topic errors on
//! the status board and flip the status to `Error`.

use crate::error::StatusError;
use crate::observability::metrics::metrics;
use crate::protocol::{lookup, CommandError, Direction, OutboundCommand};
use crate::session::StatusBoard;
use crate::transport::TransportSession;
use rumqttc::QoS;
use serde_json::Value;
use tracing::{debug, warn};

/// Per-call subscription options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubscribeOptions {
    /// Overrides the configured subscribe QoS
    pub qos: Option<QoS>,
}

impl SubscribeOptions {
    pub fn with_qos(qos: QoS) -> Self {
        Self { qos: Some(qos) }
    }
}

/// Result of a subscribe/unsubscribe batch; each topic is handled on its own
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Not in the catalog, or no session to send on
    pub skipped: Vec<String>,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum BatchOperation {
    Subscribe(QoS),
    Unsubscribe,
}

impl BatchOperation {
    fn name(&self) -> &'static str {
        match self {
            BatchOperation::Subscribe(_) => "subscribe",
            BatchOperation::Unsubscribe => "unsubscribe",
        }
    }
}

/// Borrowed view over the current session used to send commands
pub struct TopicFacade<'a, S> {
    session: Option<&'a S>,
    board: &'a StatusBoard,
    subscribe_qos: QoS,
    publish_qos: QoS,
}

impl<'a, S: TransportSession> TopicFacade<'a, S> {
    pub fn new(
        session: Option<&'a S>,
        board: &'a StatusBoard,
        subscribe_qos: QoS,
        publish_qos: QoS,
    ) -> Self {
        Self {
            session,
            board,
            subscribe_qos,
            publish_qos,
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Publish a typed command
    pub fn publish(&self, command: &OutboundCommand) -> Result<(), CommandError> {
        let payload = command.encode().map_err(|e| {
            metrics().command_rejected();
            e
        })?;
        self.send(command.topic().as_str(), payload);
        Ok(())
    }

    /// Publish an untyped payload after checking it against the topic's declared shape
    pub fn publish_raw(&self, topic: &str, payload: &Value) -> Result<(), CommandError> {
        let command = OutboundCommand::from_wire(topic, payload).map_err(|e| {
            metrics().command_rejected();
            warn!(topic = %topic, "Rejected outbound payload: {}", e);
            e
        })?;
        self.publish(&command)
    }

    fn send(&self, topic: &str, payload: String) {
        let Some(session) = self.session else {
            warn!(topic = %topic, "No active session, publish dropped");
            return;
        };

        let _span = crate::mqtt_span!(operation = "publish", topic = %topic).entered();
        match session.publish(topic, payload, self.publish_qos) {
            Ok(()) => {
                metrics().command_published();
                debug!("Command queued");
            }
            Err(e) => {
                metrics().publish_failed();
                metrics().topic_error();
                self.board
                    .fail(StatusError::topic(format!("publish to {topic} failed: {e}")));
            }
        }
    }

    /// Subscribe to each topic independently
    pub fn subscribe<I, T>(&self, topics: I, options: SubscribeOptions) -> BatchOutcome
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let qos = options.qos.unwrap_or(self.subscribe_qos);
        self.run_batch(topics, BatchOperation::Subscribe(qos))
    }

    /// Unsubscribe from each topic independently
    pub fn unsubscribe<I, T>(&self, topics: I) -> BatchOutcome
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.run_batch(topics, BatchOperation::Unsubscribe)
    }

    fn run_batch<I, T>(&self, topics: I, operation: BatchOperation) -> BatchOutcome
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut outcome = BatchOutcome::default();

        let Some(session) = self.session else {
            outcome.skipped = topics.into_iter().map(|t| t.as_ref().to_string()).collect();
            warn!(
                operation = operation.name(),
                topics = outcome.skipped.len(),
                "No active session, request dropped"
            );
            return outcome;
        };

        for topic in topics {
            let topic = topic.as_ref();
            let subscribable = lookup(topic)
                .map(|entry| entry.direction == Direction::Subscribe)
                .unwrap_or(false);
            if !subscribable {
                warn!(operation = operation.name(), topic = %topic, "Topic is not a notification topic, skipped");
                outcome.skipped.push(topic.to_string());
                continue;
            }

            let result = match operation {
                BatchOperation::Subscribe(qos) => session.subscribe(topic, qos),
                BatchOperation::Unsubscribe => session.unsubscribe(topic),
            };
            match result {
                Ok(()) => {
                    debug!(operation = operation.name(), topic = %topic, "Request queued");
                    outcome.succeeded.push(topic.to_string());
                }
                Err(e) => {
                    metrics().topic_error();
                    self.board.fail(StatusError::topic(format!(
                        "{} {} failed: {}",
                        operation.name(),
                        topic,
                        e
                    )));
                    outcome.failed.push(topic.to_string());
                }
            }
        }

        outcome
    }
}
