//! Mock transport for testing
//!
//! [`MockTransport`] records every session it opens and lets tests push
//! lifecycle and message events into a chosen session's sink, without a
//! broker. Sessions share the transport's recorder so tests can inspect
//! traffic after the manager has dropped or replaced them.

use crate::transport::{
    EventSink, LifecycleEvent, SessionId, SessionOptions, Transport, TransportError,
    TransportEvent, TransportSession,
};
use bytes::Bytes;
use rumqttc::QoS;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A publish request seen by a mock session
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub session: Option<SessionId>,
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
}

/// What the mock knows about an opened session
#[derive(Debug, Clone)]
pub struct OpenedSession {
    pub client_id: String,
    pub username: String,
    pub sink: EventSink,
}

#[derive(Debug, Default)]
struct Recorder {
    opened: Vec<OpenedSession>,
    closed: Vec<SessionId>,
    published: Vec<PublishedMessage>,
    subscribe_calls: Vec<String>,
    unsubscribe_calls: Vec<String>,
    subscriptions: HashMap<String, QoS>,
    failing_topics: HashSet<String>,
    fail_publish: bool,
    fail_open: Option<String>,
}

type SharedRecorder = Arc<Mutex<Recorder>>;

fn lock(recorder: &SharedRecorder) -> MutexGuard<'_, Recorder> {
    recorder
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport double; clones share the same recorder
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    recorder: SharedRecorder,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` calls fail with `message`
    pub fn fail_open(&self, message: &str) {
        lock(&self.recorder).fail_open = Some(message.to_string());
    }

    /// Make subscribe/unsubscribe fail for `topic`
    pub fn fail_topic(&self, topic: &str) {
        lock(&self.recorder).failing_topics.insert(topic.to_string());
    }

    pub fn fail_publish(&self, fail: bool) {
        lock(&self.recorder).fail_publish = fail;
    }

    pub fn opened_count(&self) -> usize {
        lock(&self.recorder).opened.len()
    }

    pub fn opened(&self) -> Vec<OpenedSession> {
        lock(&self.recorder).opened.clone()
    }

    pub fn closed_sessions(&self) -> Vec<SessionId> {
        lock(&self.recorder).closed.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.recorder).published.clone()
    }

    /// Published messages on one topic
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        lock(&self.recorder)
            .published
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    pub fn subscribe_calls(&self) -> Vec<String> {
        lock(&self.recorder).subscribe_calls.clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<String> {
        lock(&self.recorder).unsubscribe_calls.clone()
    }

    /// Topics currently subscribed across all sessions
    pub fn subscriptions(&self) -> HashMap<String, QoS> {
        lock(&self.recorder).subscriptions.clone()
    }

    pub fn clear_history(&self) {
        let mut recorder = lock(&self.recorder);
        recorder.published.clear();
        recorder.subscribe_calls.clear();
        recorder.unsubscribe_calls.clear();
    }

    /// Push an event into the sink of the `index`-th opened session
    pub fn emit_to(&self, index: usize, event: TransportEvent) -> bool {
        let sink = lock(&self.recorder)
            .opened
            .get(index)
            .map(|session| session.sink.clone());
        sink.map(|sink| sink.emit(event)).unwrap_or(false)
    }

    /// Push an event into the most recently opened session
    pub fn emit_latest(&self, event: TransportEvent) -> bool {
        let count = self.opened_count();
        count > 0 && self.emit_to(count - 1, event)
    }

    pub fn lifecycle_latest(&self, event: LifecycleEvent) -> bool {
        self.emit_latest(TransportEvent::Lifecycle(event))
    }

    /// Deliver a broker message to the most recent session
    pub fn message_latest(&self, topic: &str, payload: &str) -> bool {
        self.emit_latest(TransportEvent::Message {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        })
    }
}

impl Transport for MockTransport {
    type Session = RecordingSession;

    fn open(
        &self,
        options: SessionOptions,
        sink: EventSink,
    ) -> Result<RecordingSession, TransportError> {
        let mut recorder = lock(&self.recorder);
        if let Some(message) = &recorder.fail_open {
            return Err(TransportError::Options(message.clone()));
        }
        let session = sink.session();
        recorder.opened.push(OpenedSession {
            client_id: options.client_id,
            username: options.credentials.username,
            sink,
        });
        Ok(RecordingSession {
            id: Some(session),
            recorder: self.recorder.clone(),
            closed: false,
        })
    }
}

/// Session double that records traffic
#[derive(Debug)]
pub struct RecordingSession {
    id: Option<SessionId>,
    recorder: SharedRecorder,
    closed: bool,
}

impl Default for RecordingSession {
    /// Standalone session with its own recorder
    fn default() -> Self {
        Self {
            id: None,
            recorder: SharedRecorder::default(),
            closed: false,
        }
    }
}

impl RecordingSession {
    pub fn fail_topic(&self, topic: &str) {
        lock(&self.recorder).failing_topics.insert(topic.to_string());
    }

    pub fn fail_publish(&self, fail: bool) {
        lock(&self.recorder).fail_publish = fail;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.recorder).published.clone()
    }

    pub fn subscriptions(&self) -> HashMap<String, QoS> {
        lock(&self.recorder).subscriptions.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::SessionClosed);
        }
        Ok(())
    }
}

impl TransportSession for RecordingSession {
    fn publish(&self, topic: &str, payload: String, qos: QoS) -> Result<(), TransportError> {
        self.check_open()?;
        let mut recorder = lock(&self.recorder);
        if recorder.fail_publish {
            return Err(TransportError::RequestFailed {
                operation: "publish",
                message: "request queue full".to_string(),
            });
        }
        recorder.published.push(PublishedMessage {
            session: self.id,
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.check_open()?;
        let mut recorder = lock(&self.recorder);
        recorder.subscribe_calls.push(topic.to_string());
        if recorder.failing_topics.contains(topic) {
            return Err(TransportError::RequestFailed {
                operation: "subscribe",
                message: "not authorized".to_string(),
            });
        }
        recorder.subscriptions.insert(topic.to_string(), qos);
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.check_open()?;
        let mut recorder = lock(&self.recorder);
        recorder.unsubscribe_calls.push(topic.to_string());
        if recorder.failing_topics.contains(topic) {
            return Err(TransportError::RequestFailed {
                operation: "unsubscribe",
                message: "not authorized".to_string(),
            });
        }
        recorder.subscriptions.remove(topic);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(id) = self.id {
            lock(&self.recorder).closed.push(id);
        }
    }
}
