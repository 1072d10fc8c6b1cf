//! Impure I/O for the MQTT transport
//!
//! Each session owns one rumqttc event loop running in a driver task. The
//! driver translates rumqttc events into [`LifecycleEvent`]s in the order a
//! browser MQTT client reports them (`close`, `offline`, `reconnect`,
//! `connect`), reconnects at a fixed period and resubscribes tracked topics
//! after every CONNACK.

use super::connection::{configure_mqtt_options, ReconnectPolicy, ReconnectStreak};
use super::message_handler::{EventRoute, FailureKind, MessageHandler};
use crate::observability::metrics::metrics;
use crate::transport::{
    EventSink, LifecycleEvent, SessionOptions, Transport, TransportError, TransportEvent,
    TransportSession,
};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, QoS};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Requests that can be queued before the event loop drains them
const REQUEST_CAPACITY: usize = 32;

/// Time a closing session gets to flush DISCONNECT before it is aborted
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type SubscriptionTable = Arc<Mutex<HashMap<String, QoS>>>;

/// Connection state shared between a session and its driver
#[derive(Debug, Default)]
struct SessionFlags {
    online: AtomicBool,
    closing: AtomicBool,
}

/// Opens rumqttc sessions over WebSocket
#[derive(Debug, Clone, Default)]
pub struct MqttTransport;

impl MqttTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for MqttTransport {
    type Session = MqttSession;

    fn open(&self, options: SessionOptions, sink: EventSink) -> Result<MqttSession, TransportError> {
        let mqtt_options = configure_mqtt_options(&options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let subscriptions: SubscriptionTable = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flags = Arc::new(SessionFlags::default());

        info!(
            session = %sink.session(),
            client_id = %options.client_id,
            username = %options.credentials.username,
            "Opening MQTT session"
        );

        let driver = SessionDriver {
            client: client.clone(),
            sink,
            subscriptions: subscriptions.clone(),
            policy: ReconnectPolicy::from_broker(&options.broker),
            streak: ReconnectStreak::default(),
            shutdown_rx,
            flags: flags.clone(),
            connected: false,
        };
        let handle = tokio::spawn(driver.run(event_loop));

        Ok(MqttSession {
            client,
            client_id: options.client_id,
            subscriptions,
            flags,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }
}

/// A live rumqttc session
pub struct MqttSession {
    client: AsyncClient,
    client_id: String,
    subscriptions: SubscriptionTable,
    flags: Arc<SessionFlags>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl MqttSession {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn track(&self, topic: &str, qos: Option<QoS>) {
        if let Ok(mut table) = self.subscriptions.lock() {
            match qos {
                Some(qos) => {
                    table.insert(topic.to_string(), qos);
                }
                None => {
                    table.remove(topic);
                }
            }
        }
    }
}

fn request_failed(operation: &'static str, error: rumqttc::ClientError) -> TransportError {
    TransportError::RequestFailed {
        operation,
        message: error.to_string(),
    }
}

impl TransportSession for MqttSession {
    fn publish(&self, topic: &str, payload: String, qos: QoS) -> Result<(), TransportError> {
        if self.handle.is_none() {
            return Err(TransportError::SessionClosed);
        }
        self.client
            .try_publish(topic, qos, false, payload)
            .map_err(|e| request_failed("publish", e))
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        if self.handle.is_none() {
            return Err(TransportError::SessionClosed);
        }
        self.client
            .try_subscribe(topic, qos)
            .map_err(|e| request_failed("subscribe", e))?;
        self.track(topic, Some(qos));
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        if self.handle.is_none() {
            return Err(TransportError::SessionClosed);
        }
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| request_failed("unsubscribe", e))?;
        self.track(topic, None);
        Ok(())
    }

    fn close(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        let shutdown_tx = self.shutdown_tx.take();
        self.flags.closing.store(true, Ordering::SeqCst);

        // An offline driver is connecting or waiting to reconnect and would
        // never drain DISCONNECT, so it is stopped right away
        let stop_now = if self.flags.online.load(Ordering::SeqCst) {
            match self.client.try_disconnect() {
                Ok(()) => false,
                Err(e) => {
                    warn!(client_id = %self.client_id, "Could not queue DISCONNECT: {}", e);
                    true
                }
            }
        } else {
            true
        };
        if stop_now {
            if let Some(tx) = &shutdown_tx {
                let _ = tx.send(true);
            }
        }

        let client_id = self.client_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(CLOSE_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!(client_id = %client_id, "Session driver stopped"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(client_id = %client_id, "Session driver ended with error: {}", e)
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(client_id = %client_id, "Session driver did not stop in time, aborting");
                    if let Some(tx) = shutdown_tx {
                        let _ = tx.send(true);
                    }
                    handle.abort();
                }
            }
        });
        info!(client_id = %self.client_id, "MQTT session closed");
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

/// State owned by the driver task of one session
struct SessionDriver {
    client: AsyncClient,
    sink: EventSink,
    subscriptions: SubscriptionTable,
    policy: ReconnectPolicy,
    streak: ReconnectStreak,
    shutdown_rx: watch::Receiver<bool>,
    flags: Arc<SessionFlags>,
    connected: bool,
}

impl SessionDriver {
    async fn run(mut self, mut event_loop: EventLoop) {
        let session = self.sink.session();
        debug!(session = %session, "Session driver started");

        loop {
            let polled = tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!(session = %session, "Shutdown signal received, stopping session driver");
                        break;
                    }
                    continue;
                }

                polled = event_loop.poll() => polled,
            };

            let keep_running = match polled {
                Ok(event) => self.handle_event(event),
                Err(error) => self.handle_failure(error).await,
            };
            if !keep_running {
                break;
            }
        }

        debug!(session = %session, "Session driver stopped");
    }

    /// Returns false when the driver should stop
    fn handle_event(&mut self, event: Event) -> bool {
        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::ConnectionAcknowledged => {
                self.connected = true;
                self.flags.online.store(true, Ordering::SeqCst);
                self.streak.reset();
                self.resubscribe_to_topics();
                self.sink.lifecycle(LifecycleEvent::Connect)
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(session = %self.sink.session(), topic = %topic, "Message received");
                self.sink.emit(TransportEvent::Message { topic, payload })
            }
            EventRoute::BrokerDisconnected => {
                self.sink.lifecycle(LifecycleEvent::Disconnect)
            }
            EventRoute::SubscriptionAcknowledged { pkid, rejected } => {
                if rejected {
                    warn!(session = %self.sink.session(), pkid, "Broker rejected subscription");
                    return self.sink.emit(TransportEvent::SubscriptionRejected { pkid });
                }
                debug!(session = %self.sink.session(), pkid, "Subscription acknowledged");
                true
            }
            EventRoute::LocalDisconnect => {
                self.sink.lifecycle(LifecycleEvent::Close);
                false
            }
            EventRoute::Infrastructure(description) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", description);
                true
            }
            EventRoute::Outgoing => true,
        }
    }

    /// Report a failed poll and wait out the reconnect period.
    /// Returns false when the driver should stop
    async fn handle_failure(&mut self, error: ConnectionError) -> bool {
        let session = self.sink.session();
        let was_connected = std::mem::replace(&mut self.connected, false);
        self.flags.online.store(false, Ordering::SeqCst);

        match MessageHandler::classify_failure(&error) {
            FailureKind::Refused(message) => {
                error!(session = %session, "MQTT connection refused: {}", message);
                self.sink.lifecycle(LifecycleEvent::Error(message));
            }
            FailureKind::Network(message) if !was_connected => {
                error!(session = %session, "MQTT connection attempt failed: {}", message);
                self.sink.lifecycle(LifecycleEvent::Error(message));
            }
            FailureKind::Network(message) => {
                warn!(session = %session, "MQTT connection lost: {}", message);
            }
        }

        if !self.sink.lifecycle(LifecycleEvent::Close) {
            return false;
        }
        if self.flags.closing.load(Ordering::SeqCst) {
            debug!(session = %session, "Session closed while offline, not reconnecting");
            return false;
        }
        if self.streak.record_failure() && !self.sink.lifecycle(LifecycleEvent::Offline) {
            return false;
        }

        let delay = self.policy.delay();
        info!(
            session = %session,
            attempt = self.streak.failures(),
            "Reconnecting in {}ms",
            delay.as_millis()
        );
        if !interruptible_sleep(self.shutdown_rx.clone(), delay).await {
            return false;
        }

        metrics().record_reconnect_attempt();
        self.sink.lifecycle(LifecycleEvent::Reconnect)
    }

    fn resubscribe_to_topics(&self) {
        let topics: Vec<(String, QoS)> = match self.subscriptions.lock() {
            Ok(table) => table.iter().map(|(t, q)| (t.clone(), *q)).collect(),
            Err(_) => return,
        };
        for (topic, qos) in topics {
            if let Err(e) = self.client.try_subscribe(topic.as_str(), qos) {
                error!("Failed to re-subscribe to {}: {}", topic, e);
            } else {
                tracing::debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic);
            }
        }
    }
}

/// Sleep unless shutdown is requested first.
/// Returns true if the sleep completed
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
            }
            _ = &mut sleep => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_interruptible_sleep_completes() {
        let (_tx, rx) = watch::channel(false);
        assert!(interruptible_sleep(rx, Duration::from_millis(5000)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruptible_sleep_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let sleeper = tokio::spawn(interruptible_sleep(rx, Duration::from_secs(60)));
        tx.send(true).unwrap();
        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruptible_sleep_ignores_false_signal() {
        let (tx, rx) = watch::channel(false);
        let started = tokio::time::Instant::now();
        let sleeper = tokio::spawn(interruptible_sleep(rx, Duration::from_secs(5)));
        tx.send(false).unwrap();
        assert!(sleeper.await.unwrap());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruptible_sleep_skips_when_already_shut_down() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(!interruptible_sleep(rx, Duration::from_secs(60)).await);
    }
}
