//! Gate client runtime
//!
//! [`GateClient`] is a single task that owns the connection manager, the
//! message router, the refresh cycle and the watchdog. Consumer commands,
//! session events, refresh ticks and the watchdog deadline are all handled
//! one at a time in its `select!` loop. Consumers talk to it through a
//! cloneable [`GateHandle`].

use crate::config::GateConfig;
use crate::credentials::Credentials;
use crate::error::{GateError, GateResult, StatusError};
use crate::protocol::{
    CommandError, CommandPayload, GateAction, GateStatistics, GateStatus, OutboundCommand,
    StatisticsResetType,
};
use crate::refresh::RefreshCycle;
use crate::routing::{BatchOutcome, GateEvent, MessageRouter, SubscribeOptions};
use crate::session::{ConnectionManager, ConnectionStatus, ConnectionWatchdog};
use crate::transport::{SessionEvent, Transport, TransportEvent};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

const COMMAND_CAPACITY: usize = 100;

/// Foreground/background state of the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Active,
    Background,
}

/// Requests accepted by the runtime
#[derive(Debug)]
pub enum ClientCommand {
    Activate(Credentials),
    Deactivate,
    SetConnectionGate(bool),
    AppState(AppState),
    ForgetCredentials,
    Publish {
        command: OutboundCommand,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    PublishRaw {
        topic: String,
        payload: Value,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Subscribe {
        topics: Vec<String>,
        options: SubscribeOptions,
        reply: oneshot::Sender<BatchOutcome>,
    },
    Unsubscribe {
        topics: Vec<String>,
        reply: oneshot::Sender<BatchOutcome>,
    },
    /// Answered once everything queued before it has been handled
    Flush(oneshot::Sender<()>),
    Shutdown,
}

enum Wake {
    Command(ClientCommand),
    Session(SessionEvent),
    Refresh,
    Watchdog,
    Stop,
}

pub struct GateClient<T: Transport> {
    manager: ConnectionManager<T>,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    commands: mpsc::Receiver<ClientCommand>,
    router: MessageRouter,
    refresh: RefreshCycle,
    watchdog: ConnectionWatchdog,
}

impl<T> GateClient<T>
where
    T: Transport + 'static,
    T::Session: 'static,
{
    pub fn new(transport: T, config: &GateConfig) -> (Self, GateHandle) {
        let (manager, session_events) = ConnectionManager::new(transport, config.broker.clone());
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let router = MessageRouter::new();

        let handle = GateHandle {
            commands: commands_tx,
            status: manager.board().watch_status(),
            latest_error: manager.board().watch_error(),
            gate_status: router.watch_gate_status(),
            statistics: router.watch_statistics(),
            events: router.event_sender(),
        };

        let client = Self {
            manager,
            session_events,
            commands,
            router,
            refresh: RefreshCycle::new(config.session.refresh_interval()),
            watchdog: ConnectionWatchdog::new(config.session.connection_timeout()),
        };
        (client, handle)
    }

    /// Build the client and run it on its own task
    pub fn spawn(transport: T, config: &GateConfig) -> (GateHandle, JoinHandle<()>) {
        let (client, handle) = Self::new(transport, config);
        (handle, tokio::spawn(client.run()))
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!("Gate client running");

        loop {
            let deadline = self.watchdog.deadline();
            // Session events drain before consumer commands
            let wake = tokio::select! {
                biased;
                Some(event) = self.session_events.recv() => Wake::Session(event),
                command = self.commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::Stop,
                },
                _ = self.refresh.tick() => Wake::Refresh,
                _ = watchdog_deadline(deadline) => Wake::Watchdog,
            };

            match wake {
                Wake::Command(ClientCommand::Shutdown) | Wake::Stop => break,
                Wake::Command(command) => self.handle_command(command),
                Wake::Session(event) => {
                    if let Some(TransportEvent::Message { topic, payload }) =
                        self.manager.handle_event(event)
                    {
                        self.router.dispatch(&topic, &payload);
                    }
                }
                Wake::Refresh => self.refresh.on_tick(&self.manager.facade()),
                Wake::Watchdog => {
                    if let Some(advisory) = self.watchdog.poll_expired(Instant::now()) {
                        self.router.emit_advisory(advisory);
                    }
                }
            }

            self.sync_status();
        }

        self.manager.deactivate();
        self.sync_status();
        info!("Gate client stopped");
    }

    fn handle_command(&mut self, command: ClientCommand) {
        debug!(command = ?command, "Handling client command");
        match command {
            ClientCommand::Activate(credentials) => {
                self.manager.activate(credentials);
            }
            ClientCommand::Deactivate => self.manager.deactivate(),
            ClientCommand::SetConnectionGate(enabled) => self.manager.set_connection_gate(enabled),
            ClientCommand::AppState(state) => {
                self.manager
                    .set_connection_gate(state == AppState::Active);
            }
            ClientCommand::ForgetCredentials => self.manager.forget_credentials(),
            ClientCommand::Publish { command, reply } => {
                let _ = reply.send(self.manager.facade().publish(&command));
            }
            ClientCommand::PublishRaw {
                topic,
                payload,
                reply,
            } => {
                let _ = reply.send(self.manager.facade().publish_raw(&topic, &payload));
            }
            ClientCommand::Subscribe {
                topics,
                options,
                reply,
            } => {
                let _ = reply.send(self.manager.facade().subscribe(&topics, options));
            }
            ClientCommand::Unsubscribe { topics, reply } => {
                let _ = reply.send(self.manager.facade().unsubscribe(&topics));
            }
            ClientCommand::Flush(reply) => {
                let _ = reply.send(());
            }
            ClientCommand::Shutdown => {}
        }
    }

    /// Bring the refresh cycle and watchdog in line with the current status
    fn sync_status(&mut self) {
        // Entering or leaving Connected can itself fail a subscription and
        // flip the status, so settle until the cycle stops changing
        while self
            .refresh
            .on_status(self.manager.status(), &self.manager.facade())
        {}

        self.watchdog.observe(
            self.manager.last_attempt(),
            self.manager.status(),
            Instant::now(),
        );
    }
}

async fn watchdog_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable consumer handle
#[derive(Debug, Clone)]
pub struct GateHandle {
    commands: mpsc::Sender<ClientCommand>,
    status: watch::Receiver<ConnectionStatus>,
    latest_error: watch::Receiver<Option<StatusError>>,
    gate_status: watch::Receiver<Option<GateStatus>>,
    statistics: watch::Receiver<Option<GateStatistics>>,
    events: broadcast::Sender<GateEvent>,
}

impl GateHandle {
    async fn send(&self, command: ClientCommand) -> GateResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| GateError::ClientStopped)
    }

    async fn request<R>(
        &self,
        command: ClientCommand,
        reply: oneshot::Receiver<R>,
    ) -> GateResult<R> {
        self.send(command).await?;
        reply.await.map_err(|_| GateError::ClientStopped)
    }

    pub async fn activate(&self, credentials: Credentials) -> GateResult<()> {
        self.send(ClientCommand::Activate(credentials)).await
    }

    pub async fn deactivate(&self) -> GateResult<()> {
        self.send(ClientCommand::Deactivate).await
    }

    pub async fn set_connection_gate(&self, enabled: bool) -> GateResult<()> {
        self.send(ClientCommand::SetConnectionGate(enabled)).await
    }

    pub async fn set_app_state(&self, state: AppState) -> GateResult<()> {
        self.send(ClientCommand::AppState(state)).await
    }

    pub async fn forget_credentials(&self) -> GateResult<()> {
        self.send(ClientCommand::ForgetCredentials).await
    }

    /// Wait until the runtime has handled every command and session event
    /// queued before this call
    pub async fn flush(&self) -> GateResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::Flush(reply), rx).await
    }

    pub async fn shutdown(&self) -> GateResult<()> {
        self.send(ClientCommand::Shutdown).await
    }

    pub async fn publish(&self, command: OutboundCommand) -> GateResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(ClientCommand::Publish { command, reply }, rx)
            .await?
            .map_err(GateError::from)
    }

    /// Publish an untyped JSON payload, checked against the topic's payload shape
    pub async fn publish_raw(&self, topic: &str, payload: Value) -> GateResult<()> {
        let (reply, rx) = oneshot::channel();
        let command = ClientCommand::PublishRaw {
            topic: topic.to_string(),
            payload,
            reply,
        };
        self.request(command, rx).await?.map_err(GateError::from)
    }

    pub async fn subscribe<I, S>(&self, topics: I, options: SubscribeOptions) -> GateResult<BatchOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (reply, rx) = oneshot::channel();
        let command = ClientCommand::Subscribe {
            topics: topics.into_iter().map(Into::into).collect(),
            options,
            reply,
        };
        self.request(command, rx).await
    }

    pub async fn unsubscribe<I, S>(&self, topics: I) -> GateResult<BatchOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (reply, rx) = oneshot::channel();
        let command = ClientCommand::Unsubscribe {
            topics: topics.into_iter().map(Into::into).collect(),
            reply,
        };
        self.request(command, rx).await
    }

    /// Trigger a gate action, attributed to `user` when given
    pub async fn press(&self, action: GateAction, user: Option<&str>) -> GateResult<()> {
        self.publish(action.command(user)).await
    }

    pub async fn request_status(&self) -> GateResult<()> {
        self.publish(OutboundCommand::RequestStatus(CommandPayload::on()))
            .await
    }

    pub async fn request_statistics(&self) -> GateResult<()> {
        self.publish(OutboundCommand::RequestStatistics(CommandPayload::on()))
            .await
    }

    pub async fn reset_statistics(&self, scope: StatisticsResetType) -> GateResult<()> {
        self.publish(OutboundCommand::ResetStatistics(scope)).await
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn latest_error(&self) -> Option<StatusError> {
        self.latest_error.borrow().clone()
    }

    pub fn watch_error(&self) -> watch::Receiver<Option<StatusError>> {
        self.latest_error.clone()
    }

    pub fn gate_status(&self) -> Option<GateStatus> {
        self.gate_status.borrow().clone()
    }

    pub fn watch_gate_status(&self) -> watch::Receiver<Option<GateStatus>> {
        self.gate_status.clone()
    }

    pub fn statistics(&self) -> Option<GateStatistics> {
        self.statistics.borrow().clone()
    }

    pub fn watch_statistics(&self) -> watch::Receiver<Option<GateStatistics>> {
        self.statistics.clone()
    }

    /// Receiver for events broadcast from now on
    pub fn events(&self) -> broadcast::Receiver<GateEvent> {
        self.events.subscribe()
    }

    /// Wait until the status satisfies `predicate`, or the runtime stops
    pub async fn wait_for_status<F>(&self, predicate: F) -> GateResult<ConnectionStatus>
    where
        F: FnMut(&ConnectionStatus) -> bool,
    {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(predicate)
            .await
            .map_err(|_| GateError::ClientStopped)?;
        Ok(*reached)
    }

    /// Wait for `Connected`.
    ///
    /// An `Error` status, or any error recorded after the call, ends the wait
    /// with [`GateError::ConnectionFailed`]. A refused CONNACK is followed by
    /// `Close` and `Offline` at once, so the status alone can miss it.
    pub async fn wait_connected(&self) -> GateResult<()> {
        let mut status = self.status.clone();
        let mut errors = self.latest_error.clone();
        errors.borrow_and_update();

        loop {
            match *status.borrow_and_update() {
                ConnectionStatus::Connected => return Ok(()),
                ConnectionStatus::Error => {
                    let error = errors
                        .borrow()
                        .clone()
                        .unwrap_or_else(|| StatusError::general("unknown error"));
                    return Err(GateError::ConnectionFailed(error));
                }
                _ => {}
            }

            tokio::select! {
                biased;

                changed = status.changed() => {
                    changed.map_err(|_| GateError::ClientStopped)?;
                }
                changed = errors.changed() => {
                    changed.map_err(|_| GateError::ClientStopped)?;
                    if let Some(error) = errors.borrow_and_update().clone() {
                        return Err(GateError::ConnectionFailed(error));
                    }
                }
            }
        }
    }
}
