//! Live task client: the surface consumed by task UIs.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use live_task_core::{
    Agent, AgentStatus, ConnectionStatus, LiveConfig, LiveUpdate, Message, MessageLog, Transport,
    live_update::now_millis,
};
use live_task_transport::{Packet, ProtocolError};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use uuid::Uuid;

use crate::{
    connection::{ConnectionMachine, HopEvent, Transition},
    correlator::{CallCallback, CallError, CallFailure, CallOutcome, Correlator, PendingCall, Resolution},
    driver::{LinkDriver, sweep_calls},
    observer::LiveObserver,
};

/// Client lifecycle error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client destroyed")]
    Destroyed,
    #[error("connect() must be called from within a Tokio runtime")]
    NoRuntime,
}

/// Message could not be sent.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Connection destroyed before the message was sent")]
    Dropped,
    #[error("Client destroyed")]
    Destroyed,
    #[error("Failed to encode message: {0}")]
    Encode(#[from] ProtocolError),
}

/// Message composed locally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub text: String,
    pub task_data: Option<Value>,
    /// Marks the end of the sender's turn or task.
    pub episode_done: bool,
}

impl OutgoingMessage {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_task_data(mut self, task_data: Value) -> Self {
        self.task_data = Some(task_data);
        self
    }

    #[must_use]
    pub const fn done(mut self) -> Self {
        self.episode_done = true;
        self
    }
}

struct QueuedMessage {
    message: Message,
    done: oneshot::Sender<Result<Message, SendError>>,
}

/// Work that must run after the state lock is released.
enum Effect {
    Connection(ConnectionStatus),
    Agent(AgentStatus),
    Received(Message),
    Cleared,
    Complete(PendingCall, Result<Value, CallFailure>),
}

struct State {
    connection: ConnectionMachine,
    agent: Agent,
    correlator: Correlator,
    /// Identity attached by `connect()`.
    identity: Option<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    outbox: VecDeque<QueuedMessage>,
    tasks: Vec<JoinHandle<()>>,
    destroyed: bool,
}

impl State {
    /// Hand a message to the link. Returns false when no link takes frames.
    fn transmit(&self, log: &MessageLog, message: &Message) -> Result<bool, SendError> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Ok(false);
        };
        let frame = Packet::update(LiveUpdate::Message(message.to_packet())).encode()?;
        if outbound.send(frame).is_err() {
            return Ok(false);
        }
        log.append(message.clone());
        Ok(true)
    }

    fn flush_outbox(&mut self, log: &MessageLog) {
        while let Some(queued) = self.outbox.pop_front() {
            match self.transmit(log, &queued.message) {
                Ok(true) => {
                    let _ = queued.done.send(Ok(queued.message));
                }
                Ok(false) => {
                    self.outbox.push_front(queued);
                    break;
                }
                Err(e) => {
                    let _ = queued.done.send(Err(e));
                }
            }
        }
    }

    fn sender_id(&self) -> Option<String> {
        self.agent.agent_id.clone().or_else(|| self.identity.clone())
    }
}

/// State shared between the client handle and its background tasks.
pub(crate) struct Shared {
    config: LiveConfig,
    log: MessageLog,
    state: Mutex<State>,
    observers: RwLock<Vec<Arc<dyn LiveObserver>>>,
}

impl Shared {
    pub(crate) fn new(config: LiveConfig) -> Self {
        let state = State {
            connection: ConnectionMachine::new(config.reconnect.clone()),
            agent: Agent::new(),
            correlator: Correlator::new(config.call_timeout()),
            identity: None,
            outbound: None,
            outbox: VecDeque::new(),
            tasks: Vec::new(),
            destroyed: false,
        };
        Self {
            config,
            log: MessageLog::new(),
            state: Mutex::new(state),
            observers: RwLock::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) const fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.lock().connection.status()
    }

    /// Id to register with: the server-assigned one once known.
    pub(crate) fn identity(&self) -> Option<String> {
        self.lock().sender_id()
    }

    pub(crate) fn apply_hop(&self, event: HopEvent) -> Transition {
        let transition = self.lock().connection.apply(event, Instant::now());
        if transition.changed() {
            self.deliver(vec![Effect::Connection(transition.to)]);
        }
        transition
    }

    pub(crate) fn on_registered(&self, agent_id: &str) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock();
            state.agent.assign_id(agent_id);
            let transition = state.connection.apply(HopEvent::HandshakeComplete, Instant::now());
            if transition.changed() {
                effects.push(Effect::Connection(transition.to));
            }
            if state.connection.status().is_connected() {
                state.flush_outbox(&self.log);
            }
        }
        tracing::info!(agent_id, "registered with server");
        self.deliver(effects);
    }

    /// Route one inbound update to its owner.
    pub(crate) fn dispatch(&self, update: LiveUpdate) {
        match update {
            LiveUpdate::Message(packet) => {
                let message = Message::received(packet);
                if self.log.append(message.clone()).is_appended() {
                    self.deliver(vec![Effect::Received(message)]);
                }
            }
            LiveUpdate::SessionUpdate { session_state } => {
                let changed = self.lock().agent.apply(session_state);
                if let Some(status) = changed {
                    self.deliver(vec![Effect::Agent(status)]);
                }
            }
            LiveUpdate::CallRequest(request) => {
                tracing::debug!(
                    request_id = %request.request_id,
                    target = %request.target,
                    "ignoring server-initiated call"
                );
            }
            LiveUpdate::CallResponse(response) => {
                let resolution = self.lock().correlator.resolve(&response);
                if let Resolution::Resolved(call, value) = resolution {
                    self.deliver(vec![Effect::Complete(call, Ok(value))]);
                }
            }
        }
    }

    /// Evict calls past their deadline.
    pub(crate) fn sweep(&self) {
        let evicted = self.lock().correlator.sweep(Instant::now());
        self.deliver(
            evicted
                .into_iter()
                .map(|call| Effect::Complete(call, Err(CallFailure::TimedOut)))
                .collect(),
        );
    }

    fn deliver(&self, effects: Vec<Effect>) {
        if effects.is_empty() {
            return;
        }
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for effect in effects {
            match effect {
                Effect::Connection(status) => {
                    for observer in &observers {
                        observer.on_connection_status_change(status);
                    }
                }
                Effect::Agent(status) => {
                    for observer in &observers {
                        observer.on_agent_status_change(status);
                    }
                }
                Effect::Received(message) => {
                    for observer in &observers {
                        observer.on_message_received(&message);
                    }
                }
                Effect::Cleared => {
                    for observer in &observers {
                        observer.on_messages_cleared();
                    }
                }
                Effect::Complete(call, response) => call.complete(response),
            }
        }
    }
}

/// Handle to one live task session.
///
/// Cheap to clone; clones share the same connection. Background tasks run
/// from `connect()` until `destroy()`.
#[derive(Clone)]
pub struct LiveTaskClient {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
}

impl LiveTaskClient {
    /// Create a client. Nothing is opened until `connect()`.
    #[must_use]
    pub fn new(config: LiveConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            transport,
        }
    }

    /// Register an observer for status and message notifications.
    pub fn add_observer(&self, observer: Arc<dyn LiveObserver>) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Open the link and start the probe loop. Idempotent while running.
    ///
    /// # Errors
    /// Returns error if the client was destroyed or no Tokio runtime is
    /// available.
    pub fn connect(&self, agent_id: impl Into<String>) -> Result<(), ClientError> {
        let handle = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let agent_id = agent_id.into();

        let transition = {
            let mut state = self.shared.lock();
            if state.destroyed {
                return Err(ClientError::Destroyed);
            }
            if state.connection.status() != ConnectionStatus::NotStarted {
                tracing::debug!(agent_id = %agent_id, "connect() called while already started");
                return Ok(());
            }

            state.identity = Some(agent_id.clone());
            let transition = state.connection.apply(HopEvent::Started, Instant::now());

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            state.outbound = Some(outbound_tx);

            let driver = LinkDriver::new(
                Arc::clone(&self.shared),
                Arc::clone(&self.transport),
                outbound_rx,
            );
            state.tasks.push(handle.spawn(driver.run()));
            if self.shared.config.call_timeout().is_some() {
                state.tasks.push(handle.spawn(sweep_calls(
                    Arc::clone(&self.shared),
                    self.shared.config.sweep_interval(),
                )));
            }
            transition
        };

        tracing::info!(agent_id = %agent_id, "live task connection started");
        if transition.changed() {
            self.shared.deliver(vec![Effect::Connection(transition.to)]);
        }
        Ok(())
    }

    /// Tear down the link. Pending calls stay unresolved and queued
    /// messages fail with `SendError::Dropped`. The client cannot be
    /// connected again.
    pub fn destroy(&self) {
        let (tasks, transition) = {
            let mut state = self.shared.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.outbound = None;

            let abandoned = state.correlator.clear();
            if abandoned > 0 {
                tracing::info!(abandoned, "dropping pending calls on destroy");
            }
            for queued in state.outbox.drain(..) {
                let _ = queued.done.send(Err(SendError::Dropped));
            }

            let transition = state.connection.apply(HopEvent::Destroyed, Instant::now());
            (std::mem::take(&mut state.tasks), transition)
        };

        for task in tasks {
            task.abort();
        }
        tracing::info!("live task connection destroyed");
        if transition.changed() {
            self.shared.deliver(vec![Effect::Connection(transition.to)]);
        }
    }

    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Snapshot of the agent session.
    #[must_use]
    pub fn agent(&self) -> Agent {
        self.shared.lock().agent.clone()
    }

    #[must_use]
    pub fn agent_status(&self) -> AgentStatus {
        self.shared.lock().agent.status
    }

    /// The conversation log.
    #[must_use]
    pub fn messages(&self) -> &MessageLog {
        &self.shared.log
    }

    /// Reset the conversation, e.g. when a new session starts.
    pub fn clear_messages(&self) {
        self.shared.log.clear();
        self.shared.deliver(vec![Effect::Cleared]);
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.shared.lock().correlator.len()
    }

    #[must_use]
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.shared.lock().correlator.contains(request_id)
    }

    /// Issue a remote call and register `callback` for its response.
    ///
    /// Returns the request id once the transport accepted the request.
    ///
    /// # Errors
    /// Fails without touching the network when not connected, and when
    /// `args` cannot be serialized.
    pub fn call<A>(
        &self,
        target: &str,
        args: &A,
        callback: Option<CallCallback>,
    ) -> Result<String, CallError>
    where
        A: Serialize + ?Sized,
    {
        let mut state = self.shared.lock();
        let status = state.connection.status();
        if !status.is_connected() {
            return Err(CallError::NotConnected(status));
        }

        let args = serde_json::to_value(args)?;
        let request = state
            .correlator
            .prepare(state.sender_id().as_deref(), target, &args)?;
        let frame = Packet::update(LiveUpdate::CallRequest(request.clone()))
            .encode()
            .map_err(|ProtocolError::Json(e)| CallError::Serialize(e))?;

        let accepted = state
            .outbound
            .as_ref()
            .is_some_and(|outbound| outbound.send(frame).is_ok());
        if !accepted {
            return Err(CallError::NotConnected(status));
        }

        // Registered under the same lock the response path takes, so a
        // fast response cannot miss the entry.
        state
            .correlator
            .register(&request, args, callback, Instant::now());
        tracing::debug!(request_id = %request.request_id, target, "call issued");
        Ok(request.request_id)
    }

    /// `call` with a closure callback.
    ///
    /// # Errors
    /// See [`LiveTaskClient::call`].
    pub fn call_with<A, F>(&self, target: &str, args: &A, callback: F) -> Result<String, CallError>
    where
        A: Serialize + ?Sized,
        F: FnOnce(CallOutcome) + Send + 'static,
    {
        self.call(target, args, Some(Box::new(callback)))
    }

    /// Issue a call and wait for its response.
    ///
    /// # Errors
    /// Returns error if the call cannot be issued, times out, or the
    /// client is destroyed first.
    pub async fn call_async<A>(&self, target: &str, args: &A) -> Result<Value, CallError>
    where
        A: Serialize + ?Sized,
    {
        let (tx, rx) = oneshot::channel();
        self.call_with(target, args, move |outcome| {
            let _ = tx.send(outcome.response);
        })?;

        match rx.await {
            Ok(response) => Ok(response?),
            Err(_) => Err(CallFailure::Dropped.into()),
        }
    }

    /// Send a message as the local agent.
    ///
    /// Resolves once the transport accepted the message; it is appended
    /// to the log at that point. While not connected the message waits in
    /// a queue that is flushed on the next handshake.
    ///
    /// # Errors
    /// Returns error if the client is destroyed before the message leaves.
    pub async fn send_message(&self, outgoing: OutgoingMessage) -> Result<Message, SendError> {
        let pending = {
            let mut state = self.shared.lock();
            if state.destroyed {
                return Err(SendError::Destroyed);
            }

            let message = Message {
                id: Uuid::new_v4().to_string(),
                sender_id: state.sender_id(),
                text: outgoing.text,
                task_data: outgoing.task_data,
                episode_done: outgoing.episode_done,
                received_at: now_millis(),
            };

            if state.connection.status().is_connected() && state.transmit(&self.shared.log, &message)? {
                return Ok(message);
            }

            tracing::debug!(id = %message.id, "queueing message until connected");
            let (done, pending) = oneshot::channel();
            state.outbox.push_back(QueuedMessage { message, done });
            pending
        };

        pending.await.unwrap_or(Err(SendError::Dropped))
    }
}
