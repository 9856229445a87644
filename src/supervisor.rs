//! Top-level driver of the bot session.
//!
//! [`ConnectionSupervisor::run`] owns the [`ConnectionMachine`] and carries out
//! the commands it returns: building transports, starting pairing, starting
//! and stopping maintenance, and arming the single reconnect deadline. All
//! session state is owned by the one task running the loop; spawned work
//! (pairing, priming, event handlers, maintenance) only ever sees a
//! [`SessionContext`] and reports back through the internal channel.
//!
//! Message, call and credential events of one session are handled in arrival
//! order by a single dispatcher task that lives as long as the session.

use crate::handlers::{EventHandler, EventRouter, build_router};
use crate::maintenance::MaintenanceScheduler;
use crate::pairing::{FixedPhonePrompt, PairingCoordinator, PhonePrompt, StdinPhonePrompt};
use crate::transport::{SessionContext, SessionParams, Transport, TransportFactory};
use botcore::config::{BotConfig, ConfigError};
use botcore::disconnect::DisconnectReason;
use botcore::events::{
    ConnectionPhase, OutgoingMessage, STATUS_BROADCAST_JID, SendOptions, TransportEvent,
};
use botcore::machine::{Command, ConnectionMachine, ConnectionState, Generation, Input};
use botcore::pairing::PairingError;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no transport factory configured")]
    MissingTransportFactory,
}

/// Why [`ConnectionSupervisor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The account was logged out; reconnecting cannot help.
    LoggedOut { reason: DisconnectReason },
    /// The shutdown token was cancelled.
    Shutdown,
}

impl ExitReason {
    /// Process exit status for this outcome. Both are clean exits.
    pub fn exit_code(&self) -> i32 {
        0
    }
}

#[derive(Default)]
pub struct SupervisorBuilder {
    config: BotConfig,
    factory: Option<Arc<dyn TransportFactory>>,
    prompt: Option<Arc<dyn PhonePrompt>>,
    extra_handlers: Vec<Arc<dyn EventHandler>>,
}

impl SupervisorBuilder {
    pub fn with_config(mut self, config: BotConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Overrides where the pairing phone number comes from. Without this the
    /// configured `pairing_number` is used, or stdin when none is set.
    pub fn with_phone_prompt(mut self, prompt: Arc<dyn PhonePrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Registers a handler next to the built-in ones.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.extra_handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<ConnectionSupervisor, SupervisorError> {
        let factory = self
            .factory
            .ok_or(SupervisorError::MissingTransportFactory)?;

        let prompt = self.prompt.unwrap_or_else(|| match &self.config.pairing_number {
            Some(number) => Arc::new(FixedPhonePrompt(number.clone())) as Arc<dyn PhonePrompt>,
            None => Arc::new(StdinPhonePrompt),
        });

        let mut router = build_router(&self.config);
        for handler in self.extra_handlers {
            router.register(handler);
        }

        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        Ok(ConnectionSupervisor {
            machine: ConnectionMachine::new(self.config.reconnect_delay()),
            pairing: PairingCoordinator::new(&self.config, prompt),
            maintenance: MaintenanceScheduler::new(&self.config),
            router: Arc::new(router),
            live_generation: Arc::new(AtomicU64::new(0)),
            session: None,
            pairing_task: None,
            reconnect_at: None,
            internal_tx,
            internal_rx,
            shutdown: CancellationToken::new(),
            factory,
            config: self.config,
        })
    }
}

struct ActiveSession {
    context: SessionContext,
    events: mpsc::Receiver<TransportEvent>,
    dispatch: mpsc::UnboundedSender<TransportEvent>,
    dispatcher: JoinHandle<()>,
}

/// What woke the supervisor loop.
enum Wake {
    Shutdown,
    Internal(Input),
    Event(Generation, Option<TransportEvent>),
    ReconnectDue,
}

pub struct ConnectionSupervisor {
    config: BotConfig,
    factory: Arc<dyn TransportFactory>,
    machine: ConnectionMachine,
    pairing: PairingCoordinator,
    maintenance: MaintenanceScheduler,
    router: Arc<EventRouter>,
    live_generation: Arc<AtomicU64>,
    session: Option<ActiveSession>,
    pairing_task: Option<JoinHandle<()>>,
    reconnect_at: Option<Instant>,
    internal_tx: mpsc::UnboundedSender<Input>,
    internal_rx: mpsc::UnboundedReceiver<Input>,
    shutdown: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::default()
    }

    /// Cancelling the returned token makes [`run`](Self::run) tear the current
    /// session down and return [`ExitReason::Shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Runs until the account is logged out or shutdown is requested.
    ///
    /// Only a configuration problem is returned as an error; every transport
    /// failure ends in a reconnect instead.
    pub async fn run(mut self) -> Result<ExitReason, SupervisorError> {
        info!(target: "Supervisor", "Starting {} session supervisor", self.config.bot_name);

        if let Some(exit) = self.apply(Input::Start).await? {
            return Ok(exit);
        }

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                Some(input) = self.internal_rx.recv() => Wake::Internal(input),
                (generation, event) = next_event(&mut self.session) => Wake::Event(generation, event),
                _ = reconnect_deadline(self.reconnect_at) => Wake::ReconnectDue,
            };

            let input = match wake {
                Wake::Shutdown => {
                    info!(target: "Supervisor", "Shutdown requested");
                    self.teardown().await;
                    return Ok(ExitReason::Shutdown);
                }
                Wake::Internal(input) => Some(input),
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    info!(target: "Supervisor", "Reconnecting...");
                    Some(Input::ReconnectDue)
                }
                Wake::Event(generation, Some(event)) => self.route_event(generation, event),
                Wake::Event(generation, None) => {
                    warn!(target: "Supervisor", "Event stream of session {generation} ended without a close notification");
                    Some(Input::ConnectionClosed {
                        generation,
                        last_disconnect: None,
                    })
                }
            };

            if let Some(input) = input
                && let Some(exit) = self.apply(input).await?
            {
                return Ok(exit);
            }
        }
    }

    /// Connection updates go to the machine; everything else is queued for the
    /// session's dispatcher.
    fn route_event(&self, generation: Generation, event: TransportEvent) -> Option<Input> {
        match event {
            TransportEvent::ConnectionUpdate(update) => match update.connection {
                ConnectionPhase::Open => Some(Input::ConnectionOpened { generation }),
                ConnectionPhase::Close => Some(Input::ConnectionClosed {
                    generation,
                    last_disconnect: update.last_disconnect,
                }),
                ConnectionPhase::Connecting => {
                    debug!(target: "Supervisor", "Session {generation} connecting");
                    None
                }
            },
            event => {
                let Some(session) = &self.session else {
                    return None;
                };
                if session.dispatch.send(event).is_err() {
                    debug!(target: "Supervisor", "Dispatcher of session {generation} is gone, dropping event");
                }
                None
            }
        }
    }

    /// Feeds `input` to the machine and executes the resulting commands, plus
    /// any inputs those commands produce, until the queue drains.
    async fn apply(&mut self, input: Input) -> Result<Option<ExitReason>, SupervisorError> {
        let mut queue = VecDeque::from([input]);

        while let Some(input) = queue.pop_front() {
            let before = self.machine.state();
            let step = self.machine.handle(input);
            if step.state != before {
                info!(target: "Supervisor", "Connection state: {before:?} -> {:?}", step.state);
            }

            for command in step.commands {
                match command {
                    Command::CreateSession { generation } => {
                        queue.push_back(self.create_session(generation).await?);
                    }
                    Command::StartPairing { generation } => self.start_pairing(generation),
                    Command::StopPairing => self.stop_pairing(),
                    Command::ResetPairingAttempts => self.pairing.reset(),
                    Command::PrimeStatusSubscription { generation } => {
                        self.prime_status_subscription(generation)
                    }
                    Command::StartMaintenance { generation } => {
                        if let Some(context) = self.context_for(generation) {
                            self.maintenance.start(context);
                        }
                    }
                    Command::StopMaintenance => self.maintenance.stop(),
                    Command::ReleaseSession {
                        generation,
                        end_transport,
                    } => self.release_session(generation, end_transport),
                    Command::ScheduleReconnect { delay } => {
                        info!(target: "Supervisor", "Reconnecting in {delay:?}");
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                    Command::Terminate { reason } => {
                        error!(
                            target: "Supervisor",
                            "Connection closed: {reason}. Not reconnecting; link the device again to continue."
                        );
                        return Ok(Some(ExitReason::LoggedOut { reason }));
                    }
                }
            }
        }

        Ok(None)
    }

    async fn create_session(&mut self, generation: Generation) -> Result<Input, SupervisorError> {
        self.config.validate()?;

        let params = SessionParams {
            generation,
            protocol_version: self.config.protocol_version,
            browser: self.config.browser.clone(),
            bot_name: self.config.bot_name.clone(),
        };

        info!(target: "Supervisor", "Creating session {generation}");
        match self.factory.create_session(&params).await {
            Ok((transport, events)) => {
                let registered = transport.is_registered();
                self.live_generation.store(generation, Ordering::SeqCst);
                let context =
                    SessionContext::new(generation, transport, self.live_generation.clone());
                let (dispatch, queue) = mpsc::unbounded_channel();
                let dispatcher = tokio::spawn(run_dispatcher(
                    context.clone(),
                    self.router.clone(),
                    queue,
                ));
                self.session = Some(ActiveSession {
                    context,
                    events,
                    dispatch,
                    dispatcher,
                });
                Ok(Input::SessionCreated {
                    generation,
                    registered,
                })
            }
            Err(e) => {
                error!(target: "Supervisor", "Failed to create session {generation}: {e:?}");
                Ok(Input::BootstrapFailed {
                    error: format!("{e:#}"),
                })
            }
        }
    }

    fn context_for(&self, generation: Generation) -> Option<SessionContext> {
        self.session
            .as_ref()
            .filter(|s| s.context.generation == generation)
            .map(|s| s.context.clone())
    }

    fn start_pairing(&mut self, generation: Generation) {
        let Some(context) = self.context_for(generation) else {
            return;
        };
        self.stop_pairing();
        // Every session starts its sequence with a full budget.
        self.pairing.reset();

        let pairing = self.pairing.clone();
        let results = self.internal_tx.clone();
        self.pairing_task = Some(tokio::spawn(async move {
            let input = match pairing.request_pairing_code(&context).await {
                Ok(_) => Input::PairingSucceeded { generation },
                Err(PairingError::SessionClosed) => {
                    debug!(target: "Supervisor/Pairing", "Session {generation} closed during pairing");
                    return;
                }
                Err(PairingError::Exhausted { attempts }) => Input::PairingExhausted {
                    generation,
                    attempts,
                },
                Err(e) => {
                    warn!(target: "Supervisor/Pairing", "Pairing aborted: {e}");
                    Input::PairingExhausted {
                        generation,
                        attempts: pairing.attempts(),
                    }
                }
            };
            // The receiver only goes away together with the supervisor.
            let _ = results.send(input);
        }));
    }

    fn stop_pairing(&mut self) {
        if let Some(task) = self.pairing_task.take() {
            task.abort();
            debug!(target: "Supervisor/Pairing", "Pairing task stopped");
        }
    }

    fn prime_status_subscription(&self, generation: Generation) {
        let Some(context) = self.context_for(generation) else {
            return;
        };
        let owner = self.config.owner_jid();
        let notice = format!("*{}* is online.", self.config.bot_name);

        tokio::spawn(async move {
            // Expected to fail on a freshly linked device.
            if let Err(e) = context
                .transport
                .subscribe_presence(STATUS_BROADCAST_JID)
                .await
            {
                warn!(target: "Supervisor", "Status subscription priming failed: {e:?}");
            }

            let Some(owner) = owner else {
                return;
            };
            if !context.is_current() {
                return;
            }
            if let Err(e) = context
                .transport
                .send_message(&owner, OutgoingMessage::Text(notice), SendOptions::default())
                .await
            {
                warn!(target: "Supervisor", "Failed to notify owner: {e:?}");
            }
        });
    }

    fn release_session(&mut self, generation: Generation, end_transport: bool) {
        if self.context_for(generation).is_none() {
            return;
        }
        self.live_generation.store(0, Ordering::SeqCst);
        self.stop_pairing();

        // Dropping the session closes the dispatch queue and ends its dispatcher.
        let Some(session) = self.session.take() else {
            return;
        };
        debug!(target: "Supervisor", "Released session {generation}");
        if end_transport {
            let transport: Arc<dyn Transport> = session.context.transport;
            tokio::spawn(async move { transport.end().await });
        }
    }

    async fn teardown(&mut self) {
        self.maintenance.stop();
        self.reconnect_at = None;
        self.stop_pairing();
        self.live_generation.store(0, Ordering::SeqCst);
        if let Some(session) = self.session.take() {
            session.dispatcher.abort();
            session.context.transport.end().await;
        }
    }
}

/// Hands one session's events to the router strictly one after another.
async fn run_dispatcher(
    context: SessionContext,
    router: Arc<EventRouter>,
    mut queue: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = queue.recv().await {
        if !context.is_current() {
            break;
        }
        let handled = router.dispatch(&context, &event).await;
        debug!(target: "Supervisor", "{:?} event handled by {handled} handler(s)", event.kind());
    }
    debug!(target: "Supervisor", "Dispatcher of session {} finished", context.generation);
}

async fn next_event(session: &mut Option<ActiveSession>) -> (Generation, Option<TransportEvent>) {
    match session {
        Some(session) => (session.context.generation, session.events.recv().await),
        None => std::future::pending().await,
    }
}

async fn reconnect_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
