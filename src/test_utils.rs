//! In-memory transport that records every outbound operation, for driving the
//! supervisor and handlers without a network.

use crate::pairing::PhonePrompt;
use crate::transport::{SessionContext, SessionParams, Transport, TransportFactory};
use async_trait::async_trait;
use botcore::config::BotConfig;
use botcore::events::{MessageKey, OutgoingMessage, PresenceState, SendOptions, TransportEvent};
use botcore::machine::Generation;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const TEST_OWNER: &str = "15550000001";
pub const TEST_PAIRING_NUMBER: &str = "+1 (555) 000-0002";

/// A config that validates, with the default timings.
pub fn test_config() -> BotConfig {
    BotConfig {
        bot_name: "TestBot".to_string(),
        owner_number: TEST_OWNER.to_string(),
        pairing_number: Some(TEST_PAIRING_NUMBER.to_string()),
        ..Default::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    RequestPairingCode(String),
    SendMessage {
        to: String,
        message: OutgoingMessage,
        options: SendOptions,
    },
    ReadMessages(Vec<MessageKey>),
    RejectCall {
        id: String,
        from: String,
    },
    Presence(PresenceState),
    SubscribePresence(String),
    SaveCredentials,
    End,
}

#[derive(Debug)]
pub struct MockTransport {
    registered: AtomicBool,
    pairing_failures: AtomicU32,
    fail_operations: AtomicBool,
    calls: Mutex<Vec<(Instant, MockCall)>>,
}

impl MockTransport {
    pub fn new(registered: bool) -> Self {
        Self {
            registered: AtomicBool::new(registered),
            pairing_failures: AtomicU32::new(0),
            fail_operations: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The next `count` pairing-code requests fail.
    pub fn fail_pairing_requests(&self, count: u32) {
        self.pairing_failures.store(count, Ordering::SeqCst);
    }

    /// Every operation except `end` fails from now on.
    pub fn fail_operations(&self, fail: bool) {
        self.fail_operations.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().iter().map(|(_, call)| call.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, MockCall)> {
        self.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.lock().iter().filter(|(_, call)| predicate(call)).count()
    }

    /// Instants at which heartbeat presence updates were sent.
    pub fn heartbeat_times(&self) -> Vec<Instant> {
        self.lock()
            .iter()
            .filter(|(_, call)| matches!(call, MockCall::Presence(PresenceState::Available)))
            .map(|(at, _)| *at)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Instant, MockCall)>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: MockCall) -> Result<(), anyhow::Error> {
        let failing = self.fail_operations.load(Ordering::SeqCst);
        let description = format!("{call:?}");
        self.lock().push((Instant::now(), call));
        if failing {
            Err(anyhow::anyhow!("mock transport failure: {description}"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, anyhow::Error> {
        self.record(MockCall::RequestPairingCode(phone_number.to_string()))?;
        let remaining = self.pairing_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.pairing_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("Connection Closed"));
        }
        Ok("ABCD1234".to_string())
    }

    async fn send_message(
        &self,
        to: &str,
        message: OutgoingMessage,
        options: SendOptions,
    ) -> Result<String, anyhow::Error> {
        self.record(MockCall::SendMessage {
            to: to.to_string(),
            message,
            options,
        })?;
        Ok(format!("MOCK{}", self.lock().len()))
    }

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<(), anyhow::Error> {
        self.record(MockCall::ReadMessages(keys.to_vec()))
    }

    async fn reject_call(&self, call_id: &str, from: &str) -> Result<(), anyhow::Error> {
        self.record(MockCall::RejectCall {
            id: call_id.to_string(),
            from: from.to_string(),
        })
    }

    async fn send_presence_update(&self, presence: PresenceState) -> Result<(), anyhow::Error> {
        self.record(MockCall::Presence(presence))
    }

    async fn subscribe_presence(&self, jid: &str) -> Result<(), anyhow::Error> {
        self.record(MockCall::SubscribePresence(jid.to_string()))
    }

    async fn save_credentials(&self) -> Result<(), anyhow::Error> {
        self.record(MockCall::SaveCredentials)
    }

    async fn end(&self) {
        self.lock().push((Instant::now(), MockCall::End));
    }
}

/// A session handed out by [`MockTransportFactory`]: the transport plus the
/// sending half of its event stream.
pub struct MockSession {
    pub params: SessionParams,
    pub transport: Arc<MockTransport>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl MockSession {
    pub async fn emit(&self, event: TransportEvent) {
        // A closed receiver means the supervisor already dropped this session.
        let _ = self.events.send(event).await;
    }
}

pub struct MockTransportFactory {
    registered: AtomicBool,
    pairing_failures: AtomicU32,
    creation_failures: AtomicU32,
    created: AtomicU64,
    sessions_tx: mpsc::UnboundedSender<MockSession>,
}

impl MockTransportFactory {
    /// Returns the factory and a receiver yielding every session it creates.
    pub fn new(registered: bool) -> (Self, mpsc::UnboundedReceiver<MockSession>) {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        (
            Self {
                registered: AtomicBool::new(registered),
                pairing_failures: AtomicU32::new(0),
                creation_failures: AtomicU32::new(0),
                created: AtomicU64::new(0),
                sessions_tx,
            },
            sessions_rx,
        )
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    /// Every transport created from now on fails this many pairing requests.
    pub fn fail_pairing_requests(&self, count: u32) {
        self.pairing_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` calls to `create_session` fail.
    pub fn fail_creations(&self, count: u32) {
        self.creation_failures.store(count, Ordering::SeqCst);
    }

    /// Number of `create_session` calls, failed ones included.
    pub fn attempts(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_session(
        &self,
        params: &SessionParams,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        self.created.fetch_add(1, Ordering::SeqCst);

        let failures = self.creation_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.creation_failures.store(failures - 1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("mock transport construction failed"));
        }

        let transport = Arc::new(MockTransport::new(self.registered.load(Ordering::SeqCst)));
        transport.fail_pairing_requests(self.pairing_failures.load(Ordering::SeqCst));
        let (events_tx, events_rx) = mpsc::channel(32);

        let _ = self.sessions_tx.send(MockSession {
            params: params.clone(),
            transport: transport.clone(),
            events: events_tx,
        });

        Ok((transport as Arc<dyn Transport>, events_rx))
    }
}

/// Wraps a mock transport in a context that stays current until the returned
/// counter is changed.
pub fn live_context(
    generation: Generation,
    transport: Arc<MockTransport>,
) -> (SessionContext, Arc<AtomicU64>) {
    let live = Arc::new(AtomicU64::new(generation));
    (
        SessionContext::new(generation, transport as Arc<dyn Transport>, live.clone()),
        live,
    )
}

/// Answers the phone-number prompt from a fixed list, repeating the last entry.
pub struct ScriptedPrompt {
    answers: Mutex<Vec<String>>,
    asked: AtomicU32,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut answers: Vec<String> = answers.into_iter().map(Into::into).collect();
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            asked: AtomicU32::new(0),
        }
    }

    pub fn times_asked(&self) -> u32 {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhonePrompt for ScriptedPrompt {
    async fn phone_number(&self) -> Result<String, anyhow::Error> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        let mut answers = self.answers.lock().unwrap_or_else(PoisonError::into_inner);
        let answer = if answers.len() > 1 {
            answers.pop()
        } else {
            answers.last().cloned()
        };
        answer.ok_or_else(|| anyhow::anyhow!("no scripted answer left"))
    }
}
