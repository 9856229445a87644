//! Seams to the protocol collaborator.
//!
//! The handshake, encryption and wire encoding all live behind these traits.
//! A factory builds one [`Transport`] per session together with the receiver
//! its lifecycle and message events arrive on.

use async_trait::async_trait;
use botcore::config::BrowserIdentity;
use botcore::events::{MessageKey, OutgoingMessage, PresenceState, SendOptions, TransportEvent};
use botcore::machine::Generation;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Everything the collaborator needs to construct a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub generation: Generation,
    pub protocol_version: Option<(u32, u32, u32)>,
    pub browser: BrowserIdentity,
    pub bot_name: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether stored credentials already belong to a linked device.
    fn is_registered(&self) -> bool;

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, anyhow::Error>;

    /// Returns the id assigned to the sent message.
    async fn send_message(
        &self,
        to: &str,
        message: OutgoingMessage,
        options: SendOptions,
    ) -> Result<String, anyhow::Error>;

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<(), anyhow::Error>;

    async fn reject_call(&self, call_id: &str, from: &str) -> Result<(), anyhow::Error>;

    async fn send_presence_update(&self, presence: PresenceState) -> Result<(), anyhow::Error>;

    /// (Re)asserts interest in presence/status updates for `jid`.
    async fn subscribe_presence(&self, jid: &str) -> Result<(), anyhow::Error>;

    /// Persists the current credentials through the collaborator's own store.
    async fn save_credentials(&self) -> Result<(), anyhow::Error>;

    /// Tears the connection down. Safe to call on an already-closed transport.
    async fn end(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_session(
        &self,
        params: &SessionParams,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

/// A transport handle tagged with the session it belongs to.
///
/// Work that outlives a single await (maintenance ticks, pairing, event
/// handlers) holds one of these and checks [`SessionContext::is_current`]
/// after every suspension point; once the supervisor replaces or releases
/// the session the handle is stale and must not be used.
#[derive(Clone)]
pub struct SessionContext {
    pub generation: Generation,
    pub transport: Arc<dyn Transport>,
    live_generation: Arc<AtomicU64>,
}

impl SessionContext {
    /// `live_generation` holds the generation of the session currently in
    /// use, or 0 when there is none.
    pub fn new(
        generation: Generation,
        transport: Arc<dyn Transport>,
        live_generation: Arc<AtomicU64>,
    ) -> Self {
        Self {
            generation,
            transport,
            live_generation,
        }
    }

    pub fn is_current(&self) -> bool {
        self.live_generation.load(Ordering::SeqCst) == self.generation
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("generation", &self.generation)
            .field("current", &self.is_current())
            .finish()
    }
}
