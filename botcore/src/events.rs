use serde::Serialize;

/// Pseudo-chat that carries status broadcasts.
pub const STATUS_BROADCAST_JID: &str = "status@broadcast";
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Builds a user JID from an already-normalized phone number.
pub fn user_jid(number: &str) -> String {
    format!("{number}@{USER_SERVER}")
}

pub fn is_status_broadcast(jid: &str) -> bool {
    jid == STATUS_BROADCAST_JID
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MessageKey {
    pub remote_jid: String,
    pub id: String,
    pub from_me: bool,
    /// Author of the message when `remote_jid` is a group or the status broadcast.
    pub participant: Option<String>,
}

impl MessageKey {
    /// The JID that actually wrote the message.
    pub fn sender(&self) -> &str {
        self.participant.as_deref().unwrap_or(&self.remote_jid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MessageContent {
    Text(String),
    /// The sender deleted a previously sent message for everyone.
    Revoke { key: MessageKey },
    Reaction { key: MessageKey, text: String },
    /// Media and other payloads this layer does not inspect.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncomingMessage {
    pub key: MessageKey,
    pub push_name: Option<String>,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallStatus {
    Offer,
    Ringing,
    Timeout,
    Reject,
    Accept,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallOffer {
    pub id: String,
    pub from: String,
    pub is_video: bool,
    pub status: CallStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastDisconnect {
    pub error: Option<String>,
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionUpdate {
    pub connection: ConnectionPhase,
    pub last_disconnect: Option<LastDisconnect>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            connection: ConnectionPhase::Open,
            last_disconnect: None,
        }
    }

    pub fn closed(status_code: Option<u16>, error: Option<String>) -> Self {
        Self {
            connection: ConnectionPhase::Close,
            last_disconnect: Some(LastDisconnect { error, status_code }),
        }
    }
}

/// Everything the transport collaborator reports through its event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransportEvent {
    CredentialsUpdate,
    MessagesUpsert(Vec<IncomingMessage>),
    Call(Vec<CallOffer>),
    ConnectionUpdate(ConnectionUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    CredentialsUpdate,
    MessagesUpsert,
    Call,
    ConnectionUpdate,
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::CredentialsUpdate => EventKind::CredentialsUpdate,
            Self::MessagesUpsert(_) => EventKind::MessagesUpsert,
            Self::Call(_) => EventKind::Call,
            Self::ConnectionUpdate(_) => EventKind::ConnectionUpdate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OutgoingMessage {
    Text(String),
    Reaction { key: MessageKey, text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendOptions {
    /// Recipients a status-broadcast payload is fanned out to.
    pub status_jid_list: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PresenceState {
    Available,
    Unavailable,
}
