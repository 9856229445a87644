use crate::events::LastDisconnect;
use serde::Serialize;
use std::fmt;

/// Close reasons reported by the transport as numeric status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    LoggedOut,
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    Unavailable,
    RestartRequired,
    Unknown(u16),
}

impl From<u16> for DisconnectReason {
    fn from(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            408 => Self::ConnectionLost,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::Unavailable,
            515 => Self::RestartRequired,
            _ => Self::Unknown(code),
        }
    }
}

impl DisconnectReason {
    pub fn code(&self) -> u16 {
        match self {
            Self::LoggedOut => 401,
            Self::ConnectionLost => 408,
            Self::MultideviceMismatch => 411,
            Self::ConnectionClosed => 428,
            Self::ConnectionReplaced => 440,
            Self::BadSession => 500,
            Self::Unavailable => 503,
            Self::RestartRequired => 515,
            Self::Unknown(code) => *code,
        }
    }

    /// Only an explicit logout ends the process; every other close is retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::LoggedOut => "logged out",
            Self::ConnectionLost => "connection lost",
            Self::MultideviceMismatch => "multidevice mismatch",
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionReplaced => "connection replaced",
            Self::BadSession => "bad session",
            Self::Unavailable => "service unavailable",
            Self::RestartRequired => "restart required",
            Self::Unknown(_) => "unknown",
        };
        write!(f, "{} ({})", msg, self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CloseDisposition {
    /// Bootstrap a fresh session after the reconnect delay. `reason` is `None`
    /// when the close carried no status code at all.
    Reconnect { reason: Option<DisconnectReason> },
    Terminate { reason: DisconnectReason },
}

/// Decides, once per close event, whether the session is retried.
pub fn classify_close(last_disconnect: Option<&LastDisconnect>) -> CloseDisposition {
    let reason = last_disconnect
        .and_then(|last| last.status_code)
        .map(DisconnectReason::from);

    match reason {
        Some(reason) if reason.is_terminal() => CloseDisposition::Terminate { reason },
        reason => CloseDisposition::Reconnect { reason },
    }
}
