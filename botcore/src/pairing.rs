use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const MIN_PHONE_DIGITS: usize = 10;
pub const MAX_PHONE_DIGITS: usize = 15;
pub const DEFAULT_MAX_PAIRING_ATTEMPTS: u32 = 5;
pub const DEFAULT_PAIRING_DELAY: Duration = Duration::from_millis(10_000);
pub const DEFAULT_PAIRING_RETRY_DELAY: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneNumberError {
    #[error("Phone number is required")]
    Empty,

    #[error("Phone number is too short ({digits} digits, need at least 10)")]
    TooShort { digits: usize },

    #[error("Phone number is too long ({digits} digits, at most 15 allowed)")]
    TooLong { digits: usize },
}

/// Strips everything but ASCII digits ("+1 (555) 123-4567" → "15551234567")
/// and checks the result is a plausible international number.
pub fn normalize_phone_number(raw: &str) -> Result<String, PhoneNumberError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        0 => Err(PhoneNumberError::Empty),
        n if n < MIN_PHONE_DIGITS => Err(PhoneNumberError::TooShort { digits: n }),
        n if n > MAX_PHONE_DIGITS => Err(PhoneNumberError::TooLong { digits: n }),
        _ => Ok(digits),
    }
}

/// Groups a pairing code for display, e.g. "ABCD1234" → "ABCD-1234".
pub fn format_pairing_code(code: &str) -> String {
    code.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(#[from] PhoneNumberError),

    #[error("Could not read phone number: {0}")]
    Prompt(String),

    #[error("Pairing code request failed: {0}")]
    Request(String),

    #[error("Session was replaced before pairing finished")]
    SessionClosed,

    #[error("Pairing gave up after {attempts} failed attempts")]
    Exhausted { attempts: u32 },
}

/// Result of one prompt-and-request round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(String),
    /// The round failed; `attempt` failures have been recorded so far.
    Retry { attempt: u32 },
    Exhausted { attempts: u32 },
}

/// Failure counter for one pairing sequence, bounded by `max_attempts`.
///
/// Shared between the supervisor (which resets it when a connection opens)
/// and the task running the pairing sequence.
#[derive(Debug)]
pub struct RetryCounter {
    failures: AtomicU32,
    max_attempts: u32,
}

impl Default for RetryCounter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAIRING_ATTEMPTS)
    }
}

impl RetryCounter {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            failures: AtomicU32::new(0),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn current(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Records a failed round and says whether another one is allowed.
    pub fn record_failure(&self) -> AttemptOutcome {
        let attempt = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= self.max_attempts {
            AttemptOutcome::Exhausted { attempts: attempt }
        } else {
            AttemptOutcome::Retry { attempt }
        }
    }
}
