//! Runtime-free core of the bot session: configuration, disconnect
//! classification, the connection state machine, pairing retry accounting and
//! the event deduplication cache. Nothing in here performs I/O or owns timers;
//! the tokio layer in the root crate drives these types.

pub mod config;
pub mod dedup;
pub mod disconnect;
pub mod events;
pub mod machine;
pub mod pairing;

pub use config::{BotConfig, BrowserIdentity, ConfigError};
pub use dedup::DedupCache;
pub use disconnect::{CloseDisposition, DisconnectReason};
pub use machine::{Command, ConnectionMachine, ConnectionState, Generation, Input, Step};
pub use pairing::{AttemptOutcome, PairingError, PhoneNumberError, RetryCounter};
