//! Connection resilience and session maintenance for an always-on WhatsApp
//! bot.
//!
//! The protocol itself lives behind [`transport::TransportFactory`]. This
//! crate keeps one session alive on top of it: bootstrap and reconnect,
//! pair-code linking, periodic heartbeats and status resubscription, and the
//! event handlers that act on incoming statuses, calls and deletions.

pub use botcore;

pub mod config;
pub mod handlers;
pub mod logging;
pub mod maintenance;
pub mod pairing;
pub mod supervisor;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use supervisor::{ConnectionSupervisor, ExitReason, SupervisorBuilder, SupervisorError};
