use crate::dedup::{DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TTL};
use crate::events::user_jid;
use crate::pairing::{
    DEFAULT_MAX_PAIRING_ATTEMPTS, DEFAULT_PAIRING_DELAY, DEFAULT_PAIRING_RETRY_DELAY,
    normalize_phone_number,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5_000);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(60_000);
pub const DEFAULT_RESUBSCRIBE_INTERVAL: Duration = Duration::from_millis(300_000);
pub const DEFAULT_STATUS_REACTION: &str = "💚";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{key}`")]
    Missing { key: &'static str },

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Browser identity announced to the server when a session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserIdentity {
    pub platform: String,
    pub name: String,
    pub version: String,
}

impl Default for BrowserIdentity {
    fn default() -> Self {
        Self {
            platform: "Ubuntu".to_string(),
            name: "Chrome".to_string(),
            version: "22.04.4".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub bot_name: String,
    pub owner_number: String,
    /// Number to pair with; prompted for when absent.
    pub pairing_number: Option<String>,
    pub protocol_version: Option<(u32, u32, u32)>,
    pub browser: BrowserIdentity,

    pub reconnect_delay_ms: u64,
    pub pairing_delay_ms: u64,
    pub pairing_retry_delay_ms: u64,
    pub max_pairing_attempts: u32,
    pub heartbeat_interval_ms: u64,
    pub resubscribe_interval_ms: u64,
    pub dedup_capacity: usize,
    pub dedup_ttl_ms: u64,

    pub auto_view_status: bool,
    pub auto_react_status: bool,
    pub status_reaction: String,
    pub anti_delete: bool,
    pub anti_call: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_name: String::new(),
            owner_number: String::new(),
            pairing_number: None,
            protocol_version: None,
            browser: BrowserIdentity::default(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            pairing_delay_ms: DEFAULT_PAIRING_DELAY.as_millis() as u64,
            pairing_retry_delay_ms: DEFAULT_PAIRING_RETRY_DELAY.as_millis() as u64,
            max_pairing_attempts: DEFAULT_MAX_PAIRING_ATTEMPTS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
            resubscribe_interval_ms: DEFAULT_RESUBSCRIBE_INTERVAL.as_millis() as u64,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            dedup_ttl_ms: DEFAULT_DEDUP_TTL.as_millis() as u64,
            auto_view_status: true,
            auto_react_status: false,
            status_reaction: DEFAULT_STATUS_REACTION.to_string(),
            anti_delete: false,
            anti_call: false,
        }
    }
}

impl BotConfig {
    /// Checks the settings a session cannot be bootstrapped without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_name.trim().is_empty() {
            return Err(ConfigError::Missing { key: "bot_name" });
        }
        if self.owner_number.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "owner_number",
            });
        }
        normalize_phone_number(&self.owner_number).map_err(|e| ConfigError::Invalid {
            key: "owner_number",
            reason: e.to_string(),
        })?;
        if let Some(number) = &self.pairing_number {
            normalize_phone_number(number).map_err(|e| ConfigError::Invalid {
                key: "pairing_number",
                reason: e.to_string(),
            })?;
        }
        if self.auto_react_status && self.status_reaction.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "status_reaction",
                reason: "must not be empty when auto_react_status is enabled".to_string(),
            });
        }

        let non_zero = [
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("pairing_delay_ms", self.pairing_delay_ms),
            ("pairing_retry_delay_ms", self.pairing_retry_delay_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("resubscribe_interval_ms", self.resubscribe_interval_ms),
            ("dedup_ttl_ms", self.dedup_ttl_ms),
            ("dedup_capacity", self.dedup_capacity as u64),
            ("max_pairing_attempts", u64::from(self.max_pairing_attempts)),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// JID of the owner, or `None` if the configured number is unusable.
    pub fn owner_jid(&self) -> Option<String> {
        normalize_phone_number(&self.owner_number)
            .ok()
            .map(|number| user_jid(&number))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn pairing_delay(&self) -> Duration {
        Duration::from_millis(self.pairing_delay_ms)
    }

    pub fn pairing_retry_delay(&self) -> Duration {
        Duration::from_millis(self.pairing_retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn resubscribe_interval(&self) -> Duration {
        Duration::from_millis(self.resubscribe_interval_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }
}
