//! Pair code linking for sessions that are not registered yet.
//!
//! The user enters the displayed code on their phone under
//! **WhatsApp > Linked Devices > Link a Device > Link with phone number instead**.
//! One pairing sequence waits for the fresh transport to settle, then runs
//! prompt-and-request rounds until a code is obtained or the attempt budget is
//! spent. Giving up here is not fatal for the process: the supervisor recycles
//! the whole session after its reconnect delay.

use crate::transport::SessionContext;
use async_trait::async_trait;
use botcore::config::BotConfig;
use botcore::pairing::{
    AttemptOutcome, PairingError, RetryCounter, format_pairing_code, normalize_phone_number,
};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Source of the phone number to pair with.
#[async_trait]
pub trait PhonePrompt: Send + Sync {
    async fn phone_number(&self) -> Result<String, anyhow::Error>;
}

/// Always answers with a number from configuration.
#[derive(Debug, Clone)]
pub struct FixedPhonePrompt(pub String);

#[async_trait]
impl PhonePrompt for FixedPhonePrompt {
    async fn phone_number(&self) -> Result<String, anyhow::Error> {
        Ok(self.0.clone())
    }
}

/// Asks on the terminal.
#[derive(Debug, Clone, Default)]
pub struct StdinPhonePrompt;

#[async_trait]
impl PhonePrompt for StdinPhonePrompt {
    async fn phone_number(&self) -> Result<String, anyhow::Error> {
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(b"Enter your WhatsApp number with country code (e.g. 15551234567): ")
            .await?;
        stderr.flush().await?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Err(anyhow::anyhow!("stdin closed"));
        }
        Ok(line.trim().to_string())
    }
}

#[derive(Clone)]
pub struct PairingCoordinator {
    prompt: Arc<dyn PhonePrompt>,
    attempts: Arc<RetryCounter>,
    stabilization_delay: Duration,
    retry_delay: Duration,
}

impl PairingCoordinator {
    pub fn new(config: &BotConfig, prompt: Arc<dyn PhonePrompt>) -> Self {
        Self {
            prompt,
            attempts: Arc::new(RetryCounter::new(config.max_pairing_attempts)),
            stabilization_delay: config.pairing_delay(),
            retry_delay: config.pairing_retry_delay(),
        }
    }

    /// Failed rounds in the current sequence.
    pub fn attempts(&self) -> u32 {
        self.attempts.current()
    }

    pub fn reset(&self) {
        self.attempts.reset();
    }

    /// Runs one full pairing sequence against `session`.
    ///
    /// Requesting a code right after the transport is created fails, so the
    /// first round only starts after the stabilization delay.
    pub async fn request_pairing_code(
        &self,
        session: &SessionContext,
    ) -> Result<String, PairingError> {
        info!(
            target: "Supervisor/Pairing",
            "Session not registered, requesting pair code in {:?}",
            self.stabilization_delay
        );
        tokio::time::sleep(self.stabilization_delay).await;

        loop {
            if !session.is_current() {
                return Err(PairingError::SessionClosed);
            }

            match self.attempt(session).await {
                AttemptOutcome::Success(code) => return Ok(code),
                AttemptOutcome::Retry { attempt } => {
                    info!(
                        target: "Supervisor/Pairing",
                        "Retrying pairing in {:?} (attempt {}/{})",
                        self.retry_delay,
                        attempt + 1,
                        self.attempts.max_attempts()
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                AttemptOutcome::Exhausted { attempts } => {
                    warn!(
                        target: "Supervisor/Pairing",
                        "Giving up on pairing after {attempts} failed attempts"
                    );
                    // The next session starts with a full budget.
                    self.attempts.reset();
                    return Err(PairingError::Exhausted { attempts });
                }
            }
        }
    }

    async fn attempt(&self, session: &SessionContext) -> AttemptOutcome {
        match self.prompt_and_request(session).await {
            Ok(code) => {
                self.attempts.reset();
                display_pairing_code(&code);
                AttemptOutcome::Success(code)
            }
            Err(e) => {
                warn!(target: "Supervisor/Pairing", "Pairing attempt failed: {e}");
                self.attempts.record_failure()
            }
        }
    }

    async fn prompt_and_request(&self, session: &SessionContext) -> Result<String, PairingError> {
        let raw = self
            .prompt
            .phone_number()
            .await
            .map_err(|e| PairingError::Prompt(e.to_string()))?;
        let phone_number = normalize_phone_number(&raw)?;

        if !session.is_current() {
            return Err(PairingError::SessionClosed);
        }

        info!(
            target: "Supervisor/Pairing",
            "Requesting pair code for phone: {phone_number}"
        );
        session
            .transport
            .request_pairing_code(&phone_number)
            .await
            .map_err(|e| PairingError::Request(e.to_string()))
    }
}

fn display_pairing_code(code: &str) {
    info!("========================================");
    info!("PAIR CODE");
    info!("Enter this code on your phone:");
    info!("WhatsApp > Linked Devices > Link a Device");
    info!("> Link with phone number instead");
    info!("");
    info!("    >>> {} <<<", format_pairing_code(code));
    info!("");
    info!("========================================");
}
