use super::traits::EventHandler;
use crate::transport::SessionContext;
use async_trait::async_trait;
use botcore::config::BotConfig;
use botcore::dedup::DedupCache;
use botcore::events::{
    CallOffer, CallStatus, EventKind, OutgoingMessage, SendOptions, TransportEvent,
};
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rejects incoming calls and tells the caller to write instead.
pub struct AntiCallHandler {
    seen: Mutex<DedupCache>,
    notice: String,
}

impl AntiCallHandler {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            seen: Mutex::new(DedupCache::new(config.dedup_capacity, config.dedup_ttl())),
            notice: format!(
                "*{}* does not accept calls. Please send a text message instead.",
                config.bot_name
            ),
        }
    }

    async fn reject(&self, session: &SessionContext, call: &CallOffer) {
        let kind = if call.is_video { "video" } else { "voice" };
        match session.transport.reject_call(&call.id, &call.from).await {
            Ok(()) => info!(target: "Handlers/Call", "Rejected {kind} call {} from {}", call.id, call.from),
            Err(e) => warn!(target: "Handlers/Call", "Failed to reject call {} from {}: {e:?}", call.id, call.from),
        }

        if !session.is_current() {
            return;
        }
        if let Err(e) = session
            .transport
            .send_message(
                &call.from,
                OutgoingMessage::Text(self.notice.clone()),
                SendOptions::default(),
            )
            .await
        {
            warn!(target: "Handlers/Call", "Failed to notify caller {}: {e:?}", call.from);
        }
    }
}

#[async_trait]
impl EventHandler for AntiCallHandler {
    fn kind(&self) -> EventKind {
        EventKind::Call
    }

    async fn handle(&self, session: &SessionContext, event: &TransportEvent) -> bool {
        let TransportEvent::Call(calls) = event else {
            return false;
        };

        let mut handled = false;
        for call in calls.iter().filter(|c| c.status == CallStatus::Offer) {
            let first = self
                .seen
                .lock()
                .await
                .observe_once(&call.id, Instant::now().into_std());
            if !first {
                debug!(target: "Handlers/Call", "Call {} already rejected", call.id);
                continue;
            }
            if !session.is_current() {
                return handled;
            }
            self.reject(session, call).await;
            handled = true;
        }
        handled
    }
}
