use super::traits::EventHandler;
use crate::transport::SessionContext;
use async_trait::async_trait;
use botcore::config::BotConfig;
use botcore::dedup::DedupCache;
use botcore::events::{
    EventKind, IncomingMessage, MessageContent, OutgoingMessage, STATUS_BROADCAST_JID,
    SendOptions, TransportEvent, is_status_broadcast,
};
use log::{debug, info, warn};
use std::slice;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Marks status broadcasts as viewed and optionally reacts to them.
///
/// The transport may deliver the same status more than once (history sync,
/// redelivery after reconnect); the dedup cache makes sure each status id gets
/// its read receipt and reaction at most once per process.
pub struct StatusHandler {
    seen: Mutex<DedupCache>,
    auto_view: bool,
    reaction: Option<String>,
}

impl StatusHandler {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            seen: Mutex::new(DedupCache::new(config.dedup_capacity, config.dedup_ttl())),
            auto_view: config.auto_view_status,
            reaction: config
                .auto_react_status
                .then(|| config.status_reaction.clone()),
        }
    }

    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }

    async fn first_sighting(&self, id: &str) -> bool {
        self.seen
            .lock()
            .await
            .observe_once(id, Instant::now().into_std())
    }

    async fn process(&self, session: &SessionContext, status: &IncomingMessage) {
        let author = status.key.sender().to_string();

        if self.auto_view {
            match session
                .transport
                .read_messages(slice::from_ref(&status.key))
                .await
            {
                Ok(()) => info!(target: "Handlers/Status", "Viewed status {} from {author}", status.key.id),
                Err(e) => warn!(target: "Handlers/Status", "Failed to mark status {} as read: {e:?}", status.key.id),
            }
        }

        let Some(reaction) = &self.reaction else {
            return;
        };
        if !session.is_current() {
            debug!(target: "Handlers/Status", "Session replaced, skipping reaction");
            return;
        }

        let message = OutgoingMessage::Reaction {
            key: status.key.clone(),
            text: reaction.clone(),
        };
        let options = SendOptions {
            status_jid_list: vec![author.clone()],
        };
        if let Err(e) = session
            .transport
            .send_message(STATUS_BROADCAST_JID, message, options)
            .await
        {
            warn!(target: "Handlers/Status", "Failed to react to status from {author}: {e:?}");
        }
    }
}

#[async_trait]
impl EventHandler for StatusHandler {
    fn kind(&self) -> EventKind {
        EventKind::MessagesUpsert
    }

    async fn handle(&self, session: &SessionContext, event: &TransportEvent) -> bool {
        let TransportEvent::MessagesUpsert(messages) = event else {
            return false;
        };

        let mut handled = false;
        for status in messages.iter().filter(|m| {
            is_status_broadcast(&m.key.remote_jid)
                && !m.key.from_me
                && !matches!(
                    m.content,
                    MessageContent::Revoke { .. } | MessageContent::Reaction { .. }
                )
        }) {
            if !self.first_sighting(&status.key.id).await {
                debug!(target: "Handlers/Status", "Status {} already handled", status.key.id);
                continue;
            }
            if !session.is_current() {
                debug!(target: "Handlers/Status", "Session replaced, dropping status batch");
                return handled;
            }
            self.process(session, status).await;
            handled = true;
        }
        handled
    }
}
