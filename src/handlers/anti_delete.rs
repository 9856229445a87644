use super::traits::EventHandler;
use crate::transport::SessionContext;
use async_trait::async_trait;
use botcore::config::BotConfig;
use botcore::events::{
    EventKind, IncomingMessage, MessageContent, MessageKey, OutgoingMessage, SendOptions,
    TransportEvent, is_status_broadcast,
};
use log::{debug, info, warn};
use moka::future::Cache;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RememberedMessage {
    chat: String,
    sender: String,
    push_name: Option<String>,
    text: String,
}

/// Forwards messages that their sender deletes for everyone to the owner.
///
/// Recent text messages are kept in a cache bounded by the same capacity and
/// TTL as the dedup caches; a revoke for anything older is silently ignored.
pub struct AntiDeleteHandler {
    recent: Cache<String, RememberedMessage>,
    owner_jid: Option<String>,
}

impl AntiDeleteHandler {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            recent: Cache::builder()
                .max_capacity(config.dedup_capacity as u64)
                .time_to_live(config.dedup_ttl())
                .build(),
            owner_jid: config.owner_jid(),
        }
    }

    async fn remember(&self, message: &IncomingMessage, text: &str) {
        self.recent
            .insert(
                message.key.id.clone(),
                RememberedMessage {
                    chat: message.key.remote_jid.clone(),
                    sender: message.key.sender().to_string(),
                    push_name: message.push_name.clone(),
                    text: text.to_string(),
                },
            )
            .await;
    }

    async fn report(&self, session: &SessionContext, revoked: &MessageKey) -> bool {
        let Some(original) = self.recent.remove(revoked.id.as_str()).await else {
            debug!(target: "Handlers/AntiDelete", "Revoked message {} not in cache", revoked.id);
            return false;
        };
        let Some(owner) = &self.owner_jid else {
            return false;
        };
        if !session.is_current() {
            return false;
        }

        let sender = match &original.push_name {
            Some(name) => format!("{name} ({})", original.sender),
            None => original.sender.clone(),
        };
        let notice = format!(
            "Deleted message\nFrom: {sender}\nChat: {}\n\n{}",
            original.chat, original.text
        );

        match session
            .transport
            .send_message(owner, OutgoingMessage::Text(notice), SendOptions::default())
            .await
        {
            Ok(_) => info!(target: "Handlers/AntiDelete", "Forwarded deleted message {} to owner", revoked.id),
            Err(e) => warn!(target: "Handlers/AntiDelete", "Failed to forward deleted message {}: {e:?}", revoked.id),
        }
        true
    }
}

#[async_trait]
impl EventHandler for AntiDeleteHandler {
    fn kind(&self) -> EventKind {
        EventKind::MessagesUpsert
    }

    async fn handle(&self, session: &SessionContext, event: &TransportEvent) -> bool {
        let TransportEvent::MessagesUpsert(messages) = event else {
            return false;
        };

        let mut handled = false;
        for message in messages
            .iter()
            .filter(|m| !m.key.from_me && !is_status_broadcast(&m.key.remote_jid))
        {
            match &message.content {
                MessageContent::Text(text) => self.remember(message, text).await,
                MessageContent::Revoke { key } => handled |= self.report(session, key).await,
                _ => {}
            }
        }
        handled
    }
}
