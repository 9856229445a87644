use super::traits::EventHandler;
use crate::transport::SessionContext;
use async_trait::async_trait;
use botcore::events::{EventKind, TransportEvent};
use log::{debug, warn};

/// Persists credentials whenever the transport reports they changed.
#[derive(Debug, Default)]
pub struct CredentialsHandler;

#[async_trait]
impl EventHandler for CredentialsHandler {
    fn kind(&self) -> EventKind {
        EventKind::CredentialsUpdate
    }

    async fn handle(&self, session: &SessionContext, _event: &TransportEvent) -> bool {
        match session.transport.save_credentials().await {
            Ok(()) => {
                debug!(target: "Handlers/Credentials", "Credentials saved (gen={})", session.generation);
                true
            }
            Err(e) => {
                warn!(target: "Handlers/Credentials", "Failed to save credentials: {e:?}");
                false
            }
        }
    }
}
