use crate::transport::SessionContext;
use async_trait::async_trait;
use botcore::events::{EventKind, TransportEvent};

/// Trait for reacting to one kind of event delivered by the transport.
///
/// Several handlers may share a kind; the router offers each event to all of
/// them. Handlers are best-effort: outbound failures are logged and never
/// propagated, and every outbound call is preceded by a
/// [`SessionContext::is_current`] check since the session can be replaced
/// while a handler is suspended.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The event kind this handler consumes.
    fn kind(&self) -> EventKind;

    /// Handle the event.
    ///
    /// # Returns
    /// `true` if the handler acted on the event, `false` if there was nothing
    /// for it to do.
    async fn handle(&self, session: &SessionContext, event: &TransportEvent) -> bool;
}
