use super::traits::EventHandler;
use crate::transport::SessionContext;
use botcore::events::{EventKind, TransportEvent};
use std::collections::HashMap;
use std::sync::Arc;

/// Central router for dispatching transport events to their handlers.
///
/// Handlers are kept per [`EventKind`] in registration order.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(handler.kind()).or_default().push(handler);
    }

    /// Offers `event` to every handler registered for its kind, in order.
    ///
    /// # Returns
    /// How many handlers acted on the event.
    pub async fn dispatch(&self, session: &SessionContext, event: &TransportEvent) -> usize {
        let Some(handlers) = self.handlers.get(&event.kind()) else {
            return 0;
        };

        let mut handled = 0;
        for handler in handlers {
            if handler.handle(session, event).await {
                handled += 1;
            }
        }
        handled
    }

    /// Get the number of registered handlers (useful for testing).
    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.get(&kind).is_some_and(|h| !h.is_empty())
    }
}
