pub mod anti_delete;
pub mod call;
pub mod credentials;
pub mod router;
pub mod status;
pub mod traits;

pub use router::EventRouter;
pub use traits::EventHandler;

use botcore::config::BotConfig;
use std::sync::Arc;

/// Registers the handlers the configuration turns on. Credential persistence
/// is always on.
pub fn build_router(config: &BotConfig) -> EventRouter {
    let mut router = EventRouter::new();

    router.register(Arc::new(credentials::CredentialsHandler));
    if config.auto_view_status || config.auto_react_status {
        router.register(Arc::new(status::StatusHandler::new(config)));
    }
    if config.anti_delete {
        router.register(Arc::new(anti_delete::AntiDeleteHandler::new(config)));
    }
    if config.anti_call {
        router.register(Arc::new(call::AntiCallHandler::new(config)));
    }

    router
}
