use std::sync::Arc;

use crate::conversation::ConversationEngine;
use crate::messaging::MessageSender;
use crate::scheduling::Scheduler;
use crate::tenancy::TenantResolver;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    /// Same scheduler the engine books through; used by the internal interview routes.
    pub scheduler: Arc<Scheduler>,
    pub tenants: Arc<TenantResolver>,
    /// Outbound transport. Swappable for tests.
    pub sender: Arc<dyn MessageSender>,
}
