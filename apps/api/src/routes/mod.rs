pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::conversation::handlers::handle_inbound_message;
use crate::scheduling::handlers::{handle_application_history, handle_confirm_interview};
use crate::state::AppState;
use crate::tenancy::handlers::handle_invalidate_cache;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Messaging transport webhook
        .route("/api/v1/webhook/messages", post(handle_inbound_message))
        // Internal triggers
        .route("/api/v1/interviews/confirm", post(handle_confirm_interview))
        .route(
            "/api/v1/tenants/:tenant_id/candidates/:candidate_id/applications",
            get(handle_application_history),
        )
        .route(
            "/api/v1/tenants/cache/invalidate",
            post(handle_invalidate_cache),
        )
        .with_state(state)
}
