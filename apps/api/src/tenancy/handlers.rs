use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateRequest {
    /// Drops a single origin when set, the whole cache otherwise.
    pub origin_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub dropped: usize,
}

/// POST /api/v1/tenants/cache/invalidate
pub async fn handle_invalidate_cache(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Json<InvalidateResponse> {
    let cache = state.tenants.cache();
    let dropped = match req.origin_id.as_deref() {
        Some(origin_id) => usize::from(cache.invalidate(origin_id)),
        None => cache.clear(),
    };
    info!(dropped, "tenant cache invalidated");
    Json(InvalidateResponse { dropped })
}
