use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::interview::{ApplicationEntry, Interview};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmInterviewRequest {
    pub tenant_id: String,
    pub candidate_id: String,
}

/// POST /api/v1/interviews/confirm
pub async fn handle_confirm_interview(
    State(state): State<AppState>,
    Json(req): Json<ConfirmInterviewRequest>,
) -> Result<Json<Interview>, AppError> {
    if req.tenant_id.trim().is_empty() || req.candidate_id.trim().is_empty() {
        return Err(AppError::Validation(
            "tenantId and candidateId are required".to_string(),
        ));
    }
    let interview = state
        .scheduler
        .confirm_interview(&req.tenant_id, &req.candidate_id)
        .await?;
    Ok(Json(interview))
}

/// GET /api/v1/tenants/:tenant_id/candidates/:candidate_id/applications
pub async fn handle_application_history(
    State(state): State<AppState>,
    Path((tenant_id, candidate_id)): Path<(String, String)>,
) -> Result<Json<Vec<ApplicationEntry>>, AppError> {
    let history = state
        .scheduler
        .bookings()
        .list_applications(&tenant_id, &candidate_id)
        .await?;
    Ok(Json(history))
}
