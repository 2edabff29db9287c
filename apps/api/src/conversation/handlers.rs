use axum::{extract::State, Json};
use tracing::{debug, error};

use super::engine::EngineReply;
use crate::errors::AppError;
use crate::messaging::{InboundMessage, OutboundMessage};
use crate::state::AppState;

/// Longest inbound text processed; anything beyond is cut before extraction.
const MAX_INBOUND_CHARS: usize = 2000;

/// POST /api/v1/webhook/messages
///
/// Runs the full pipeline for one delivery and sends the reply through the
/// transport. A send failure is not retried and is returned as 502. The turn
/// is already persisted by then, so a redelivery of the same message is
/// processed as the next turn rather than a replay of this one.
pub async fn handle_inbound_message(
    State(state): State<AppState>,
    Json(mut inbound): Json<InboundMessage>,
) -> Result<Json<EngineReply>, AppError> {
    if inbound.from.trim().is_empty() || inbound.origin_id.trim().is_empty() {
        return Err(AppError::Validation("from and originId are required".to_string()));
    }
    if inbound.text.trim().is_empty() {
        return Err(AppError::Validation("text must not be empty".to_string()));
    }
    if inbound.text.chars().count() > MAX_INBOUND_CHARS {
        inbound.text = inbound.text.chars().take(MAX_INBOUND_CHARS).collect();
    }

    let reply = state.engine.handle(&inbound).await;
    debug!(identity = %reply.to, state = ?reply.state, mutated = reply.mutated, "reply ready");

    let outbound = OutboundMessage {
        to: reply.to.clone(),
        text: reply.text.clone(),
    };
    if let Err(e) = state.sender.send(&outbound).await {
        error!(identity = %reply.to, "outbound send failed: {e}");
        return Err(e.into());
    }
    Ok(Json(reply))
}
