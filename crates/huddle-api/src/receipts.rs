use axum::{
    Extension, Json,
    extract::{Path, State},
};

use huddle_types::ConversationKey;
use huddle_types::api::{Claims, MarkReadRequest, UnreadResponse};
use huddle_types::models::ReadCursor;

use crate::AppState;
use crate::error::ApiError;

/// PATCH /conversations/{key}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation): Path<ConversationKey>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<ReadCursor>, ApiError> {
    let cursor = state
        .gateway
        .receipts
        .mark_read(claims.sub, conversation, req.up_to_message_id)
        .await?;
    Ok(Json(cursor))
}

/// GET /conversations/{key}/unread
pub async fn unread(
    State(state): State<AppState>,
    Path(conversation): Path<ConversationKey>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UnreadResponse>, ApiError> {
    let unread = state.gateway.receipts.unread(claims.sub, conversation).await?;
    Ok(Json(unread))
}
