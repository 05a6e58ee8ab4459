use axum::{
    Extension, Json,
    extract::{Path, State},
};

use huddle_types::MessageId;
use huddle_types::api::{Claims, ReactionState, ToggleReactionRequest};

use crate::AppState;
use crate::error::ApiError;

/// POST /messages/{message_id}/reactions: add the reaction if absent,
/// retract it otherwise.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ReactionState>, ApiError> {
    let reaction = state
        .gateway
        .reactions
        .toggle(message_id, claims.sub, &req.emoji)
        .await?;
    Ok(Json(reaction))
}
