use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use huddle_types::api::{Claims, ModerationUpdate};
use huddle_types::models::Role;
use huddle_types::moderation::ModerationState;

use crate::AppState;
use crate::error::ApiError;

/// PUT /users/{user_id}/moderation: admins only. Unmuting clears the
/// deadline and reason.
pub async fn set_moderation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(update): Json<ModerationUpdate>,
) -> Result<StatusCode, ApiError> {
    if claims.role != Role::Admin {
        return Err(ApiError::Forbidden);
    }

    let moderation = if update.is_muted {
        ModerationState {
            is_muted: true,
            muted_until: update.muted_until,
            mute_reason: update.mute_reason,
        }
    } else {
        ModerationState::default()
    };

    state.gateway.mute_gate.apply(user_id, moderation).await?;
    Ok(StatusCode::NO_CONTENT)
}
