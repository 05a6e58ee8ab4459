use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use huddle_types::api::{Claims, CreateChannelRequest};
use huddle_types::models::Role;

use crate::AppState;
use crate::error::ApiError;

fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.role != Role::Admin {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// POST /channels: admins only.
pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;
    let channel = state.gateway.create_channel(&req.name).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

/// PUT /channels/{channel_id}/members/{user_id}: idempotent.
pub async fn add_member(
    State(state): State<AppState>,
    Path((channel_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    require_admin(&claims)?;
    state.gateway.set_channel_member(channel_id, user_id, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /channels/{channel_id}/members/{user_id}: the member stops
/// receiving channel events immediately.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((channel_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    require_admin(&claims)?;
    state.gateway.set_channel_member(channel_id, user_id, false).await?;
    Ok(StatusCode::NO_CONTENT)
}
