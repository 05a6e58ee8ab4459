use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use huddle_gateway::error::GatewayError;
use huddle_gateway::store::run_blocking;
use huddle_types::ConversationKey;
use huddle_types::api::{ChannelMember, Claims, Contact};

use crate::AppState;
use crate::error::ApiError;

/// GET /contacts: every other identity with its current presence.
pub async fn contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let identities = run_blocking(&state.gateway.store, |s| s.identities()).await?;
    let presence = state.gateway.dispatcher.presence();

    let mut contacts = Vec::with_capacity(identities.len());
    for identity in identities.into_iter().filter(|i| i.id != claims.sub) {
        contacts.push(Contact {
            online: presence.is_online(identity.id).await,
            id: identity.id,
            display_name: identity.display_name,
            role: identity.role,
        });
    }

    Ok(Json(contacts))
}

/// GET /channels/{channel_id}/members: members only.
pub async fn channel_members(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ChannelMember>>, ApiError> {
    let caller = claims.sub;
    let members = run_blocking(&state.gateway.store, move |s| {
        if !s.is_channel_member(channel_id, caller)? {
            return Ok(None);
        }
        s.channel_members(channel_id).map(Some)
    })
    .await?
    .ok_or_else(|| GatewayError::Forbidden(ConversationKey::channel(channel_id).to_string()))?;

    let presence = state.gateway.dispatcher.presence();
    let mut out = Vec::with_capacity(members.len());
    for member in members {
        out.push(ChannelMember {
            online: presence.is_online(member.id).await,
            id: member.id,
            display_name: member.display_name,
            role: member.role,
            moderation: member.moderation,
        });
    }

    Ok(Json(out))
}
