use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use huddle_gateway::error::GatewayError;
use huddle_gateway::router::SendRequest;
use huddle_gateway::store::{HistoryPage, run_blocking};
use huddle_types::api::{Claims, SendMessageRequest};
use huddle_types::models::Message;
use huddle_types::{ConversationKey, MessageId};

use crate::AppState;
use crate::error::ApiError;

/// Largest page a client may ask for.
const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: only messages older than this id.
    pub before: Option<MessageId>,
    /// Gap fill after a reconnect: only messages newer than this id.
    pub after: Option<MessageId>,
}

fn default_limit() -> u32 {
    50
}

fn page(query: &MessageQuery) -> HistoryPage {
    HistoryPage {
        limit: query.limit.clamp(1, MAX_PAGE),
        before: query.before,
        after: query.after,
    }
}

/// GET /conversations/{key}/messages: ascending page of history.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation): Path<ConversationKey>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let page = page(&query);
    let user_id = claims.sub;

    let messages = run_blocking(&state.gateway.store, move |s| {
        if !s.is_participant(conversation, user_id)? {
            return Ok(None);
        }
        s.history(conversation, page).map(Some)
    })
    .await?
    .ok_or_else(|| GatewayError::Forbidden(conversation.to_string()))?;

    Ok(Json(messages))
}

/// POST /conversations/{key}/messages: send fallback for when the socket
/// is down. Same checks and fan-out as a socket send.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation): Path<ConversationKey>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .gateway
        .router
        .send(SendRequest {
            conversation,
            sender_id: claims.sub,
            body: req.body,
            reply_to_id: req.reply_to_id,
            attachment: req.attachment,
            client_id: req.client_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
