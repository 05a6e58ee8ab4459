pub mod channels;
pub mod directory;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod moderation;
pub mod reactions;
pub mod receipts;

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, patch, post, put},
};

use huddle_gateway::Gateway;

use crate::middleware::require_auth;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub gateway: Gateway,
    pub jwt_secret: String,
}

/// REST backfill surface. Everything except `/health` needs a bearer token.
pub fn routes(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/conversations/{key}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/conversations/{key}/read", patch(receipts::mark_read))
        .route("/conversations/{key}/unread", get(receipts::unread))
        .route("/messages/{message_id}/reactions", post(reactions::toggle_reaction))
        .route("/contacts", get(directory::contacts))
        .route("/channels", post(channels::create_channel))
        .route("/channels/{channel_id}/members", get(directory::channel_members))
        .route(
            "/channels/{channel_id}/members/{user_id}",
            put(channels::add_member).delete(channels::remove_member),
        )
        .route("/users/{user_id}/moderation", put(moderation::set_moderation))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().route("/health", get(health)).merge(protected)
}

async fn health() -> &'static str {
    "ok"
}
