use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ReactionGroup, Role};
use crate::moderation::ModerationState;
use crate::{ConversationKey, MessageId};

// -- JWT Claims --

/// Claims issued by the account service. Shared by the REST middleware and
/// the gateway upgrade handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub display_name: String,
    pub role: Role,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub body: String,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
    #[serde(default)]
    pub attachment: Option<String>,
    /// Retrying with the same id returns the original message.
    #[serde(default)]
    pub client_id: Option<Uuid>,
}

// -- Read cursors --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub up_to_message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadResponse {
    pub conversation: ConversationKey,
    pub last_read_message_id: MessageId,
    pub unread: u64,
}

// -- Reactions --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionState {
    pub message_id: MessageId,
    pub conversation: ConversationKey,
    pub added: bool,
    pub reactions: Vec<ReactionGroup>,
}

// -- Directory --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub display_name: String,
    pub role: Role,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub id: Uuid,
    pub display_name: String,
    pub role: Role,
    pub moderation: ModerationState,
    pub online: bool,
}

// -- Channels --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
}

// -- Moderation --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModerationUpdate {
    pub is_muted: bool,
    #[serde(default)]
    pub muted_until: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub mute_reason: Option<String>,
}
