use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SendRejection;
use crate::models::{Message, Role};
use crate::{ConversationKey, MessageId};

/// Events pushed from the server to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Connection authenticated and registered
    Ready {
        user_id: Uuid,
        display_name: String,
        role: Role,
    },

    /// A message was persisted in a conversation this connection follows
    MessageReceived { message: Message },

    /// The send tagged `client_id` was accepted as `message_id`
    SendAck {
        client_id: Uuid,
        message_id: MessageId,
    },

    /// The send tagged `client_id` was refused by policy
    SendRejected {
        client_id: Uuid,
        reason: SendRejection,
    },

    /// The send tagged `client_id` hit a server-side failure and was not
    /// stored; the client may retry it
    SendFailed { client_id: Uuid },

    /// A participant's read cursor moved forward
    MessageRead {
        conversation: ConversationKey,
        user_id: Uuid,
        last_read_message_id: MessageId,
    },

    TypingStarted {
        conversation: ConversationKey,
        user_id: Uuid,
        display_name: String,
    },

    TypingStopped {
        conversation: ConversationKey,
        user_id: Uuid,
    },

    /// Full online set for the requested scope
    PresenceSnapshot { online: Vec<Uuid> },

    /// A single online/offline transition
    PresenceDelta { user_id: Uuid, online: bool },

    ReactionAdded {
        conversation: ConversationKey,
        message_id: MessageId,
        user_id: Uuid,
        emoji: String,
    },

    ReactionRemoved {
        conversation: ConversationKey,
        message_id: MessageId,
        user_id: Uuid,
        emoji: String,
    },

    UserMuted {
        user_id: Uuid,
        muted_until: Option<DateTime<Utc>>,
        reason: Option<String>,
    },

    UserUnmuted { user_id: Uuid },
}

impl GatewayEvent {
    /// The conversation this event is scoped to. Events returning `None` are
    /// delivered to connections regardless of their subscriptions.
    pub fn conversation(&self) -> Option<ConversationKey> {
        match self {
            Self::MessageReceived { message } => Some(message.conversation),
            Self::MessageRead { conversation, .. }
            | Self::TypingStarted { conversation, .. }
            | Self::TypingStopped { conversation, .. }
            | Self::ReactionAdded { conversation, .. }
            | Self::ReactionRemoved { conversation, .. } => Some(*conversation),
            _ => None,
        }
    }
}

/// Which identities a presence snapshot should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresenceScope {
    /// Every identity the caller can message directly
    Contacts,
    /// Members of one channel
    Channel { channel_id: Uuid },
    /// An explicit list
    Users { user_ids: Vec<Uuid> },
}

/// Commands sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    SendDirectMessage {
        recipient_id: Uuid,
        body: String,
        #[serde(default)]
        reply_to_id: Option<MessageId>,
        #[serde(default)]
        attachment: Option<String>,
        client_id: Uuid,
    },

    SendChannelMessage {
        channel_id: Uuid,
        body: String,
        #[serde(default)]
        reply_to_id: Option<MessageId>,
        #[serde(default)]
        attachment: Option<String>,
        client_id: Uuid,
    },

    TypingStart { conversation: ConversationKey },

    TypingStop { conversation: ConversationKey },

    ToggleReaction { message_id: MessageId, emoji: String },

    MarkRead {
        conversation: ConversationKey,
        up_to_message_id: MessageId,
    },

    /// Start receiving conversation-scoped events for these conversations.
    /// Direct pairs the caller belongs to are always delivered.
    Subscribe { conversations: Vec<ConversationKey> },

    Unsubscribe { conversations: Vec<ConversationKey> },

    PresenceSnapshot { scope: PresenceScope },
}
