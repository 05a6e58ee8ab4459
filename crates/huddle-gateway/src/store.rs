//! Persistence contract consumed by the messaging core.
//!
//! Every method is blocking; async callers go through [`run_blocking`].

use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use huddle_db::Database;
pub use huddle_db::queries::{CursorUpdate, HistoryPage, InsertOutcome};
use huddle_db::models::MessageRow;
use huddle_types::models::{Identity, Message, ReactionGroup, Role};
use huddle_types::moderation::ModerationState;
use huddle_types::{ConversationKey, MessageId};

use crate::error::GatewayError;

/// A message accepted by the router, not yet assigned an id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation: ConversationKey,
    pub sender_id: Uuid,
    pub body: String,
    pub reply_to_id: Option<MessageId>,
    pub attachment: Option<String>,
    /// Sender-chosen idempotency key. A repeat stores nothing.
    pub client_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub trait ChatStore: Send + Sync + 'static {
    /// Mirror an authenticated account. Moderation state is preserved.
    fn upsert_identity(&self, id: Uuid, display_name: &str, role: Role) -> Result<()>;

    fn identity(&self, id: Uuid) -> Result<Option<Identity>>;

    fn identities(&self) -> Result<Vec<Identity>>;

    /// Returns false when the identity is unknown.
    fn set_moderation(&self, id: Uuid, state: &ModerationState) -> Result<bool>;

    /// Returns false when the id is already taken.
    fn create_channel(&self, channel_id: Uuid, name: &str) -> Result<bool>;

    fn channel_exists(&self, channel_id: Uuid) -> Result<bool>;

    /// Add or remove a member. Returns true when membership changed.
    fn set_channel_member(&self, channel_id: Uuid, user_id: Uuid, member: bool) -> Result<bool>;

    fn is_channel_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool>;

    fn channel_members(&self, channel_id: Uuid) -> Result<Vec<Identity>>;

    /// Durably store a message and return its ordering id. A repeated
    /// `(sender_id, client_id)` returns the first message's id with
    /// `created` false.
    fn insert_message(&self, message: &NewMessage) -> Result<InsertOutcome>;

    /// A stored message with its reactions grouped.
    fn message(&self, message_id: MessageId) -> Result<Option<Message>>;

    fn message_conversation(&self, message_id: MessageId) -> Result<Option<ConversationKey>>;

    /// Ascending page of history with reactions grouped.
    fn history(&self, conversation: ConversationKey, page: HistoryPage) -> Result<Vec<Message>>;

    /// Returns true when the reaction was added, false when retracted.
    fn toggle_reaction(&self, message_id: MessageId, user_id: Uuid, emoji: &str) -> Result<bool>;

    fn reactions(&self, message_id: MessageId) -> Result<Vec<ReactionGroup>>;

    fn advance_read_cursor(
        &self,
        user_id: Uuid,
        conversation: ConversationKey,
        up_to: MessageId,
    ) -> Result<CursorUpdate>;

    /// `(cursor, unread)` for the caller.
    fn unread(&self, user_id: Uuid, conversation: ConversationKey) -> Result<(MessageId, u64)>;

    /// Direct pairs admit both (existing) participants; channels admit their
    /// members.
    fn is_participant(&self, conversation: ConversationKey, user_id: Uuid) -> Result<bool> {
        match conversation {
            ConversationKey::Direct { .. } => {
                let Some(peer) = conversation.peer_of(user_id) else {
                    return Ok(false);
                };
                Ok(self.identity(user_id)?.is_some() && self.identity(peer)?.is_some())
            }
            ConversationKey::Channel(channel_id) => self.is_channel_member(channel_id, user_id),
        }
    }
}

/// Run a store call off the async runtime.
pub async fn run_blocking<T, F>(store: &Arc<dyn ChatStore>, f: F) -> Result<T, GatewayError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ChatStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    let value = tokio::task::spawn_blocking(move || f(store.as_ref())).await??;
    Ok(value)
}

fn with_reactions(db: &Database, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    let ids: Vec<MessageId> = rows.iter().map(|r| r.id).collect();
    let reaction_rows = db.get_reactions_for_messages(&ids)?;

    let mut messages = rows
        .into_iter()
        .map(Message::try_from)
        .collect::<Result<Vec<_>>>()?;

    for message in &mut messages {
        let rows_for_message = reaction_rows
            .iter()
            .filter(|r| r.message_id == message.id)
            .filter_map(|r| r.user_id.parse::<Uuid>().ok().map(|uid| (r.emoji.clone(), uid)));
        message.reactions = ReactionGroup::group(rows_for_message);
    }

    Ok(messages)
}

impl ChatStore for Database {
    fn upsert_identity(&self, id: Uuid, display_name: &str, role: Role) -> Result<()> {
        Database::upsert_identity(self, &id.to_string(), display_name, role.as_str())
    }

    fn identity(&self, id: Uuid) -> Result<Option<Identity>> {
        self.get_identity(&id.to_string())?
            .map(Identity::try_from)
            .transpose()
    }

    fn identities(&self) -> Result<Vec<Identity>> {
        self.list_identities()?
            .into_iter()
            .map(Identity::try_from)
            .collect()
    }

    fn set_moderation(&self, id: Uuid, state: &ModerationState) -> Result<bool> {
        Database::set_moderation(
            self,
            &id.to_string(),
            state.is_muted,
            state.muted_until,
            state.mute_reason.as_deref(),
        )
    }

    fn create_channel(&self, channel_id: Uuid, name: &str) -> Result<bool> {
        Database::create_channel(self, &channel_id.to_string(), name)
    }

    fn channel_exists(&self, channel_id: Uuid) -> Result<bool> {
        Database::channel_exists(self, &channel_id.to_string())
    }

    fn set_channel_member(&self, channel_id: Uuid, user_id: Uuid, member: bool) -> Result<bool> {
        let (channel, user) = (channel_id.to_string(), user_id.to_string());
        if member {
            self.add_channel_member(&channel, &user)
        } else {
            self.remove_channel_member(&channel, &user)
        }
    }

    fn is_channel_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool> {
        Database::is_channel_member(self, &channel_id.to_string(), &user_id.to_string())
    }

    fn channel_members(&self, channel_id: Uuid) -> Result<Vec<Identity>> {
        Database::channel_members(self, &channel_id.to_string())?
            .into_iter()
            .map(Identity::try_from)
            .collect()
    }

    fn insert_message(&self, message: &NewMessage) -> Result<InsertOutcome> {
        Database::insert_message(
            self,
            &message.conversation.to_string(),
            &message.sender_id.to_string(),
            &message.body,
            message.reply_to_id,
            message.attachment.as_deref(),
            message.client_id.map(|id| id.to_string()).as_deref(),
            message.created_at,
        )
    }

    fn message(&self, message_id: MessageId) -> Result<Option<Message>> {
        let Some(row) = self.get_message(message_id)? else {
            return Ok(None);
        };
        Ok(with_reactions(self, vec![row])?.pop())
    }

    fn message_conversation(&self, message_id: MessageId) -> Result<Option<ConversationKey>> {
        Database::message_conversation(self, message_id)?
            .map(|raw| {
                raw.parse::<ConversationKey>()
                    .with_context(|| format!("corrupt conversation key on message {}", message_id))
            })
            .transpose()
    }

    fn history(&self, conversation: ConversationKey, page: HistoryPage) -> Result<Vec<Message>> {
        let rows = self.get_messages(&conversation.to_string(), page)?;
        with_reactions(self, rows)
    }

    fn toggle_reaction(&self, message_id: MessageId, user_id: Uuid, emoji: &str) -> Result<bool> {
        Database::toggle_reaction(self, message_id, &user_id.to_string(), emoji)
    }

    fn reactions(&self, message_id: MessageId) -> Result<Vec<ReactionGroup>> {
        let rows = self.get_reactions_for_messages(&[message_id])?;
        Ok(ReactionGroup::group(rows.into_iter().filter_map(|r| {
            r.user_id.parse::<Uuid>().ok().map(|uid| (r.emoji, uid))
        })))
    }

    fn advance_read_cursor(
        &self,
        user_id: Uuid,
        conversation: ConversationKey,
        up_to: MessageId,
    ) -> Result<CursorUpdate> {
        Database::advance_read_cursor(self, &user_id.to_string(), &conversation.to_string(), up_to)
    }

    fn unread(&self, user_id: Uuid, conversation: ConversationKey) -> Result<(MessageId, u64)> {
        let uid = user_id.to_string();
        let key = conversation.to_string();
        Ok((self.read_cursor(&uid, &key)?, self.unread_count(&uid, &key)?))
    }
}
