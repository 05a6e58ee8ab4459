//! Database row types. These map directly to SQLite rows and are converted
//! into `huddle-types` models at the edge.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use huddle_types::ConversationKey;
use huddle_types::models::{Identity, Message, Role};
use huddle_types::moderation::ModerationState;

pub struct IdentityRow {
    pub id: String,
    pub display_name: String,
    pub role: String,
    pub is_muted: bool,
    pub muted_until: Option<String>,
    pub mute_reason: Option<String>,
}

pub struct MessageRow {
    pub id: i64,
    pub conversation_key: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub reply_to_id: Option<i64>,
    pub attachment: Option<String>,
    pub created_at: String,
}

pub struct ReactionRow {
    pub message_id: i64,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

/// Accepts RFC 3339 as written by this crate, and SQLite's own
/// `YYYY-MM-DD HH:MM:SS` from column defaults.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .with_context(|| format!("bad timestamp '{}'", raw))
}

impl IdentityRow {
    pub fn moderation(&self) -> Result<ModerationState> {
        Ok(ModerationState {
            is_muted: self.is_muted,
            muted_until: self.muted_until.as_deref().map(parse_timestamp).transpose()?,
            mute_reason: self.mute_reason.clone(),
        })
    }
}

impl TryFrom<IdentityRow> for Identity {
    type Error = anyhow::Error;

    fn try_from(row: IdentityRow) -> Result<Self> {
        let moderation = row.moderation()?;
        Ok(Identity {
            id: row.id.parse::<Uuid>().with_context(|| format!("corrupt user id '{}'", row.id))?,
            role: row.role.parse::<Role>().map_err(anyhow::Error::msg)?,
            display_name: row.display_name,
            moderation,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: row.id,
            conversation: row
                .conversation_key
                .parse::<ConversationKey>()
                .with_context(|| format!("corrupt conversation key on message {}", row.id))?,
            sender_id: row
                .sender_id
                .parse::<Uuid>()
                .with_context(|| format!("corrupt sender id on message {}", row.id))?,
            sender_name: row.sender_name,
            body: row.body,
            created_at: parse_timestamp(&row.created_at)?,
            reply_to_id: row.reply_to_id,
            attachment: row.attachment,
            reactions: Vec::new(),
        })
    }
}
