use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::moderation::ModerationState;
use crate::{ConversationKey, MessageId};

/// Closed set of account roles. Owned by the account subsystem; the messaging
/// core only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Tester,
    Developer,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Tester => "tester",
            Self::Developer => "developer",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "tester" => Ok(Self::Tester),
            "developer" => Ok(Self::Developer),
            "viewer" => Ok(Self::Viewer),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    pub role: Role,
    pub moderation: ModerationState,
}

/// A persisted message. Immutable apart from its reaction set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation: ConversationKey,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    /// Opaque reference handed out by the upload service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    #[serde(default)]
    pub reactions: Vec<ReactionGroup>,
}

/// Reactions on one message for one emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

impl ReactionGroup {
    /// Group raw `(emoji, user)` rows. Output is sorted by emoji and user id
    /// so the same membership always yields the same view.
    pub fn group<I>(rows: I) -> Vec<ReactionGroup>
    where
        I: IntoIterator<Item = (String, Uuid)>,
    {
        let mut by_emoji: BTreeMap<String, BTreeSet<Uuid>> = BTreeMap::new();
        for (emoji, user_id) in rows {
            by_emoji.entry(emoji).or_default().insert(user_id);
        }

        by_emoji
            .into_iter()
            .map(|(emoji, users)| ReactionGroup {
                emoji,
                count: users.len(),
                user_ids: users.into_iter().collect(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCursor {
    pub identity_id: Uuid,
    pub conversation: ConversationKey,
    pub last_read_message_id: MessageId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_dedups_and_sorts() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let groups = ReactionGroup::group(vec![
            ("🐛".to_string(), b),
            ("👍".to_string(), b),
            ("👍".to_string(), a),
            ("👍".to_string(), a),
        ]);

        assert_eq!(groups.len(), 2);
        let thumbs = groups.iter().find(|g| g.emoji == "👍").unwrap();
        assert_eq!(thumbs.count, 2);
        assert_eq!(thumbs.user_ids, vec![a, b]);
    }

    #[test]
    fn role_text_roundtrip() {
        for role in [Role::Admin, Role::Manager, Role::Tester, Role::Developer, Role::Viewer] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("owner".parse::<Role>().is_err());
    }
}
