use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::ConversationKeyError;

/// Canonical identifier for a conversation.
///
/// A direct pair stores its participants sorted, so the key is the same no
/// matter who opened the conversation. Text form is `dm:<low>:<high>` or
/// `ch:<channel id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationKey {
    Direct { low: Uuid, high: Uuid },
    Channel(Uuid),
}

impl ConversationKey {
    pub fn direct(a: Uuid, b: Uuid) -> Result<Self, ConversationKeyError> {
        if a == b {
            return Err(ConversationKeyError::SelfConversation);
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self::Direct { low, high })
    }

    pub fn channel(channel_id: Uuid) -> Self {
        Self::Channel(channel_id)
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }

    pub fn channel_id(&self) -> Option<Uuid> {
        match self {
            Self::Channel(id) => Some(*id),
            Self::Direct { .. } => None,
        }
    }

    /// Both participants of a direct pair. `None` for channels, whose
    /// membership lives in the store.
    pub fn participants(&self) -> Option<[Uuid; 2]> {
        match self {
            Self::Direct { low, high } => Some([*low, *high]),
            Self::Channel(_) => None,
        }
    }

    /// Whether `user_id` is one of the pair. Always false for channels.
    pub fn involves(&self, user_id: Uuid) -> bool {
        match self {
            Self::Direct { low, high } => *low == user_id || *high == user_id,
            Self::Channel(_) => false,
        }
    }

    /// The other side of a direct pair, as seen by `user_id`.
    pub fn peer_of(&self, user_id: Uuid) -> Option<Uuid> {
        match self {
            Self::Direct { low, high } if *low == user_id => Some(*high),
            Self::Direct { low, high } if *high == user_id => Some(*low),
            _ => None,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { low, high } => write!(f, "dm:{}:{}", low, high),
            Self::Channel(id) => write!(f, "ch:{}", id),
        }
    }
}

impl FromStr for ConversationKey {
    type Err = ConversationKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConversationKeyError::Malformed(s.to_string());

        if let Some(rest) = s.strip_prefix("dm:") {
            let (a, b) = rest.split_once(':').ok_or_else(malformed)?;
            let a: Uuid = a.parse().map_err(|_| malformed())?;
            let b: Uuid = b.parse().map_err(|_| malformed())?;
            return Self::direct(a, b);
        }

        if let Some(rest) = s.strip_prefix("ch:") {
            let id: Uuid = rest.parse().map_err(|_| malformed())?;
            return Ok(Self::Channel(id));
        }

        Err(malformed())
    }
}

impl Serialize for ConversationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConversationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_key_is_initiator_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(
            ConversationKey::direct(a, b).unwrap(),
            ConversationKey::direct(b, a).unwrap()
        );
        assert_eq!(
            ConversationKey::direct(a, b).unwrap().to_string(),
            ConversationKey::direct(b, a).unwrap().to_string()
        );
    }

    #[test]
    fn self_conversation_rejected() {
        let a = Uuid::new_v4();
        assert_eq!(
            ConversationKey::direct(a, a),
            Err(ConversationKeyError::SelfConversation)
        );
    }

    #[test]
    fn unsorted_text_form_is_canonicalized() {
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        let parsed: ConversationKey = format!("dm:{}:{}", a, b).parse().unwrap();
        assert_eq!(parsed.to_string(), format!("dm:{}:{}", b, a));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            "room:42".parse::<ConversationKey>(),
            Err(ConversationKeyError::Malformed(_))
        ));
        assert!("ch:not-a-uuid".parse::<ConversationKey>().is_err());
    }

    #[test]
    fn serde_uses_text_form() {
        let key = ConversationKey::channel(Uuid::from_u128(7));
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"ch:{}\"", Uuid::from_u128(7)));
        let back: ConversationKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn peer_lookup() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let key = ConversationKey::direct(a, b).unwrap();
        assert_eq!(key.peer_of(a), Some(b));
        assert_eq!(key.peer_of(b), Some(a));
        assert_eq!(key.peer_of(Uuid::new_v4()), None);
        assert!(key.involves(a));
        assert!(!ConversationKey::channel(a).involves(a));
    }
}
