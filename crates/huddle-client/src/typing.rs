use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use huddle_types::ConversationKey;

/// Typing indicators as seen by this client. Each one expires on its own
/// after the TTL, whether or not a stop ever arrives.
#[derive(Debug)]
pub struct TypingIndicators {
    ttl: Duration,
    active: HashMap<(ConversationKey, Uuid), (String, Instant)>,
}

impl TypingIndicators {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            active: HashMap::new(),
        }
    }

    /// Record or refresh an indicator. Returns true if it was not showing.
    pub fn started(&mut self, conversation: ConversationKey, user_id: Uuid, display_name: String, now: Instant) -> bool {
        let expires_at = now + self.ttl;
        let previous = self
            .active
            .insert((conversation, user_id), (display_name, expires_at));
        !matches!(previous, Some((_, at)) if at > now)
    }

    pub fn stopped(&mut self, conversation: ConversationKey, user_id: Uuid) -> bool {
        self.active.remove(&(conversation, user_id)).is_some()
    }

    /// Drop expired indicators and return the conversations that changed.
    pub fn prune(&mut self, now: Instant) -> Vec<ConversationKey> {
        let mut changed = Vec::new();
        self.active.retain(|(conversation, _), (_, expires_at)| {
            let live = *expires_at > now;
            if !live && !changed.contains(conversation) {
                changed.push(*conversation);
            }
            live
        });
        changed
    }

    /// Who is typing in `conversation`, sorted by name. Expired entries are
    /// hidden even before a prune.
    pub fn typing_in(&self, conversation: ConversationKey, now: Instant) -> Vec<(Uuid, String)> {
        let mut typing: Vec<(Uuid, String)> = self
            .active
            .iter()
            .filter(|((c, _), (_, expires_at))| *c == conversation && *expires_at > now)
            .map(|((_, user_id), (name, _))| (*user_id, name.clone()))
            .collect();
        typing.sort_by(|a, b| a.1.cmp(&b.1));
        typing
    }

    pub fn clear_conversation(&mut self, conversation: ConversationKey) {
        self.active.retain(|(c, _), _| *c != conversation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_clears_after_ttl_without_stop() {
        let conversation = ConversationKey::channel(Uuid::from_u128(1));
        let bob = Uuid::from_u128(2);
        let mut typing = TypingIndicators::new(Duration::from_secs(3));
        let t0 = Instant::now();

        assert!(typing.started(conversation, bob, "Bob".into(), t0));
        assert_eq!(typing.typing_in(conversation, t0 + Duration::from_secs(2)).len(), 1);
        assert!(typing.typing_in(conversation, t0 + Duration::from_secs(3)).is_empty());
        assert_eq!(typing.prune(t0 + Duration::from_secs(4)), vec![conversation]);
        assert!(typing.prune(t0 + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn refresh_extends_deadline() {
        let conversation = ConversationKey::channel(Uuid::from_u128(1));
        let bob = Uuid::from_u128(2);
        let mut typing = TypingIndicators::new(Duration::from_secs(3));
        let t0 = Instant::now();

        typing.started(conversation, bob, "Bob".into(), t0);
        assert!(!typing.started(conversation, bob, "Bob".into(), t0 + Duration::from_secs(2)));
        assert!(typing.prune(t0 + Duration::from_secs(4)).is_empty());
        assert_eq!(typing.typing_in(conversation, t0 + Duration::from_secs(4))[0].0, bob);
        assert!(typing.stopped(conversation, bob));
        assert!(!typing.stopped(conversation, bob));
    }
}
