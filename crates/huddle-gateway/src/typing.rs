//! Ephemeral typing state per (conversation, identity).
//!
//! Entries expire on their own after the TTL; a stop signal only ends them
//! early. Nothing here is persisted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use huddle_types::ConversationKey;
use huddle_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;

pub struct TypingCoordinator {
    ttl: Duration,
    active: Mutex<HashMap<(ConversationKey, Uuid), Instant>>,
}

impl TypingCoordinator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record or refresh typing. Returns the new expiry.
    pub async fn start(&self, conversation: ConversationKey, user_id: Uuid, now: Instant) -> Instant {
        let expires_at = now + self.ttl;
        self.active.lock().await.insert((conversation, user_id), expires_at);
        expires_at
    }

    /// End typing early. Returns true if an unexpired entry was removed.
    pub async fn stop(&self, conversation: ConversationKey, user_id: Uuid, now: Instant) -> bool {
        self.active
            .lock()
            .await
            .remove(&(conversation, user_id))
            .is_some_and(|expires_at| expires_at > now)
    }

    pub async fn is_typing(&self, conversation: ConversationKey, user_id: Uuid, now: Instant) -> bool {
        self.active
            .lock()
            .await
            .get(&(conversation, user_id))
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Identities currently typing in a conversation, sorted.
    pub async fn typing_in(&self, conversation: ConversationKey, now: Instant) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self
            .active
            .lock()
            .await
            .iter()
            .filter(|((key, _), expires_at)| *key == conversation && **expires_at > now)
            .map(|((_, user_id), _)| *user_id)
            .collect();
        users.sort();
        users
    }

    /// Drop expired entries and return them.
    pub async fn prune(&self, now: Instant) -> Vec<(ConversationKey, Uuid)> {
        let mut active = self.active.lock().await;
        let expired: Vec<(ConversationKey, Uuid)> = active
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            active.remove(key);
        }
        expired
    }

    /// Drop every entry for an identity, e.g. when it goes offline.
    pub async fn forget(&self, user_id: Uuid) -> Vec<ConversationKey> {
        let mut active = self.active.lock().await;
        let conversations: Vec<ConversationKey> = active
            .keys()
            .filter(|(_, uid)| *uid == user_id)
            .map(|(conversation, _)| *conversation)
            .collect();
        for conversation in &conversations {
            active.remove(&(*conversation, user_id));
        }
        conversations
    }
}

/// Background task that expires typing state and tells followers.
pub async fn run_expiry_loop(typing: Arc<TypingCoordinator>, dispatcher: Dispatcher, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        let expired = typing.prune(Instant::now()).await;
        if !expired.is_empty() {
            debug!("Typing: expired {} indicators", expired.len());
        }
        for (conversation, user_id) in expired {
            trace!("typing in {} by {} expired", conversation, user_id);
            dispatcher
                .fan_out_except(GatewayEvent::TypingStopped { conversation, user_id }, user_id)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3);

    fn key() -> ConversationKey {
        ConversationKey::channel(Uuid::from_u128(1))
    }

    #[tokio::test]
    async fn start_without_stop_expires_after_ttl() {
        let typing = TypingCoordinator::new(TTL);
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        typing.start(key(), user, t0).await;
        assert!(typing.is_typing(key(), user, t0 + Duration::from_secs(2)).await);
        assert!(!typing.is_typing(key(), user, t0 + TTL).await);

        let expired = typing.prune(t0 + TTL).await;
        assert_eq!(expired, vec![(key(), user)]);
        assert!(typing.prune(t0 + TTL * 2).await.is_empty());
    }

    #[tokio::test]
    async fn refresh_extends_expiry() {
        let typing = TypingCoordinator::new(TTL);
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        typing.start(key(), user, t0).await;
        typing.start(key(), user, t0 + Duration::from_secs(2)).await;
        assert!(typing.is_typing(key(), user, t0 + Duration::from_secs(4)).await);
        assert!(typing.prune(t0 + Duration::from_secs(4)).await.is_empty());
    }

    #[tokio::test]
    async fn stop_ends_early_and_only_once() {
        let typing = TypingCoordinator::new(TTL);
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        typing.start(key(), user, t0).await;
        assert!(typing.stop(key(), user, t0).await);
        assert!(!typing.stop(key(), user, t0).await);
        assert!(typing.typing_in(key(), t0).await.is_empty());
    }

    #[tokio::test]
    async fn forget_clears_all_conversations() {
        let typing = TypingCoordinator::new(TTL);
        let user = Uuid::new_v4();
        let other = ConversationKey::channel(Uuid::from_u128(2));
        let t0 = Instant::now();

        typing.start(key(), user, t0).await;
        typing.start(other, user, t0).await;
        let mut cleared = typing.forget(user).await;
        cleared.sort();
        assert_eq!(cleared.len(), 2);
        assert!(typing.typing_in(other, t0).await.is_empty());
    }
}
