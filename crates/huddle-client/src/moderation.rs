use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use huddle_types::moderation::{ModerationState, SendEligibility};

/// Local copy of moderation state fed by `user_muted`/`user_unmuted` pushes.
/// Only for immediate feedback; the server decides.
#[derive(Debug, Default)]
pub struct ModerationMirror {
    states: HashMap<Uuid, ModerationState>,
}

impl ModerationMirror {
    pub fn muted(&mut self, user_id: Uuid, muted_until: Option<DateTime<Utc>>, reason: Option<String>) {
        self.states
            .insert(user_id, ModerationState::muted(muted_until, reason));
    }

    pub fn unmuted(&mut self, user_id: Uuid) {
        self.states.remove(&user_id);
    }

    /// Seed from a channel member listing.
    pub fn seed(&mut self, user_id: Uuid, state: ModerationState) {
        if state.is_muted {
            self.states.insert(user_id, state);
        } else {
            self.states.remove(&user_id);
        }
    }

    pub fn state(&self, user_id: Uuid) -> Option<&ModerationState> {
        self.states.get(&user_id)
    }

    pub fn can_send(&self, user_id: Uuid, now: DateTime<Utc>) -> SendEligibility {
        self.states
            .get(&user_id)
            .map(|state| state.can_send(now))
            .unwrap_or_else(SendEligibility::allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn mirror_follows_pushes_and_clock() {
        let user = Uuid::from_u128(5);
        let now = Utc::now();
        let mut mirror = ModerationMirror::default();
        assert!(mirror.can_send(user, now).allowed);

        mirror.muted(user, Some(now + Duration::hours(1)), Some("flooding".into()));
        let verdict = mirror.can_send(user, now);
        assert!(!verdict.allowed);
        assert!(verdict.reason.is_some());
        assert!(mirror.can_send(user, now + Duration::hours(2)).allowed);

        mirror.unmuted(user);
        assert!(mirror.can_send(user, now).allowed);
    }
}
