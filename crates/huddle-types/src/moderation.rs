use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Moderation state authored by administrators outside the messaging core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationState {
    pub is_muted: bool,
    /// `None` with `is_muted` set means muted indefinitely.
    #[serde(default)]
    pub muted_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mute_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEligibility {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SendEligibility {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }
}

impl ModerationState {
    pub fn muted(until: Option<DateTime<Utc>>, reason: Option<String>) -> Self {
        Self {
            is_muted: true,
            muted_until: until,
            mute_reason: reason,
        }
    }

    /// Whether the mute is in force at `now`. Expiry is purely a function of
    /// the clock; nothing has to fire when `muted_until` passes.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_muted && self.muted_until.map_or(true, |until| now < until)
    }

    /// The mute gate rule. Servers treat the answer as authoritative; clients
    /// only use it to give early feedback.
    pub fn can_send(&self, now: DateTime<Utc>) -> SendEligibility {
        if !self.is_active(now) {
            return SendEligibility::allowed();
        }

        let reason = match (&self.mute_reason, self.muted_until) {
            (Some(reason), _) => reason.clone(),
            (None, Some(until)) => format!("muted until {}", until.to_rfc3339()),
            (None, None) => "muted indefinitely".to_string(),
        };

        SendEligibility {
            allowed: false,
            reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn muted_for_another_hour_cannot_send() {
        let now = Utc::now();
        let state = ModerationState::muted(Some(now + Duration::hours(1)), None);
        let verdict = state.can_send(now);
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().starts_with("muted until"));
    }

    #[test]
    fn expired_mute_can_send() {
        let now = Utc::now();
        let state = ModerationState::muted(Some(now - Duration::seconds(1)), Some("spam".into()));
        assert!(state.can_send(now).allowed);
    }

    #[test]
    fn indefinite_mute_never_expires() {
        let state = ModerationState::muted(None, Some("flooding the triage channel".into()));
        let far_future = Utc::now() + Duration::days(3650);
        let verdict = state.can_send(far_future);
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason.as_deref(), Some("flooding the triage channel"));
    }

    #[test]
    fn mute_ends_exactly_at_deadline() {
        let now = Utc::now();
        let state = ModerationState::muted(Some(now), None);
        assert!(state.can_send(now).allowed);
    }

    #[test]
    fn unmuted_ignores_stale_deadline() {
        let now = Utc::now();
        let state = ModerationState {
            is_muted: false,
            muted_until: Some(now + Duration::hours(1)),
            mute_reason: None,
        };
        assert!(state.can_send(now).allowed);
    }
}
