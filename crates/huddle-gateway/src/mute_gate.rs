//! Authoritative send-eligibility check against moderation state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use huddle_types::error::SendRejection;
use huddle_types::events::GatewayEvent;
use huddle_types::moderation::{ModerationState, SendEligibility};

use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::store::{ChatStore, run_blocking};

#[derive(Clone)]
pub struct MuteGate {
    store: Arc<dyn ChatStore>,
    dispatcher: Dispatcher,
}

impl MuteGate {
    pub fn new(store: Arc<dyn ChatStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Look up the identity's current moderation state and apply the rule.
    pub async fn can_send(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<SendEligibility> {
        let identity = run_blocking(&self.store, move |s| s.identity(user_id)).await?;
        Ok(match identity {
            Some(identity) => identity.moderation.can_send(now),
            None => SendEligibility {
                allowed: false,
                reason: Some("unknown identity".to_string()),
            },
        })
    }

    /// Turn a denial into the rejection surfaced to the sender.
    pub fn enforce(state: &ModerationState, now: DateTime<Utc>) -> std::result::Result<(), SendRejection> {
        let verdict = state.can_send(now);
        if verdict.allowed {
            return Ok(());
        }
        Err(SendRejection::Muted {
            reason: verdict.reason,
            muted_until: state.muted_until,
        })
    }

    /// Record a moderation change made by an administrator and tell every
    /// connection about it.
    pub async fn apply(&self, user_id: Uuid, state: ModerationState) -> Result<()> {
        let stored = state.clone();
        let found = run_blocking(&self.store, move |s| s.set_moderation(user_id, &stored)).await?;
        if !found {
            return Err(GatewayError::NotFound(format!("user {}", user_id)));
        }

        let event = if state.is_muted {
            info!(
                "{} muted until {:?} ({})",
                user_id,
                state.muted_until,
                state.mute_reason.as_deref().unwrap_or("no reason")
            );
            GatewayEvent::UserMuted {
                user_id,
                muted_until: state.muted_until,
                reason: state.mute_reason,
            }
        } else {
            info!("{} unmuted", user_id);
            GatewayEvent::UserUnmuted { user_id }
        };

        self.dispatcher.fan_out(event).await;
        Ok(())
    }
}
