use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use huddle_types::MessageId;
use huddle_types::api::ReactionState;
use huddle_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::store::{ChatStore, run_blocking};

const MAX_EMOJI_LEN: usize = 32;

#[derive(Clone)]
pub struct ReactionAggregator {
    store: Arc<dyn ChatStore>,
    dispatcher: Dispatcher,
}

impl ReactionAggregator {
    pub fn new(store: Arc<dyn ChatStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Add the reaction if absent, retract it if present. Toggles by
    /// different identities touch disjoint rows and commute.
    pub async fn toggle(&self, message_id: MessageId, user_id: Uuid, emoji: &str) -> Result<ReactionState> {
        let emoji = emoji.trim().to_string();
        if emoji.is_empty() || emoji.len() > MAX_EMOJI_LEN {
            return Err(GatewayError::Invalid("emoji".to_string()));
        }

        let conversation = run_blocking(&self.store, move |s| s.message_conversation(message_id))
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("message {}", message_id)))?;

        let toggled = emoji.clone();
        let (allowed, added, reactions) = run_blocking(&self.store, move |s| {
            if !s.is_participant(conversation, user_id)? {
                return Ok((false, false, Vec::new()));
            }
            let added = s.toggle_reaction(message_id, user_id, &toggled)?;
            Ok((true, added, s.reactions(message_id)?))
        })
        .await?;

        if !allowed {
            return Err(GatewayError::Forbidden(conversation.to_string()));
        }

        debug!(
            "{} {} {} on message {}",
            user_id,
            if added { "added" } else { "removed" },
            emoji,
            message_id
        );

        let event = if added {
            GatewayEvent::ReactionAdded {
                conversation,
                message_id,
                user_id,
                emoji,
            }
        } else {
            GatewayEvent::ReactionRemoved {
                conversation,
                message_id,
                user_id,
                emoji,
            }
        };
        self.dispatcher.fan_out(event).await;

        Ok(ReactionState {
            message_id,
            conversation,
            added,
            reactions,
        })
    }
}
