use std::sync::Arc;

use uuid::Uuid;

use huddle_types::api::UnreadResponse;
use huddle_types::events::GatewayEvent;
use huddle_types::models::ReadCursor;
use huddle_types::{ConversationKey, MessageId};

use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::store::{ChatStore, run_blocking};

/// Per (identity, conversation) read watermarks.
#[derive(Clone)]
pub struct ReadReceipts {
    store: Arc<dyn ChatStore>,
    dispatcher: Dispatcher,
}

impl ReadReceipts {
    pub fn new(store: Arc<dyn ChatStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Move the caller's cursor forward to `up_to`. Stale or repeated calls
    /// return the stored cursor unchanged and broadcast nothing.
    pub async fn mark_read(
        &self,
        user_id: Uuid,
        conversation: ConversationKey,
        up_to: MessageId,
    ) -> Result<ReadCursor> {
        let (allowed, target) = run_blocking(&self.store, move |s| {
            Ok((
                s.is_participant(conversation, user_id)?,
                s.message_conversation(up_to)?,
            ))
        })
        .await?;

        if !allowed {
            return Err(GatewayError::Forbidden(conversation.to_string()));
        }
        if target != Some(conversation) {
            return Err(GatewayError::Invalid(format!(
                "message {} is not in {}",
                up_to, conversation
            )));
        }

        let update = run_blocking(&self.store, move |s| {
            s.advance_read_cursor(user_id, conversation, up_to)
        })
        .await?;

        if update.advanced {
            self.dispatcher
                .fan_out(GatewayEvent::MessageRead {
                    conversation,
                    user_id,
                    last_read_message_id: update.last_read_message_id,
                })
                .await;
        }

        Ok(ReadCursor {
            identity_id: user_id,
            conversation,
            last_read_message_id: update.last_read_message_id,
        })
    }

    pub async fn unread(&self, user_id: Uuid, conversation: ConversationKey) -> Result<UnreadResponse> {
        let (allowed, (cursor, unread)) = run_blocking(&self.store, move |s| {
            Ok((s.is_participant(conversation, user_id)?, s.unread(user_id, conversation)?))
        })
        .await?;

        if !allowed {
            return Err(GatewayError::Forbidden(conversation.to_string()));
        }

        Ok(UnreadResponse {
            conversation,
            last_read_message_id: cursor,
            unread,
        })
    }
}
