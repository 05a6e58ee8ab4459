//! Accepts sends, assigns ordering ids, persists, then fans out.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};
use uuid::Uuid;

use huddle_types::error::{SendRejection, validate_payload};
use huddle_types::events::GatewayEvent;
use huddle_types::models::Message;
use huddle_types::{ConversationKey, MessageId};

use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::mute_gate::MuteGate;
use crate::store::{ChatStore, NewMessage, run_blocking};

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub conversation: ConversationKey,
    pub sender_id: Uuid,
    pub body: String,
    pub reply_to_id: Option<MessageId>,
    pub attachment: Option<String>,
    /// Idempotency key chosen by the sender. A repeat returns the message
    /// stored the first time and is not fanned out again.
    pub client_id: Option<Uuid>,
}

type LockTable = std::sync::Mutex<HashMap<ConversationKey, Arc<Mutex<()>>>>;

#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn ChatStore>,
    dispatcher: Dispatcher,
    /// One lock per conversation with a send in flight. Id assignment,
    /// persistence and fan-out for a conversation happen under it, so
    /// followers receive messages in id order.
    locks: Arc<LockTable>,
}

/// Holds a conversation lock. Dropping it releases the lock and removes the
/// table entry once nobody else is waiting on it.
struct ConversationGuard {
    locks: Arc<LockTable>,
    conversation: ConversationKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        if let Some(lock) = table.get(&self.conversation) {
            // Only the table still holds it
            if Arc::strong_count(lock) == 1 {
                table.remove(&self.conversation);
            }
        }
    }
}

impl MessageRouter {
    pub fn new(store: Arc<dyn ChatStore>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Validate, authorize and gate a send, then persist and fan it out.
    ///
    /// Once the checks pass, persistence and fan-out run on their own task:
    /// dropping the returned future does not leave a stored message that
    /// followers never hear about.
    pub async fn send(&self, req: SendRequest) -> Result<Message> {
        validate_payload(&req.body, req.attachment.as_deref())?;

        let conversation = req.conversation;
        let sender_id = req.sender_id;
        let (is_member, sender) = run_blocking(&self.store, move |s| {
            Ok((s.is_participant(conversation, sender_id)?, s.identity(sender_id)?))
        })
        .await?;

        let sender = match sender {
            Some(sender) if is_member => sender,
            _ => return Err(SendRejection::NotAMember.into()),
        };

        MuteGate::enforce(&sender.moderation, Utc::now())?;

        let router = self.clone();
        tokio::spawn(async move {
            let _guard = router.lock(conversation).await;
            router.persist_and_fan_out(req, sender.display_name).await
        })
        .await?
    }

    async fn persist_and_fan_out(&self, req: SendRequest, sender_name: String) -> Result<Message> {
        let conversation = req.conversation;

        if let Some(reply_to_id) = req.reply_to_id {
            let target = run_blocking(&self.store, move |s| s.message_conversation(reply_to_id)).await?;
            if target != Some(conversation) {
                return Err(SendRejection::UnknownReplyTarget { reply_to_id }.into());
            }
        }

        let draft = NewMessage {
            conversation,
            sender_id: req.sender_id,
            body: req.body,
            reply_to_id: req.reply_to_id,
            attachment: req.attachment,
            client_id: req.client_id,
            created_at: Utc::now(),
        };

        let stored = draft.clone();
        let outcome = run_blocking(&self.store, move |s| s.insert_message(&stored))
            .await
            .inspect_err(|e| error!("failed to persist message in {}: {}", conversation, e))?;

        if !outcome.created {
            info!("replayed send {:?} maps to message {}", draft.client_id, outcome.id);
            let id = outcome.id;
            return run_blocking(&self.store, move |s| s.message(id))
                .await?
                .ok_or_else(|| GatewayError::NotFound(format!("message {}", id)));
        }

        let message = Message {
            id: outcome.id,
            conversation,
            sender_id: draft.sender_id,
            sender_name,
            body: draft.body,
            created_at: draft.created_at,
            reply_to_id: draft.reply_to_id,
            attachment: draft.attachment,
            reactions: Vec::new(),
        };

        debug!("message {} stored in {}", message.id, conversation);
        self.dispatcher
            .fan_out(GatewayEvent::MessageReceived {
                message: message.clone(),
            })
            .await;

        Ok(message)
    }

    async fn lock(&self, conversation: ConversationKey) -> ConversationGuard {
        let lock = {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            table.entry(conversation).or_default().clone()
        };
        ConversationGuard {
            locks: self.locks.clone(),
            conversation,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Conversations with a send in flight or queued.
    pub fn locked_conversations(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }
}
