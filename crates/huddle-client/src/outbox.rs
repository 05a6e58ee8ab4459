//! Sends waiting for a server answer.
//!
//! Entries leave the queue only on an ack, a policy rejection, or after the
//! attempt budget is spent. Nothing is dropped silently.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use huddle_types::events::GatewayCommand;
use huddle_types::{ConversationKey, MessageId};

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedSend {
    pub client_id: Uuid,
    pub conversation: ConversationKey,
    pub body: String,
    pub reply_to_id: Option<MessageId>,
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Failed attempts so far.
    pub attempts: u32,
    pub in_flight: bool,
}

impl QueuedSend {
    pub fn new(
        conversation: ConversationKey,
        body: String,
        reply_to_id: Option<MessageId>,
        attachment: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            conversation,
            body,
            reply_to_id,
            attachment,
            created_at,
            attempts: 0,
            in_flight: false,
        }
    }

    /// The wire command for this send, from `sender`'s point of view.
    pub fn command(&self, sender: Uuid) -> Option<GatewayCommand> {
        match self.conversation {
            ConversationKey::Direct { .. } => Some(GatewayCommand::SendDirectMessage {
                recipient_id: self.conversation.peer_of(sender)?,
                body: self.body.clone(),
                reply_to_id: self.reply_to_id,
                attachment: self.attachment.clone(),
                client_id: self.client_id,
            }),
            ConversationKey::Channel(channel_id) => Some(GatewayCommand::SendChannelMessage {
                channel_id,
                body: self.body.clone(),
                reply_to_id: self.reply_to_id,
                attachment: self.attachment.clone(),
                client_id: self.client_id,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again; `attempt` failures so far.
    Retry { attempt: u32 },
    /// Budget spent. The entry has been removed.
    GiveUp,
}

#[derive(Debug)]
pub struct Outbox {
    queue: VecDeque<QueuedSend>,
    max_attempts: u32,
}

impl Outbox {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn enqueue(&mut self, send: QueuedSend) {
        self.queue.push_back(send);
    }

    pub fn get(&self, client_id: Uuid) -> Option<&QueuedSend> {
        self.queue.iter().find(|s| s.client_id == client_id)
    }

    pub fn remove(&mut self, client_id: Uuid) -> Option<QueuedSend> {
        let index = self.queue.iter().position(|s| s.client_id == client_id)?;
        self.queue.remove(index)
    }

    pub fn mark_in_flight(&mut self, client_id: Uuid) -> bool {
        match self.queue.iter_mut().find(|s| s.client_id == client_id) {
            Some(send) => {
                send.in_flight = true;
                true
            }
            None => false,
        }
    }

    /// Count a failed attempt.
    pub fn record_failure(&mut self, client_id: Uuid) -> Option<RetryDecision> {
        let send = self.queue.iter_mut().find(|s| s.client_id == client_id)?;
        send.in_flight = false;
        send.attempts += 1;
        if send.attempts < self.max_attempts {
            return Some(RetryDecision::Retry { attempt: send.attempts });
        }
        self.remove(client_id);
        Some(RetryDecision::GiveUp)
    }

    /// The connection dropped: every in-flight send counts as a failed
    /// attempt. Returns the sends that gave up.
    pub fn transport_lost(&mut self) -> Vec<QueuedSend> {
        let in_flight: Vec<Uuid> = self
            .queue
            .iter()
            .filter(|s| s.in_flight)
            .map(|s| s.client_id)
            .collect();

        let mut exhausted = Vec::new();
        for client_id in in_flight {
            let snapshot = self.get(client_id).cloned();
            if let (Some(RetryDecision::GiveUp), Some(send)) = (self.record_failure(client_id), snapshot) {
                exhausted.push(send);
            }
        }
        exhausted
    }

    /// Sends not currently on the wire, oldest first.
    pub fn ready(&self) -> impl Iterator<Item = &QueuedSend> {
        self.queue.iter().filter(|s| !s.in_flight)
    }

    pub fn for_conversation(&self, conversation: ConversationKey) -> impl Iterator<Item = &QueuedSend> {
        self.queue.iter().filter(move |s| s.conversation == conversation)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
