//! One conversation's messages as the client renders them.
//!
//! Authoritative messages live in a map keyed by ordering id, so the same
//! message delivered by a push and by a history page is stored once and
//! iteration is always ascending. Sends that have not been confirmed yet sit
//! in a separate overlay keyed by their client id and never touch the
//! authoritative map.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use huddle_types::error::SendRejection;
use huddle_types::models::{Message, ReactionGroup};
use huddle_types::{ConversationKey, MessageId};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SendFailure {
    /// Refused by the server's policy checks.
    Rejected(SendRejection),
    /// Ran out of retries.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PendingStatus {
    /// Waiting for a connection.
    Queued,
    /// Written to the socket, no answer yet.
    Sent,
    /// Accepted as this id; the message itself has not arrived yet.
    Acked(MessageId),
    Failed(SendFailure),
}

/// An optimistic send shown until the server's copy replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub client_id: Uuid,
    pub body: String,
    pub reply_to_id: Option<MessageId>,
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: PendingStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimelineEntry<'a> {
    Confirmed(&'a Message),
    Pending(&'a PendingMessage),
}

#[derive(Debug, Clone)]
pub struct Timeline {
    conversation: ConversationKey,
    owner: Uuid,
    messages: BTreeMap<MessageId, Message>,
    pending: Vec<PendingMessage>,
    /// The owner's reaction toggles not yet confirmed: desired presence.
    reaction_overlay: HashMap<(MessageId, String), bool>,
    read_cursors: HashMap<Uuid, MessageId>,
}

impl Timeline {
    pub fn new(conversation: ConversationKey, owner: Uuid) -> Self {
        Self {
            conversation,
            owner,
            messages: BTreeMap::new(),
            pending: Vec::new(),
            reaction_overlay: HashMap::new(),
            read_cursors: HashMap::new(),
        }
    }

    /// Rebuild from a locally cached copy. Fails if the cache holds another
    /// conversation's messages or two different messages under one id.
    pub fn from_cache(conversation: ConversationKey, owner: Uuid, cached: Vec<Message>) -> Result<Self> {
        let mut timeline = Self::new(conversation, owner);
        for message in cached {
            if message.conversation != conversation {
                return Err(timeline.corrupt(format!(
                    "message {} belongs to {}",
                    message.id, message.conversation
                )));
            }
            if let Some(existing) = timeline.messages.get(&message.id) {
                if *existing != message {
                    return Err(timeline.corrupt(format!("two versions of message {}", message.id)));
                }
                continue;
            }
            timeline.messages.insert(message.id, message);
        }
        Ok(timeline)
    }

    pub fn conversation(&self) -> ConversationKey {
        self.conversation
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Insert an authoritative message. A copy of a known id refreshes its
    /// reactions. Returns false when nothing changed and for messages from
    /// other conversations. A pending send already acked as this id is
    /// retired in the same step.
    pub fn apply_message(&mut self, message: Message) -> bool {
        if message.conversation != self.conversation {
            warn!(
                "dropping message {} for {} routed to {}",
                message.id, message.conversation, self.conversation
            );
            return false;
        }
        self.insert(message)
    }

    /// Merge a history page. Any message for another conversation means the
    /// page cannot be trusted, and nothing from it is applied.
    pub fn apply_history(&mut self, page: Vec<Message>) -> Result<usize> {
        if let Some(foreign) = page.iter().find(|m| m.conversation != self.conversation) {
            return Err(self.corrupt(format!(
                "history page contains message {} from {}",
                foreign.id, foreign.conversation
            )));
        }
        Ok(page.into_iter().filter(|m| self.insert(m.clone())).count())
    }

    fn insert(&mut self, message: Message) -> bool {
        let id = message.id;
        if let Some(existing) = self.messages.get_mut(&id) {
            if existing.reactions == message.reactions {
                return false;
            }
            existing.reactions = message.reactions;
            self.settle_overlay(id);
            return true;
        }
        self.messages.insert(id, message);
        self.pending.retain(|p| p.status != PendingStatus::Acked(id));
        true
    }

    /// Forget the owner's toggles on `message_id` that the stored reactions
    /// already reflect.
    fn settle_overlay(&mut self, message_id: MessageId) {
        let Some(message) = self.messages.get(&message_id) else {
            return;
        };
        let owner = self.owner;
        self.reaction_overlay.retain(|(id, emoji), desired| {
            *id != message_id || has_reacted(&message.reactions, emoji, owner) != *desired
        });
    }

    pub fn push_pending(&mut self, pending: PendingMessage) {
        if self.pending.iter().any(|p| p.client_id == pending.client_id) {
            return;
        }
        self.pending.push(pending);
    }

    pub fn set_pending_status(&mut self, client_id: Uuid, status: PendingStatus) -> bool {
        match self.pending.iter_mut().find(|p| p.client_id == client_id) {
            Some(pending) => {
                pending.status = status;
                true
            }
            None => false,
        }
    }

    /// The server accepted `client_id` as `message_id`. If the pushed message
    /// already arrived the overlay entry goes now, otherwise it waits for it.
    pub fn ack(&mut self, client_id: Uuid, message_id: MessageId) -> bool {
        if self.messages.contains_key(&message_id) {
            return self.remove_pending(client_id).is_some();
        }
        self.set_pending_status(client_id, PendingStatus::Acked(message_id))
    }

    pub fn remove_pending(&mut self, client_id: Uuid) -> Option<PendingMessage> {
        let index = self.pending.iter().position(|p| p.client_id == client_id)?;
        Some(self.pending.remove(index))
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn highest_id(&self) -> Option<MessageId> {
        self.messages.keys().next_back().copied()
    }

    pub fn lowest_id(&self) -> Option<MessageId> {
        self.messages.keys().next().copied()
    }

    /// Confirmed messages in ascending id order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// What a view renders: confirmed messages ascending, then unconfirmed
    /// sends in the order they were composed.
    pub fn entries(&self) -> Vec<TimelineEntry<'_>> {
        self.messages
            .values()
            .map(TimelineEntry::Confirmed)
            .chain(self.pending.iter().map(TimelineEntry::Pending))
            .collect()
    }

    // -- Reactions --

    /// Apply a confirmed reaction delta. Deltas are set operations, so
    /// arrival order between different identities does not matter.
    pub fn apply_reaction(&mut self, message_id: MessageId, user_id: Uuid, emoji: &str, added: bool) -> bool {
        if user_id == self.owner {
            self.reaction_overlay.remove(&(message_id, emoji.to_string()));
        }
        let Some(message) = self.messages.get_mut(&message_id) else {
            return false;
        };
        set_membership(&mut message.reactions, emoji, user_id, added)
    }

    /// Optimistically flip the owner's reaction. Returns the state the
    /// server is being asked for.
    pub fn toggle_reaction_local(&mut self, message_id: MessageId, emoji: &str) -> Option<bool> {
        let message = self.messages.get(&message_id)?;
        let key = (message_id, emoji.to_string());
        let current = match self.reaction_overlay.get(&key) {
            Some(desired) => *desired,
            None => has_reacted(&message.reactions, emoji, self.owner),
        };
        self.reaction_overlay.insert(key, !current);
        Some(!current)
    }

    /// Drop an optimistic toggle the server never confirmed.
    pub fn revert_reaction(&mut self, message_id: MessageId, emoji: &str) {
        self.reaction_overlay.remove(&(message_id, emoji.to_string()));
    }

    /// Reaction groups with the owner's unconfirmed toggles folded in.
    pub fn reactions(&self, message_id: MessageId) -> Vec<ReactionGroup> {
        let Some(message) = self.messages.get(&message_id) else {
            return Vec::new();
        };
        let mut groups = message.reactions.clone();
        for ((id, emoji), desired) in &self.reaction_overlay {
            if *id == message_id {
                set_membership(&mut groups, emoji, self.owner, *desired);
            }
        }
        groups
    }

    // -- Read cursors --

    /// Cursors only move forward.
    pub fn apply_read(&mut self, user_id: Uuid, up_to: MessageId) -> bool {
        let cursor = self.read_cursors.entry(user_id).or_insert(0);
        if up_to > *cursor {
            *cursor = up_to;
            true
        } else {
            false
        }
    }

    pub fn read_cursor(&self, user_id: Uuid) -> MessageId {
        self.read_cursors.get(&user_id).copied().unwrap_or(0)
    }

    /// Messages after the owner's cursor that someone else sent.
    pub fn unread_count(&self) -> usize {
        let cursor = self.read_cursor(self.owner);
        self.messages
            .range((Bound::Excluded(cursor), Bound::Unbounded))
            .filter(|(_, m)| m.sender_id != self.owner)
            .count()
    }

    /// Every stored message is keyed by its own id and belongs here.
    pub fn check_invariants(&self) -> Result<()> {
        for (id, message) in &self.messages {
            if *id != message.id {
                return Err(self.corrupt(format!("message {} stored under {}", message.id, id)));
            }
            if message.conversation != self.conversation {
                return Err(self.corrupt(format!(
                    "message {} belongs to {}",
                    message.id, message.conversation
                )));
            }
        }
        Ok(())
    }

    fn corrupt(&self, detail: String) -> ClientError {
        ClientError::CorruptState {
            conversation: self.conversation,
            detail,
        }
    }
}

fn has_reacted(groups: &[ReactionGroup], emoji: &str, user_id: Uuid) -> bool {
    groups
        .iter()
        .any(|g| g.emoji == emoji && g.user_ids.contains(&user_id))
}

/// Add or remove `user_id` from the `emoji` group, keeping groups sorted by
/// emoji and members sorted by id.
fn set_membership(groups: &mut Vec<ReactionGroup>, emoji: &str, user_id: Uuid, present: bool) -> bool {
    let index = match groups.binary_search_by(|g| g.emoji.as_str().cmp(emoji)) {
        Ok(index) => index,
        Err(index) => {
            if !present {
                return false;
            }
            groups.insert(
                index,
                ReactionGroup {
                    emoji: emoji.to_string(),
                    count: 0,
                    user_ids: Vec::new(),
                },
            );
            index
        }
    };

    let group = &mut groups[index];
    let changed = match (group.user_ids.binary_search(&user_id), present) {
        (Err(at), true) => {
            group.user_ids.insert(at, user_id);
            true
        }
        (Ok(at), false) => {
            group.user_ids.remove(at);
            true
        }
        _ => false,
    };
    group.count = group.user_ids.len();
    if group.user_ids.is_empty() {
        groups.remove(index);
    }
    changed
}
