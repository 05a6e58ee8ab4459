//! Everything the client knows, and how each server event changes it.
//!
//! No I/O happens here. The driver in `client` feeds events in and puts the
//! returned commands on the wire.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_types::api::ChannelMember;
use huddle_types::error::{SendRejection, validate_payload};
use huddle_types::events::{GatewayCommand, GatewayEvent};
use huddle_types::moderation::SendEligibility;
use huddle_types::{ConversationKey, MessageId};

use crate::config::ClientConfig;
use crate::moderation::ModerationMirror;
use crate::outbox::{Outbox, QueuedSend, RetryDecision};
use crate::presence::PresenceView;
use crate::timeline::{PendingMessage, PendingStatus, SendFailure};
use crate::typing::TypingIndicators;
use crate::view::ConversationView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What changed, for whoever renders the client state.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientUpdate {
    Connection(ConnectionState),
    Timeline(ConversationKey),
    Typing(ConversationKey),
    Presence,
    Moderation(Uuid),
    /// A send failed server-side and will be retried after a delay.
    RetryScheduled { client_id: Uuid, attempt: u32 },
    /// A send was rejected or ran out of retries.
    SendFailed {
        client_id: Uuid,
        conversation: ConversationKey,
    },
    /// Local state was discarded and is being refetched.
    Rebuilt(ConversationKey),
}

pub struct ClientState {
    owner: Uuid,
    page: u32,
    views: HashMap<ConversationKey, ConversationView>,
    outbox: Outbox,
    presence: PresenceView,
    typing: TypingIndicators,
    moderation: ModerationMirror,
    connection: ConnectionState,
}

impl ClientState {
    pub fn new(owner: Uuid, config: &ClientConfig) -> Self {
        Self {
            owner,
            page: config.history_page,
            views: HashMap::new(),
            outbox: Outbox::new(config.max_send_attempts),
            presence: PresenceView::default(),
            typing: TypingIndicators::new(config.typing_ttl),
            moderation: ModerationMirror::default(),
            connection: ConnectionState::Disconnected,
        }
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    // -- Views --

    /// Open a view in Loading. Sends still queued for the conversation show
    /// up in it straight away. Returns false if it was already open.
    pub fn open(&mut self, conversation: ConversationKey) -> bool {
        if self.views.contains_key(&conversation) {
            return false;
        }
        let mut view = ConversationView::new(conversation, self.owner, self.page);
        for send in self.outbox.for_conversation(conversation) {
            let status = if send.in_flight {
                PendingStatus::Sent
            } else {
                PendingStatus::Queued
            };
            view.timeline_mut().push_pending(pending_from(send, status));
        }
        self.views.insert(conversation, view);
        true
    }

    /// Close a view. Its queued sends stay in the outbox and still resolve.
    pub fn close(&mut self, conversation: ConversationKey) -> bool {
        self.typing.clear_conversation(conversation);
        self.views.remove(&conversation).is_some()
    }

    pub fn view(&self, conversation: ConversationKey) -> Option<&ConversationView> {
        self.views.get(&conversation)
    }

    pub fn view_mut(&mut self, conversation: ConversationKey) -> Option<&mut ConversationView> {
        self.views.get_mut(&conversation)
    }

    pub fn open_conversations(&self) -> Vec<ConversationKey> {
        let mut open: Vec<ConversationKey> = self.views.keys().copied().collect();
        open.sort();
        open
    }

    pub fn presence(&self) -> &PresenceView {
        &self.presence
    }

    pub fn typing_in(&self, conversation: ConversationKey, now: Instant) -> Vec<(Uuid, String)> {
        self.typing.typing_in(conversation, now)
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Advisory mute check for the owner.
    pub fn can_send(&self, now: DateTime<Utc>) -> SendEligibility {
        self.moderation.can_send(self.owner, now)
    }

    /// Seed mute state and presence from a channel member listing.
    pub fn seed_members(&mut self, members: &[ChannelMember]) -> Vec<ClientUpdate> {
        let mut updates = Vec::new();
        for member in members {
            self.moderation.seed(member.id, member.moderation.clone());
            updates.push(ClientUpdate::Moderation(member.id));
            self.presence.apply_delta(member.id, member.online);
        }
        updates.push(ClientUpdate::Presence);
        updates
    }

    // -- Sends --

    /// Check a send locally and queue it. The overlay entry appears in the
    /// open view immediately; nothing touches the confirmed timeline.
    pub fn compose(
        &mut self,
        conversation: ConversationKey,
        body: String,
        reply_to_id: Option<MessageId>,
        attachment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueuedSend, SendRejection> {
        validate_payload(&body, attachment.as_deref())?;
        if conversation.is_direct() && !conversation.involves(self.owner) {
            return Err(SendRejection::NotAMember);
        }

        let verdict = self.moderation.can_send(self.owner, now);
        if !verdict.allowed {
            return Err(SendRejection::Muted {
                reason: verdict.reason,
                muted_until: self.moderation.state(self.owner).and_then(|s| s.muted_until),
            });
        }

        let send = QueuedSend::new(conversation, body, reply_to_id, attachment, now);
        if let Some(view) = self.views.get_mut(&conversation) {
            view.timeline_mut()
                .push_pending(pending_from(&send, PendingStatus::Queued));
        }
        self.outbox.enqueue(send.clone());
        Ok(send)
    }

    /// Commands for every queued send, oldest first, marked in flight. Empty
    /// while disconnected.
    pub fn take_ready_sends(&mut self) -> Vec<GatewayCommand> {
        if !self.is_connected() {
            return Vec::new();
        }
        let ready: Vec<Uuid> = self.outbox.ready().map(|s| s.client_id).collect();
        ready
            .into_iter()
            .filter_map(|client_id| self.put_in_flight(client_id))
            .collect()
    }

    /// Command for one retry, if the send is still waiting and we are
    /// connected.
    pub fn retry_send(&mut self, client_id: Uuid) -> Option<GatewayCommand> {
        if !self.is_connected() || self.outbox.get(client_id)?.in_flight {
            return None;
        }
        self.put_in_flight(client_id)
    }

    fn put_in_flight(&mut self, client_id: Uuid) -> Option<GatewayCommand> {
        let send = self.outbox.get(client_id)?;
        let conversation = send.conversation;
        let command = send.command(self.owner)?;
        self.outbox.mark_in_flight(client_id);
        if let Some(view) = self.views.get_mut(&conversation) {
            view.timeline_mut()
                .set_pending_status(client_id, PendingStatus::Sent);
        }
        Some(command)
    }

    /// Drop a failed send from its view once the user has seen it.
    pub fn dismiss_failed(&mut self, conversation: ConversationKey, client_id: Uuid) -> bool {
        let Some(view) = self.views.get_mut(&conversation) else {
            return false;
        };
        let failed = view
            .timeline()
            .pending()
            .iter()
            .any(|p| p.client_id == client_id && matches!(p.status, PendingStatus::Failed(_)));
        failed && view.timeline_mut().remove_pending(client_id).is_some()
    }

    // -- Transport --

    pub fn transport_connecting(&mut self) -> Vec<ClientUpdate> {
        self.connection = ConnectionState::Connecting;
        vec![ClientUpdate::Connection(self.connection)]
    }

    pub fn transport_connected(&mut self) -> Vec<ClientUpdate> {
        self.connection = ConnectionState::Connected;
        vec![ClientUpdate::Connection(self.connection)]
    }

    /// Every live view starts reconnecting and every in-flight send counts a
    /// failed attempt.
    pub fn transport_dropped(&mut self) -> Vec<ClientUpdate> {
        self.connection = ConnectionState::Disconnected;
        let mut updates = vec![ClientUpdate::Connection(self.connection)];

        for view in self.views.values_mut() {
            view.transport_dropped();
        }

        for send in self.outbox.transport_lost() {
            warn!("giving up on send {} after {} attempts", send.client_id, send.attempts + 1);
            updates.extend(self.fail_pending(send.client_id, send.conversation, SendFailure::Exhausted));
        }

        let queued: Vec<(Uuid, ConversationKey)> = self
            .outbox
            .ready()
            .map(|s| (s.client_id, s.conversation))
            .collect();
        for (client_id, conversation) in queued {
            if let Some(view) = self.views.get_mut(&conversation) {
                view.timeline_mut()
                    .set_pending_status(client_id, PendingStatus::Queued);
            }
        }

        for conversation in self.open_conversations() {
            updates.push(ClientUpdate::Timeline(conversation));
        }
        updates
    }

    /// Subscription to re-establish after a reconnect.
    pub fn resubscribe(&self) -> Option<GatewayCommand> {
        let conversations = self.open_conversations();
        if conversations.is_empty() {
            return None;
        }
        Some(GatewayCommand::Subscribe { conversations })
    }

    // -- Local actions --

    /// Optimistically flip the owner's reaction; returns the command to send.
    pub fn toggle_reaction(
        &mut self,
        conversation: ConversationKey,
        message_id: MessageId,
        emoji: &str,
    ) -> Option<GatewayCommand> {
        let view = self.views.get_mut(&conversation)?;
        view.timeline_mut().toggle_reaction_local(message_id, emoji)?;
        Some(GatewayCommand::ToggleReaction {
            message_id,
            emoji: emoji.to_string(),
        })
    }

    /// Move the owner's cursor locally; returns the command only when it
    /// actually moved.
    pub fn mark_read(&mut self, conversation: ConversationKey, up_to: MessageId) -> Option<GatewayCommand> {
        let owner = self.owner;
        let view = self.views.get_mut(&conversation)?;
        if !view.timeline_mut().apply_read(owner, up_to) {
            return None;
        }
        Some(GatewayCommand::MarkRead {
            conversation,
            up_to_message_id: up_to,
        })
    }

    pub fn prune_typing(&mut self, now: Instant) -> Vec<ClientUpdate> {
        self.typing
            .prune(now)
            .into_iter()
            .map(ClientUpdate::Typing)
            .collect()
    }

    // -- Server events --

    /// Fold one server event into local state. The server's word always
    /// replaces any optimistic guess.
    pub fn apply(&mut self, event: GatewayEvent, now: Instant) -> Vec<ClientUpdate> {
        let mut updates = Vec::new();

        match event {
            GatewayEvent::Ready { user_id, .. } => {
                if user_id != self.owner {
                    warn!("gateway authenticated {} but client belongs to {}", user_id, self.owner);
                }
            }

            GatewayEvent::MessageReceived { message } => {
                let conversation = message.conversation;
                if self.typing.stopped(conversation, message.sender_id) {
                    updates.push(ClientUpdate::Typing(conversation));
                }
                if let Some(view) = self.views.get_mut(&conversation) {
                    if view.timeline_mut().apply_message(message) {
                        updates.push(ClientUpdate::Timeline(conversation));
                    }
                }
            }

            GatewayEvent::SendAck { client_id, message_id } => {
                let Some(send) = self.outbox.remove(client_id) else {
                    debug!("ack for unknown send {}", client_id);
                    return updates;
                };
                if let Some(view) = self.views.get_mut(&send.conversation) {
                    view.timeline_mut().ack(client_id, message_id);
                    updates.push(ClientUpdate::Timeline(send.conversation));
                }
            }

            GatewayEvent::SendRejected { client_id, reason } => {
                if let Some(send) = self.outbox.remove(client_id) {
                    warn!("send {} rejected: {}", client_id, reason);
                    updates.extend(self.fail_pending(client_id, send.conversation, SendFailure::Rejected(reason)));
                }
            }

            GatewayEvent::SendFailed { client_id } => {
                let Some(conversation) = self.outbox.get(client_id).map(|s| s.conversation) else {
                    return updates;
                };
                match self.outbox.record_failure(client_id) {
                    Some(RetryDecision::Retry { attempt }) => {
                        if let Some(view) = self.views.get_mut(&conversation) {
                            view.timeline_mut()
                                .set_pending_status(client_id, PendingStatus::Queued);
                        }
                        updates.push(ClientUpdate::RetryScheduled { client_id, attempt });
                    }
                    Some(RetryDecision::GiveUp) => {
                        updates.extend(self.fail_pending(client_id, conversation, SendFailure::Exhausted));
                    }
                    None => {}
                }
            }

            GatewayEvent::MessageRead {
                conversation,
                user_id,
                last_read_message_id,
            } => {
                if let Some(view) = self.views.get_mut(&conversation) {
                    if view.timeline_mut().apply_read(user_id, last_read_message_id) {
                        updates.push(ClientUpdate::Timeline(conversation));
                    }
                }
            }

            GatewayEvent::TypingStarted {
                conversation,
                user_id,
                display_name,
            } => {
                if user_id != self.owner && self.typing.started(conversation, user_id, display_name, now) {
                    updates.push(ClientUpdate::Typing(conversation));
                }
            }

            GatewayEvent::TypingStopped { conversation, user_id } => {
                if self.typing.stopped(conversation, user_id) {
                    updates.push(ClientUpdate::Typing(conversation));
                }
            }

            GatewayEvent::PresenceSnapshot { online } => {
                self.presence.apply_snapshot(online);
                updates.push(ClientUpdate::Presence);
            }

            GatewayEvent::PresenceDelta { user_id, online } => {
                if self.presence.apply_delta(user_id, online) {
                    updates.push(ClientUpdate::Presence);
                }
            }

            GatewayEvent::ReactionAdded {
                conversation,
                message_id,
                user_id,
                emoji,
            } => updates.extend(self.reaction(conversation, message_id, user_id, &emoji, true)),

            GatewayEvent::ReactionRemoved {
                conversation,
                message_id,
                user_id,
                emoji,
            } => updates.extend(self.reaction(conversation, message_id, user_id, &emoji, false)),

            GatewayEvent::UserMuted {
                user_id,
                muted_until,
                reason,
            } => {
                self.moderation.muted(user_id, muted_until, reason);
                updates.push(ClientUpdate::Moderation(user_id));
            }

            GatewayEvent::UserUnmuted { user_id } => {
                self.moderation.unmuted(user_id);
                updates.push(ClientUpdate::Moderation(user_id));
            }
        }

        updates
    }

    fn reaction(
        &mut self,
        conversation: ConversationKey,
        message_id: MessageId,
        user_id: Uuid,
        emoji: &str,
        added: bool,
    ) -> Option<ClientUpdate> {
        let view = self.views.get_mut(&conversation)?;
        view.timeline_mut().apply_reaction(message_id, user_id, emoji, added);
        Some(ClientUpdate::Timeline(conversation))
    }

    fn fail_pending(&mut self, client_id: Uuid, conversation: ConversationKey, failure: SendFailure) -> Vec<ClientUpdate> {
        if let Some(view) = self.views.get_mut(&conversation) {
            view.timeline_mut()
                .set_pending_status(client_id, PendingStatus::Failed(failure));
        }
        vec![
            ClientUpdate::Timeline(conversation),
            ClientUpdate::SendFailed {
                client_id,
                conversation,
            },
        ]
    }
}

fn pending_from(send: &QueuedSend, status: PendingStatus) -> PendingMessage {
    PendingMessage {
        client_id: send.client_id,
        body: send.body.clone(),
        reply_to_id: send.reply_to_id,
        attachment: send.attachment.clone(),
        created_at: send.created_at,
        status,
    }
}
