//! Real-time presence and messaging core: session registry, presence,
//! typing, mute gate, message routing, reactions and read cursors, plus the
//! WebSocket connection loop that drives them.

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod mute_gate;
pub mod presence;
pub mod reactions;
pub mod receipts;
pub mod router;
pub mod session;
pub mod store;
pub mod typing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use huddle_types::ConversationKey;
use huddle_types::api::{Channel, Claims};
use huddle_types::events::{GatewayEvent, PresenceScope};
use huddle_types::models::Role;

use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::mute_gate::MuteGate;
use crate::reactions::ReactionAggregator;
use crate::receipts::ReadReceipts;
use crate::router::MessageRouter;
use crate::session::ConnectionId;
use crate::store::{ChatStore, run_blocking};
use crate::typing::TypingCoordinator;

/// Every core component, wired to one store and one dispatcher.
#[derive(Clone)]
pub struct Gateway {
    pub store: Arc<dyn ChatStore>,
    pub dispatcher: Dispatcher,
    pub router: MessageRouter,
    pub mute_gate: MuteGate,
    pub typing: Arc<TypingCoordinator>,
    pub reactions: ReactionAggregator,
    pub receipts: ReadReceipts,
    /// Last (display name, role) mirrored per identity, so repeat
    /// authentications skip the write.
    mirrored: Arc<RwLock<HashMap<Uuid, (String, Role)>>>,
}

impl Gateway {
    pub fn new(store: Arc<dyn ChatStore>, typing_ttl: Duration) -> Self {
        let dispatcher = Dispatcher::new();
        Self {
            router: MessageRouter::new(store.clone(), dispatcher.clone()),
            mute_gate: MuteGate::new(store.clone(), dispatcher.clone()),
            typing: Arc::new(TypingCoordinator::new(typing_ttl)),
            reactions: ReactionAggregator::new(store.clone(), dispatcher.clone()),
            receipts: ReadReceipts::new(store.clone(), dispatcher.clone()),
            store,
            dispatcher,
            mirrored: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mirror the identity behind a validated token into the store. Runs on
    /// every authenticated entry point so a fresh account can message right
    /// away.
    pub async fn ensure_identity(&self, claims: &Claims) -> Result<()> {
        let current = (claims.display_name.clone(), claims.role);
        if self.mirrored.read().await.get(&claims.sub) == Some(&current) {
            return Ok(());
        }

        let id = claims.sub;
        let (display_name, role) = current.clone();
        run_blocking(&self.store, move |s| s.upsert_identity(id, &display_name, role)).await?;
        debug!("mirrored identity {} ({})", id, current.1);
        self.mirrored.write().await.insert(id, current);
        Ok(())
    }

    pub async fn create_channel(&self, name: &str) -> Result<Channel> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(GatewayError::Invalid("channel name".into()));
        }

        let channel = Channel {
            id: Uuid::new_v4(),
            name,
        };
        let (id, stored_name) = (channel.id, channel.name.clone());
        run_blocking(&self.store, move |s| s.create_channel(id, &stored_name)).await?;
        info!("channel {} ({}) created", channel.name, channel.id);
        Ok(channel)
    }

    /// Grant or revoke channel membership. A removed member's connections
    /// stop following the channel and any typing indicator is cleared.
    pub async fn set_channel_member(&self, channel_id: Uuid, user_id: Uuid, member: bool) -> Result<bool> {
        let changed = run_blocking(&self.store, move |s| {
            if !s.channel_exists(channel_id)? {
                return Ok(Err(GatewayError::NotFound(format!("channel {}", channel_id))));
            }
            if s.identity(user_id)?.is_none() {
                return Ok(Err(GatewayError::NotFound(format!("user {}", user_id))));
            }
            s.set_channel_member(channel_id, user_id, member).map(Ok)
        })
        .await??;

        if changed {
            info!("{} {} channel {}", user_id, if member { "joined" } else { "left" }, channel_id);
        }
        if changed && !member {
            let conversation = ConversationKey::channel(channel_id);
            self.dispatcher.unsubscribe_user(user_id, conversation).await;
            self.stop_typing(conversation, user_id).await;
        }
        Ok(changed)
    }

    /// Online identities visible to `caller` within `scope`.
    pub async fn presence_snapshot(&self, caller: Uuid, scope: &PresenceScope) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = match scope {
            PresenceScope::Contacts => run_blocking(&self.store, move |s| s.identities())
                .await?
                .into_iter()
                .map(|identity| identity.id)
                .filter(|id| *id != caller)
                .collect(),
            PresenceScope::Channel { channel_id } => {
                let channel_id = *channel_id;
                let (member, members) = run_blocking(&self.store, move |s| {
                    Ok((s.is_channel_member(channel_id, caller)?, s.channel_members(channel_id)?))
                })
                .await?;
                if !member {
                    return Err(GatewayError::Forbidden(ConversationKey::channel(channel_id).to_string()));
                }
                members.into_iter().map(|identity| identity.id).collect()
            }
            PresenceScope::Users { user_ids } => user_ids.clone(),
        };

        Ok(self.dispatcher.presence().snapshot(ids).await)
    }

    /// Keep only the conversations `user_id` may follow.
    pub async fn authorized_conversations(
        &self,
        user_id: Uuid,
        conversations: Vec<ConversationKey>,
    ) -> Result<Vec<ConversationKey>> {
        run_blocking(&self.store, move |s| {
            let mut allowed = Vec::with_capacity(conversations.len());
            for conversation in conversations {
                if s.is_participant(conversation, user_id)? {
                    allowed.push(conversation);
                }
            }
            Ok(allowed)
        })
        .await
    }

    /// Record typing and tell the other participants. Muted identities and
    /// non-participants are ignored.
    pub async fn start_typing(&self, conversation: ConversationKey, user_id: Uuid) -> Result<bool> {
        let identity = run_blocking(&self.store, move |s| {
            if !s.is_participant(conversation, user_id)? {
                return Ok(None);
            }
            s.identity(user_id)
        })
        .await?;

        let Some(identity) = identity else {
            return Ok(false);
        };
        if !identity.moderation.can_send(Utc::now()).allowed {
            debug!("ignoring typing from muted {}", user_id);
            return Ok(false);
        }

        self.typing.start(conversation, user_id, Instant::now()).await;
        self.dispatcher
            .fan_out_except(
                GatewayEvent::TypingStarted {
                    conversation,
                    user_id,
                    display_name: identity.display_name,
                },
                user_id,
            )
            .await;
        Ok(true)
    }

    pub async fn stop_typing(&self, conversation: ConversationKey, user_id: Uuid) -> bool {
        let was_typing = self.typing.stop(conversation, user_id, Instant::now()).await;
        if was_typing {
            self.dispatcher
                .fan_out_except(GatewayEvent::TypingStopped { conversation, user_id }, user_id)
                .await;
        }
        was_typing
    }

    /// Tear down a connection. When it was the identity's last one, its
    /// typing indicators are cleared too.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let Some(change) = self.dispatcher.unregister_connection(conn_id).await else {
            return;
        };
        for conversation in self.typing.forget(change.user_id).await {
            self.dispatcher
                .fan_out_except(
                    GatewayEvent::TypingStopped {
                        conversation,
                        user_id: change.user_id,
                    },
                    change.user_id,
                )
                .await;
        }
    }
}
