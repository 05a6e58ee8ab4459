use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use huddle_types::ConversationKey;
use huddle_types::events::GatewayEvent;

use crate::presence::PresenceTracker;
use crate::session::{ConnectionId, PresenceChange};

/// Outbound side of one live connection.
struct ConnectionHandle {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    /// Conversations this connection asked to follow. Direct pairs the owner
    /// belongs to are delivered without a subscription.
    subscriptions: HashSet<ConversationKey>,
}

impl ConnectionHandle {
    fn follows(&self, conversation: &ConversationKey) -> bool {
        conversation.involves(self.user_id) || self.subscriptions.contains(conversation)
    }
}

/// Manages all connected clients and fans events out to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// conn_id -> outbound handle
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,

    presence: PresenceTracker,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                connections: RwLock::new(HashMap::new()),
                presence: PresenceTracker::new(),
            }),
        }
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.inner.presence
    }

    /// Register a connection for `user_id`. Returns (conn_id, receiver).
    pub async fn register_connection(
        &self,
        user_id: Uuid,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionHandle {
                user_id,
                tx,
                subscriptions: HashSet::new(),
            },
        );
        self.inner.presence.connect(user_id, conn_id).await;
        (conn_id, rx)
    }

    /// Drop a connection. Idempotent: a second call for the same id is a
    /// no-op. Returns the offline transition if this was the owner's last
    /// connection.
    pub async fn unregister_connection(&self, conn_id: ConnectionId) -> Option<PresenceChange> {
        self.inner.connections.write().await.remove(&conn_id);
        self.inner.presence.disconnect(conn_id).await
    }

    pub async fn subscribe(&self, conn_id: ConnectionId, conversations: &[ConversationKey]) {
        if let Some(handle) = self.inner.connections.write().await.get_mut(&conn_id) {
            handle.subscriptions.extend(conversations.iter().copied());
        }
    }

    pub async fn unsubscribe(&self, conn_id: ConnectionId, conversations: &[ConversationKey]) {
        if let Some(handle) = self.inner.connections.write().await.get_mut(&conn_id) {
            for conversation in conversations {
                handle.subscriptions.remove(conversation);
            }
        }
    }

    /// Drop `conversation` from every connection owned by `user_id`.
    pub async fn unsubscribe_user(&self, user_id: Uuid, conversation: ConversationKey) {
        let mut connections = self.inner.connections.write().await;
        for handle in connections.values_mut().filter(|h| h.user_id == user_id) {
            handle.subscriptions.remove(&conversation);
        }
    }

    /// Deliver an event to every connection that follows its conversation.
    /// Unscoped events go to everyone.
    pub async fn fan_out(&self, event: GatewayEvent) {
        self.fan_out_filtered(event, None).await;
    }

    /// Like [`fan_out`](Self::fan_out) but skips every connection owned by
    /// `except`. Used for signals about the sender itself, such as typing.
    pub async fn fan_out_except(&self, event: GatewayEvent, except: Uuid) {
        self.fan_out_filtered(event, Some(except)).await;
    }

    async fn fan_out_filtered(&self, event: GatewayEvent, except: Option<Uuid>) {
        let scope = event.conversation();
        let connections = self.inner.connections.read().await;
        for handle in connections.values() {
            if except == Some(handle.user_id) {
                continue;
            }
            if let Some(conversation) = &scope {
                if !handle.follows(conversation) {
                    continue;
                }
            }
            let _ = handle.tx.send(event.clone());
        }
    }

    /// Send an event to every connection of one identity.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        for handle in connections.values().filter(|h| h.user_id == user_id) {
            let _ = handle.tx.send(event.clone());
        }
    }

    pub async fn send_to_connection(&self, conn_id: ConnectionId, event: GatewayEvent) {
        if let Some(handle) = self.inner.connections.read().await.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}
