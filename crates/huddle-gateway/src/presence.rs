//! Online set derived from session registry mutations.
//!
//! Deltas are published while the registry lock is held, so subscribers see
//! transitions for an identity in the order they happened. A subscriber that
//! lags should fall back to a fresh snapshot.

use std::collections::HashSet;

use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use crate::session::{ConnectionId, PresenceChange, SessionRegistry};

const DELTA_CAPACITY: usize = 1024;

pub struct PresenceTracker {
    registry: RwLock<SessionRegistry>,
    deltas: broadcast::Sender<PresenceChange>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        let (deltas, _) = broadcast::channel(DELTA_CAPACITY);
        Self {
            registry: RwLock::new(SessionRegistry::new()),
            deltas,
        }
    }

    pub async fn connect(&self, user_id: Uuid, conn_id: ConnectionId) -> Option<PresenceChange> {
        let mut registry = self.registry.write().await;
        let change = registry.register(user_id, conn_id);
        if let Some(change) = change {
            debug!("{} is now online", user_id);
            let _ = self.deltas.send(change);
        }
        change
    }

    /// Safe to call more than once for the same connection.
    pub async fn disconnect(&self, conn_id: ConnectionId) -> Option<PresenceChange> {
        let mut registry = self.registry.write().await;
        let change = registry.unregister(conn_id);
        if let Some(change) = change {
            debug!("{} is now offline", change.user_id);
            let _ = self.deltas.send(change);
        }
        change
    }

    /// Subscribe to online/offline transitions.
    pub fn on_delta(&self) -> broadcast::Receiver<PresenceChange> {
        self.deltas.subscribe()
    }

    /// Online identities among `scope`, sorted.
    pub async fn snapshot<I>(&self, scope: I) -> Vec<Uuid>
    where
        I: IntoIterator<Item = Uuid>,
    {
        let registry = self.registry.read().await;
        let mut online: Vec<Uuid> = scope
            .into_iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|id| registry.is_online(*id))
            .collect();
        online.sort();
        online
    }

    pub async fn snapshot_all(&self) -> Vec<Uuid> {
        let registry = self.registry.read().await;
        let mut online: Vec<Uuid> = registry.online().collect();
        online.sort();
        online
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.registry.read().await.is_online(user_id)
    }

    pub async fn owner(&self, conn_id: ConnectionId) -> Option<Uuid> {
        self.registry.read().await.owner(conn_id)
    }
}
