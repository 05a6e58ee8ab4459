//! Reference-counted map from identities to their live connections.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

pub type ConnectionId = Uuid;

/// A net online/offline transition for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceChange {
    pub user_id: Uuid,
    pub online: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    by_identity: HashMap<Uuid, HashSet<ConnectionId>>,
    owners: HashMap<ConnectionId, Uuid>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a change only on the identity's first connection.
    pub fn register(&mut self, user_id: Uuid, conn_id: ConnectionId) -> Option<PresenceChange> {
        if self.owners.contains_key(&conn_id) {
            return None;
        }
        self.owners.insert(conn_id, user_id);

        let conns = self.by_identity.entry(user_id).or_default();
        conns.insert(conn_id);
        (conns.len() == 1).then_some(PresenceChange {
            user_id,
            online: true,
        })
    }

    /// Idempotent. Returns a change only when the identity's last connection
    /// goes away.
    pub fn unregister(&mut self, conn_id: ConnectionId) -> Option<PresenceChange> {
        let user_id = self.owners.remove(&conn_id)?;

        let conns = self.by_identity.get_mut(&user_id)?;
        conns.remove(&conn_id);
        if !conns.is_empty() {
            return None;
        }

        self.by_identity.remove(&user_id);
        Some(PresenceChange {
            user_id,
            online: false,
        })
    }

    pub fn owner(&self, conn_id: ConnectionId) -> Option<Uuid> {
        self.owners.get(&conn_id).copied()
    }

    pub fn connections_of(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.by_identity
            .get(&user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.by_identity.contains_key(&user_id)
    }

    pub fn online(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.by_identity.keys().copied()
    }

    pub fn connection_count(&self) -> usize {
        self.owners.len()
    }
}
