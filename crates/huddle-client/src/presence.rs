use std::collections::HashSet;

use uuid::Uuid;

/// Who this client believes is online. A snapshot replaces everything; each
/// delta overwrites one identity's state.
#[derive(Debug, Default)]
pub struct PresenceView {
    online: HashSet<Uuid>,
}

impl PresenceView {
    pub fn apply_snapshot(&mut self, online: Vec<Uuid>) {
        self.online = online.into_iter().collect();
    }

    /// Returns true when the identity's state changed.
    pub fn apply_delta(&mut self, user_id: Uuid, online: bool) -> bool {
        if online {
            self.online.insert(user_id)
        } else {
            self.online.remove(&user_id)
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains(&user_id)
    }

    pub fn online(&self) -> impl Iterator<Item = &Uuid> {
        self.online.iter()
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }
}
