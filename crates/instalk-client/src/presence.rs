use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::{debug, info};

/// Who is online right now. Ephemeral by design: never persisted, rebuilt
/// from a server snapshot at every session start.
pub struct PresenceStore {
    self_id: i64,
    online: RwLock<HashSet<i64>>,
}

impl PresenceStore {
    pub fn new(self_id: i64) -> Self {
        Self {
            self_id,
            online: RwLock::new(HashSet::new()),
        }
    }

    /// Replace the set from a full snapshot. The viewer's own id is excluded;
    /// their client being connected is not roster presence.
    pub async fn init(&self, snapshot: HashMap<i64, bool>) {
        let mut online = self.online.write().await;
        online.clear();
        for (user_id, is_online) in snapshot {
            if is_online && user_id != self.self_id {
                online.insert(user_id);
            }
        }
        info!(count = online.len(), "Initialized presence snapshot");
    }

    /// Apply one delta. Returns whether the set actually changed, so callers
    /// can suppress no-op notifications for repeated deltas.
    pub async fn apply(&self, user_id: i64, is_online: bool) -> bool {
        if user_id == self.self_id {
            return false;
        }
        let mut online = self.online.write().await;
        let changed = if is_online {
            online.insert(user_id)
        } else {
            online.remove(&user_id)
        };
        if changed {
            debug!(user_id, is_online, "Presence changed");
        }
        changed
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.online.read().await.contains(&user_id)
    }

    pub async fn online_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.online.read().await.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn clear(&self) {
        self.online.write().await.clear();
    }
}
