use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use instalk_core::{Api, Group};

use crate::error::Result;

/// Group rosters: everything discoverable plus the subset the user belongs
/// to. Conversation validity checks use membership, not discoverability.
pub struct GroupStore<A: Api> {
    api: Arc<A>,
    all: RwLock<Vec<Group>>,
    mine: RwLock<Vec<Group>>,
}

impl<A: Api> GroupStore<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            all: RwLock::new(Vec::new()),
            mine: RwLock::new(Vec::new()),
        }
    }

    pub async fn refresh_all(&self) -> Result<()> {
        let groups = self.api.fetch_groups().await?;
        *self.all.write().await = groups;
        Ok(())
    }

    pub async fn refresh_mine(&self) -> Result<()> {
        let groups = self.api.fetch_my_groups().await?;
        info!(count = groups.len(), "Refreshed joined groups");
        *self.mine.write().await = groups;
        Ok(())
    }

    /// Membership test. Backs the conversation existence guard.
    pub async fn contains(&self, group_id: i64) -> bool {
        self.mine.read().await.iter().any(|g| g.id == group_id)
    }

    pub async fn get(&self, group_id: i64) -> Option<Group> {
        let mine = self.mine.read().await;
        if let Some(group) = mine.iter().find(|g| g.id == group_id) {
            return Some(group.clone());
        }
        drop(mine);
        self.all
            .read()
            .await
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
    }

    pub async fn create(&self, name: &str) -> Result<Group> {
        let group = self.api.create_group(name).await?;
        self.mine.write().await.push(group.clone());
        Ok(group)
    }

    pub async fn join(&self, group_id: i64) -> Result<()> {
        self.api.join_group(group_id).await?;
        // The membership list needs the full record; refresh rather than
        // guessing at one locally.
        self.refresh_mine().await
    }

    pub async fn leave(&self, group_id: i64) -> Result<bool> {
        self.api.leave_group(group_id).await?;
        Ok(self.remove_local(group_id).await)
    }

    /// Local-only removal, used for push-announced dissolutions.
    pub async fn remove_local(&self, group_id: i64) -> bool {
        let mut mine = self.mine.write().await;
        let before = mine.len();
        mine.retain(|g| g.id != group_id);
        let removed = mine.len() != before;
        if removed {
            debug!(group_id, "Left group");
        }
        self.all.write().await.retain(|g| g.id != group_id);
        removed
    }

    pub async fn all(&self) -> Vec<Group> {
        self.all.read().await.clone()
    }

    pub async fn mine(&self) -> Vec<Group> {
        self.mine.read().await.clone()
    }

    pub async fn clear(&self) {
        self.all.write().await.clear();
        self.mine.write().await.clear();
    }
}
