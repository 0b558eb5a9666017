use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use instalk_core::{Api, Friend, FriendRequest};

use crate::error::Result;

/// The friend roster and the inbound request queue.
pub struct FriendStore<A: Api> {
    api: Arc<A>,
    friends: RwLock<Vec<Friend>>,
    pending: RwLock<Vec<FriendRequest>>,
}

impl<A: Api> FriendStore<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            friends: RwLock::new(Vec::new()),
            pending: RwLock::new(Vec::new()),
        }
    }

    pub async fn refresh(&self) -> Result<()> {
        let friends = self.api.fetch_friends().await?;
        info!(count = friends.len(), "Refreshed friend list");
        *self.friends.write().await = friends;
        Ok(())
    }

    pub async fn refresh_pending(&self) -> Result<()> {
        let pending = self.api.fetch_pending_requests().await?;
        *self.pending.write().await = pending;
        Ok(())
    }

    pub async fn contains(&self, friend_id: i64) -> bool {
        self.friends.read().await.iter().any(|f| f.id == friend_id)
    }

    pub async fn get(&self, friend_id: i64) -> Option<Friend> {
        self.friends
            .read()
            .await
            .iter()
            .find(|f| f.id == friend_id)
            .cloned()
    }

    pub async fn send_request(&self, user_id: i64) -> Result<()> {
        self.api.send_friend_request(user_id).await?;
        Ok(())
    }

    /// Accept a pending request; the server returns the new friend, which is
    /// added to the roster and removed from the queue.
    pub async fn accept(&self, request_id: i64) -> Result<Friend> {
        let friend = self.api.accept_friend_request(request_id).await?;
        self.pending.write().await.retain(|r| r.id != request_id);
        let mut friends = self.friends.write().await;
        if !friends.iter().any(|f| f.id == friend.id) {
            friends.push(friend.clone());
        }
        Ok(friend)
    }

    pub async fn reject(&self, request_id: i64) -> Result<()> {
        self.api.reject_friend_request(request_id).await?;
        self.pending.write().await.retain(|r| r.id != request_id);
        Ok(())
    }

    /// Delete a friendship server-side, then locally.
    pub async fn remove(&self, friend_id: i64) -> Result<bool> {
        self.api.delete_friend(friend_id).await?;
        Ok(self.remove_local(friend_id).await)
    }

    /// Local-only removal, used for push-announced deletions.
    pub async fn remove_local(&self, friend_id: i64) -> bool {
        let mut friends = self.friends.write().await;
        let before = friends.len();
        friends.retain(|f| f.id != friend_id);
        let removed = friends.len() != before;
        if removed {
            debug!(friend_id, "Removed friend");
        }
        removed
    }

    pub async fn friends(&self) -> Vec<Friend> {
        self.friends.read().await.clone()
    }

    pub async fn pending(&self) -> Vec<FriendRequest> {
        self.pending.read().await.clone()
    }

    pub async fn clear(&self) {
        self.friends.write().await.clear();
        self.pending.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockApi;
    use instalk_core::UserProfile;

    #[tokio::test]
    async fn accept_moves_request_to_roster() {
        let api = Arc::new(MockApi::new());
        *api.pending.lock().unwrap() = vec![FriendRequest {
            id: 5,
            sender: UserProfile {
                id: 5,
                username: "bea".into(),
                avatar: None,
            },
        }];

        let store = FriendStore::new(api);
        store.refresh_pending().await.unwrap();
        assert_eq!(store.pending().await.len(), 1);

        let friend = store.accept(5).await.unwrap();
        assert_eq!(friend.id, 5);
        assert!(store.pending().await.is_empty());
        assert!(store.contains(5).await);

        // Accepting the same friend twice does not duplicate the roster.
        let _ = store.accept(5).await.unwrap();
        assert_eq!(store.friends().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_local_reports_membership() {
        let api = Arc::new(MockApi::new());
        *api.friends.lock().unwrap() = vec![MockApi::friend(2)];

        let store = FriendStore::new(api);
        store.refresh().await.unwrap();

        assert!(store.remove_local(2).await);
        assert!(!store.remove_local(2).await);
        assert!(!store.contains(2).await);
    }
}
