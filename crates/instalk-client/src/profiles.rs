use std::collections::HashMap;

use tokio::sync::RwLock;

use instalk_core::{Friend, Group, UserProfile};

/// Display names and avatars, retained past roster membership so old
/// messages keep a sender name after a friend is removed or leaves a group.
pub struct ProfileCache {
    state: RwLock<HashMap<i64, UserProfile>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    pub async fn restore(&self, profiles: Vec<UserProfile>) {
        let mut state = self.state.write().await;
        for profile in profiles {
            state.insert(profile.id, profile);
        }
    }

    pub async fn record(&self, profile: UserProfile) {
        self.state.write().await.insert(profile.id, profile);
    }

    pub async fn record_friend(&self, friend: &Friend) {
        self.record(UserProfile {
            id: friend.id,
            username: friend.username.clone(),
            avatar: friend.avatar.clone(),
        })
        .await;
    }

    /// Groups only carry member ids; record placeholders so unknown members
    /// still render something until a real profile arrives.
    pub async fn absorb_group(&self, group: &Group) {
        let mut state = self.state.write().await;
        for &member_id in &group.member_ids {
            state.entry(member_id).or_insert_with(|| UserProfile {
                id: member_id,
                username: format!("user {member_id}"),
                avatar: None,
            });
        }
    }

    pub async fn get(&self, user_id: i64) -> Option<UserProfile> {
        self.state.read().await.get(&user_id).cloned()
    }

    pub async fn display_name(&self, user_id: i64) -> String {
        match self.state.read().await.get(&user_id) {
            Some(profile) => profile.username.clone(),
            None => format!("user {user_id}"),
        }
    }

    pub async fn snapshot(&self) -> Vec<UserProfile> {
        self.state.read().await.values().cloned().collect()
    }
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new()
    }
}
