use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use instalk_core::{Api, ChatKind, Conversation, ConversationKey, Message};

use crate::error::Result;
use crate::friends::FriendStore;
use crate::groups::GroupStore;
use crate::messages::MessageStore;

/// Conversation summaries derived from the message set. Entries exist only
/// for valid targets: a friend on the roster or a group the user belongs to.
pub struct ConversationStore<A: Api> {
    api: Arc<A>,
    self_id: i64,
    messages: Arc<MessageStore<A>>,
    friends: Arc<FriendStore<A>>,
    groups: Arc<GroupStore<A>>,
    state: RwLock<HashMap<ConversationKey, Conversation>>,
}

impl<A: Api> ConversationStore<A> {
    pub fn new(
        api: Arc<A>,
        self_id: i64,
        messages: Arc<MessageStore<A>>,
        friends: Arc<FriendStore<A>>,
        groups: Arc<GroupStore<A>>,
    ) -> Self {
        Self {
            api,
            self_id,
            messages,
            friends,
            groups,
            state: RwLock::new(HashMap::new()),
        }
    }

    async fn target_exists(&self, key: ConversationKey) -> bool {
        match key.kind {
            ChatKind::Friend => self.friends.contains(key.id).await,
            ChatKind::Group => self.groups.contains(key.id).await,
        }
    }

    /// Seed from the local cache at startup. Skips the existence guard; the
    /// next resync or prune reconciles against the fresh rosters.
    pub async fn restore(&self, conversations: Vec<Conversation>) {
        let mut state = self.state.write().await;
        state.clear();
        for conversation in conversations {
            state.insert(conversation.key(), conversation);
        }
        info!(count = state.len(), "Restored conversations from cache");
    }

    /// Create or update the summary for `key` after a message event.
    ///
    /// `message` is the triggering message, if any; `freshly_ingested` says
    /// whether the message store accepted it just now (duplicates must not
    /// bump the unread count). Returns false when the target fails the
    /// existence guard and the summary was not touched.
    pub async fn upsert(
        &self,
        key: ConversationKey,
        message: Option<&Message>,
        freshly_ingested: bool,
    ) -> bool {
        if !self.target_exists(key).await {
            debug!(id = key.id, kind = key.kind.as_str(), "Ignoring message for unknown target");
            return false;
        }

        let now = Utc::now();
        let mut state = self.state.write().await;
        let conversation = state.entry(key).or_insert_with(|| {
            debug!(id = key.id, kind = key.kind.as_str(), "Creating conversation");
            Conversation::new(key, now)
        });

        if let Some(message) = message {
            // Strictly newer wins; on a timestamp tie the incumbent stays.
            let supersedes = conversation
                .last_message_time
                .is_none_or(|current| message.sent_at > current);
            if supersedes {
                conversation.last_message_id = Some(message.id);
                conversation.last_message_time = Some(message.sent_at);
            }
            if freshly_ingested && message.is_unread_for(self.self_id) {
                conversation.unread_count += 1;
            }
        }
        conversation.updated_at = now;
        true
    }

    /// Mark every unread message of `key` read, optimistically zeroing the
    /// badge first. On transport failure the previous count is added back
    /// rather than restored wholesale, so unread increments that landed
    /// during the round-trip survive. Returns the ids that were flipped.
    pub async fn mark_read(&self, key: ConversationKey) -> Result<Vec<i64>> {
        let unread_ids = self.messages.unread_for(key).await;

        let previous = {
            let mut state = self.state.write().await;
            match state.get_mut(&key) {
                Some(conversation) => {
                    let previous = conversation.unread_count;
                    conversation.unread_count = 0;
                    previous
                }
                None => return Ok(Vec::new()),
            }
        };

        if unread_ids.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = match unread_ids.as_slice() {
            [only] => self.api.mark_read(*only).await,
            many => self.api.mark_read_batch(many).await,
        };

        match outcome {
            Ok(()) => {
                self.messages.mark_read_local(&unread_ids).await;
                Ok(unread_ids)
            }
            Err(e) => {
                warn!(error = %e, id = key.id, "Mark-read failed, restoring unread count");
                let mut state = self.state.write().await;
                if let Some(conversation) = state.get_mut(&key) {
                    conversation.unread_count += previous;
                }
                Err(e.into())
            }
        }
    }

    /// Recompute `key`'s last message and unread count from the message set.
    /// Used after a retraction removed what the summary pointed at.
    pub async fn refresh_from_messages(&self, key: ConversationKey) {
        let last = self.messages.last_of(key).await;
        let unread = self.messages.unread_for(key).await.len() as u32;

        let mut state = self.state.write().await;
        if let Some(conversation) = state.get_mut(&key) {
            conversation.last_message_id = last.as_ref().map(|m| m.id);
            conversation.last_message_time = last.map(|m| m.sent_at);
            conversation.unread_count = unread;
            conversation.updated_at = Utc::now();
        }
    }

    /// Repair the summary after `removed` left the message set. The full
    /// rescan only runs when the summary actually pointed at the removed
    /// message; otherwise its unread contribution (if any) is dropped and
    /// the rest stays untouched.
    pub async fn handle_retraction(&self, key: ConversationKey, removed: &Message) {
        let was_last = self
            .state
            .read()
            .await
            .get(&key)
            .is_some_and(|c| c.last_message_id == Some(removed.id));

        if was_last {
            self.refresh_from_messages(key).await;
        } else if removed.is_unread_for(self.self_id) {
            let mut state = self.state.write().await;
            if let Some(conversation) = state.get_mut(&key) {
                conversation.unread_count = conversation.unread_count.saturating_sub(1);
                conversation.updated_at = Utc::now();
            }
        }
    }

    /// Rebuild every summary from the message set. Skipped when summaries
    /// already exist unless `force` is set; a rebuild preserves pin state and
    /// creation time of surviving entries and recounts unread from scratch.
    pub async fn resync(&self, force: bool) -> bool {
        if !force && !self.state.read().await.is_empty() {
            debug!("Conversations already populated, skipping resync");
            return false;
        }

        let mut messages = self.messages.snapshot().await;
        messages.sort_by_key(Message::sort_key);

        let mut rebuilt: HashMap<ConversationKey, Conversation> = HashMap::new();
        let now = Utc::now();

        for message in &messages {
            let Some(key) = message.conversation_key(self.self_id) else {
                warn!(id = message.id, "Skipping message with invalid addressing");
                continue;
            };
            if !self.target_exists(key).await {
                continue;
            }
            let conversation = rebuilt
                .entry(key)
                .or_insert_with(|| Conversation::new(key, now));
            // Ascending scan: each message is at least as new as the current
            // last, and on ties the earlier id keeps the slot.
            if conversation
                .last_message_time
                .is_none_or(|current| message.sent_at > current)
            {
                conversation.last_message_id = Some(message.id);
                conversation.last_message_time = Some(message.sent_at);
            }
            if message.is_unread_for(self.self_id) {
                conversation.unread_count += 1;
            }
        }

        let mut state = self.state.write().await;
        for (key, conversation) in rebuilt.iter_mut() {
            if let Some(existing) = state.get(key) {
                conversation.is_pinned = existing.is_pinned;
                conversation.created_at = existing.created_at;
            }
        }
        let count = rebuilt.len();
        *state = rebuilt;
        info!(count, "Rebuilt conversations from message set");
        true
    }

    pub async fn remove(&self, key: ConversationKey) -> Option<Conversation> {
        self.state.write().await.remove(&key)
    }

    /// Flip the pin flag. Returns the new state, or `None` for an unknown
    /// conversation.
    pub async fn toggle_pin(&self, key: ConversationKey) -> Option<bool> {
        let mut state = self.state.write().await;
        let conversation = state.get_mut(&key)?;
        conversation.is_pinned = !conversation.is_pinned;
        conversation.updated_at = Utc::now();
        Some(conversation.is_pinned)
    }

    /// Display order: pinned first, then most recent activity, with the key
    /// as a deterministic tie-break.
    pub async fn ordered(&self) -> Vec<Conversation> {
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> = state.values().cloned().collect();
        conversations.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then_with(|| {
                    let at = a.last_message_time.unwrap_or(a.updated_at);
                    let bt = b.last_message_time.unwrap_or(b.updated_at);
                    bt.cmp(&at)
                })
                .then_with(|| (a.kind.as_str(), a.id).cmp(&(b.kind.as_str(), b.id)))
        });
        conversations
    }

    pub async fn total_unread(&self) -> u32 {
        self.state
            .read()
            .await
            .values()
            .map(|c| c.unread_count)
            .sum()
    }

    /// Drop summaries whose target fell off the rosters. Returns how many
    /// were removed.
    pub async fn prune_invalid(&self) -> usize {
        let keys: Vec<ConversationKey> = self.state.read().await.keys().copied().collect();
        let mut doomed = Vec::new();
        for key in keys {
            if !self.target_exists(key).await {
                doomed.push(key);
            }
        }
        let mut state = self.state.write().await;
        for key in &doomed {
            state.remove(key);
            debug!(id = key.id, kind = key.kind.as_str(), "Pruned stale conversation");
        }
        doomed.len()
    }

    pub async fn get(&self, key: ConversationKey) -> Option<Conversation> {
        self.state.read().await.get(&key).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Conversation> {
        self.state.read().await.values().cloned().collect()
    }

    pub async fn clear(&self) {
        self.state.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockApi;

    struct Fixture {
        api: Arc<MockApi>,
        messages: Arc<MessageStore<MockApi>>,
        friends: Arc<FriendStore<MockApi>>,
        conversations: ConversationStore<MockApi>,
    }

    async fn fixture() -> Fixture {
        let api = Arc::new(MockApi::new());
        *api.friends.lock().unwrap() = vec![MockApi::friend(2), MockApi::friend(3)];
        *api.my_groups.lock().unwrap() = vec![MockApi::group(9)];

        let messages = Arc::new(MessageStore::new(api.clone(), 1));
        let friends = Arc::new(FriendStore::new(api.clone()));
        let groups = Arc::new(GroupStore::new(api.clone()));
        friends.refresh().await.unwrap();
        groups.refresh_mine().await.unwrap();

        let conversations =
            ConversationStore::new(api.clone(), 1, messages.clone(), friends.clone(), groups);
        Fixture {
            api,
            messages,
            friends,
            conversations,
        }
    }

    #[tokio::test]
    async fn existence_guard_rejects_unknown_targets() {
        let fx = fixture().await;

        let stranger = MockApi::message(1, 7, Some(1), None);
        assert!(!fx.conversations.upsert(ConversationKey::friend(7), Some(&stranger), true).await);
        assert!(fx.conversations.get(ConversationKey::friend(7)).await.is_none());

        let other_group = MockApi::message(2, 2, None, Some(42));
        assert!(!fx.conversations.upsert(ConversationKey::group(42), Some(&other_group), true).await);
    }

    #[tokio::test]
    async fn duplicate_delivery_does_not_double_count() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);
        let m = MockApi::message(1, 2, Some(1), None);

        fx.messages.ingest(m.clone()).await;
        assert!(fx.conversations.upsert(key, Some(&m), true).await);
        // Push and poll both delivered; the second pass is not fresh.
        assert!(fx.conversations.upsert(key, Some(&m), false).await);

        let conversation = fx.conversations.get(key).await.unwrap();
        assert_eq!(conversation.unread_count, 1);
    }

    #[tokio::test]
    async fn own_messages_do_not_count_unread() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);
        let mine = MockApi::message(1, 1, Some(2), None);

        fx.conversations.upsert(key, Some(&mine), true).await;
        let conversation = fx.conversations.get(key).await.unwrap();
        assert_eq!(conversation.unread_count, 0);
        assert_eq!(conversation.last_message_id, Some(1));
    }

    #[tokio::test]
    async fn timestamp_tie_keeps_incumbent_last_message() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);

        let first = MockApi::message(1, 2, Some(1), None);
        let mut tied = MockApi::message(2, 2, Some(1), None);
        tied.sent_at = first.sent_at;

        fx.conversations.upsert(key, Some(&first), true).await;
        fx.conversations.upsert(key, Some(&tied), true).await;

        let conversation = fx.conversations.get(key).await.unwrap();
        assert_eq!(conversation.last_message_id, Some(1));
        // Both still counted as unread.
        assert_eq!(conversation.unread_count, 2);
    }

    #[tokio::test]
    async fn two_interleaved_messages_one_conversation() {
        let fx = fixture().await;

        // Peer sent message 1, we replied with message 2.
        let theirs = MockApi::message(1, 2, Some(1), None);
        let ours = MockApi::message(2, 1, Some(2), None);

        for m in [&theirs, &ours] {
            fx.messages.ingest(m.clone()).await;
            let key = m.conversation_key(1).unwrap();
            fx.conversations.upsert(key, Some(m), true).await;
        }

        let all = fx.conversations.snapshot().await;
        assert_eq!(all.len(), 1);
        let conversation = &all[0];
        assert_eq!(conversation.key(), ConversationKey::friend(2));
        assert_eq!(conversation.last_message_id, Some(2));
        assert_eq!(conversation.unread_count, 1);
    }

    #[tokio::test]
    async fn mark_read_flips_messages_and_zeroes_badge() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);

        for id in [1, 2] {
            let m = MockApi::message(id, 2, Some(1), None);
            fx.messages.ingest(m.clone()).await;
            fx.conversations.upsert(key, Some(&m), true).await;
        }

        let flipped = fx.conversations.mark_read(key).await.unwrap();
        assert_eq!(flipped.len(), 2);
        assert_eq!(fx.conversations.get(key).await.unwrap().unread_count, 0);
        assert!(fx.messages.unread_for(key).await.is_empty());
        // Two unread ids go through the batch endpoint.
        assert_eq!(fx.api.batch_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_read_failure_adds_previous_count_back() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);

        let m = MockApi::message(1, 2, Some(1), None);
        fx.messages.ingest(m.clone()).await;
        fx.conversations.upsert(key, Some(&m), true).await;

        *fx.api.fail_mark_read.lock().unwrap() = true;
        assert!(fx.conversations.mark_read(key).await.is_err());

        // Badge restored, message still unread.
        assert_eq!(fx.conversations.get(key).await.unwrap().unread_count, 1);
        assert_eq!(fx.messages.unread_for(key).await, vec![1]);
    }

    #[tokio::test]
    async fn resync_rebuilds_unread_and_preserves_pins() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);

        // Stale summary: wrong unread count, but pinned by the user.
        let m1 = MockApi::message(1, 2, Some(1), None);
        fx.messages.ingest(m1.clone()).await;
        fx.conversations.upsert(key, Some(&m1), true).await;
        fx.conversations.upsert(key, Some(&m1), true).await; // double count
        fx.conversations.toggle_pin(key).await.unwrap();
        assert_eq!(fx.conversations.get(key).await.unwrap().unread_count, 2);

        // Non-forced resync is a no-op while summaries exist.
        assert!(!fx.conversations.resync(false).await);

        assert!(fx.conversations.resync(true).await);
        let conversation = fx.conversations.get(key).await.unwrap();
        assert_eq!(conversation.unread_count, 1);
        assert!(conversation.is_pinned);
    }

    #[tokio::test]
    async fn resync_skips_invalid_targets() {
        let fx = fixture().await;

        fx.messages.ingest(MockApi::message(1, 2, Some(1), None)).await;
        fx.messages.ingest(MockApi::message(2, 7, Some(1), None)).await; // not a friend
        fx.messages.ingest(MockApi::message(3, 2, None, Some(42))).await; // not my group

        fx.conversations.resync(true).await;
        let all = fx.conversations.snapshot().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key(), ConversationKey::friend(2));
    }

    #[tokio::test]
    async fn ordering_is_pinned_then_recency() {
        let fx = fixture().await;

        let older = MockApi::message(1, 2, Some(1), None);
        let newer = MockApi::message(2, 3, Some(1), None);
        fx.conversations
            .upsert(ConversationKey::friend(2), Some(&older), true)
            .await;
        fx.conversations
            .upsert(ConversationKey::friend(3), Some(&newer), true)
            .await;

        let ids: Vec<i64> = fx.conversations.ordered().await.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 2]);

        // Pinning the stale one hoists it.
        fx.conversations.toggle_pin(ConversationKey::friend(2)).await;
        let ids: Vec<i64> = fx.conversations.ordered().await.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn refresh_repairs_last_message_after_retraction() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);

        let m1 = MockApi::message(1, 2, Some(1), None);
        let m2 = MockApi::message(2, 2, Some(1), None);
        for m in [&m1, &m2] {
            fx.messages.ingest(m.clone()).await;
            fx.conversations.upsert(key, Some(m), true).await;
        }

        fx.messages.delete_local(2).await;
        fx.conversations.refresh_from_messages(key).await;

        let conversation = fx.conversations.get(key).await.unwrap();
        assert_eq!(conversation.last_message_id, Some(1));
        assert_eq!(conversation.last_message_time, Some(m1.sent_at));
        assert_eq!(conversation.unread_count, 1);
    }

    #[tokio::test]
    async fn older_message_does_not_supersede_last() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);

        let newer = MockApi::message(5, 2, Some(1), None);
        let older = MockApi::message(3, 2, Some(1), None);

        fx.conversations.upsert(key, Some(&newer), true).await;
        fx.conversations.upsert(key, Some(&older), true).await;

        let conversation = fx.conversations.get(key).await.unwrap();
        // The late-arriving older message still counts unread but the
        // summary keeps pointing at the newest one.
        assert_eq!(conversation.last_message_id, Some(5));
        assert_eq!(conversation.last_message_time, Some(newer.sent_at));
        assert_eq!(conversation.unread_count, 2);
    }

    #[tokio::test]
    async fn arrival_order_does_not_change_summaries() {
        let batch = vec![
            MockApi::message(1, 2, Some(1), None),
            MockApi::message(2, 1, Some(2), None),
            MockApi::message(3, 2, None, Some(9)),
            MockApi::message(4, 3, Some(1), None),
            MockApi::message(5, 3, None, Some(9)),
        ];
        let mut reversed = batch.clone();
        reversed.reverse();

        let mut outcomes = Vec::new();
        for delivery in [batch, reversed] {
            let fx = fixture().await;
            for m in &delivery {
                fx.messages.ingest(m.clone()).await;
                let key = m.conversation_key(1).unwrap();
                fx.conversations.upsert(key, Some(m), true).await;
            }
            let summary: Vec<(ConversationKey, Option<i64>, u32)> = fx
                .conversations
                .ordered()
                .await
                .iter()
                .map(|c| (c.key(), c.last_message_id, c.unread_count))
                .collect();
            outcomes.push(summary);
        }

        assert_eq!(outcomes[0], outcomes[1]);
        assert_eq!(outcomes[0].len(), 3);
    }

    #[tokio::test]
    async fn retracting_a_non_last_unread_message_only_drops_its_count() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);

        let m1 = MockApi::message(1, 2, Some(1), None);
        let m2 = MockApi::message(2, 2, Some(1), None);
        for m in [&m1, &m2] {
            fx.messages.ingest(m.clone()).await;
            fx.conversations.upsert(key, Some(m), true).await;
        }

        fx.messages.delete_local(1).await;
        fx.conversations.handle_retraction(key, &m1).await;

        let conversation = fx.conversations.get(key).await.unwrap();
        assert_eq!(conversation.last_message_id, Some(2));
        assert_eq!(conversation.unread_count, 1);
    }

    #[tokio::test]
    async fn retracting_the_last_message_rescans() {
        let fx = fixture().await;
        let key = ConversationKey::friend(2);

        let m1 = MockApi::message(1, 2, Some(1), None);
        let m2 = MockApi::message(2, 2, Some(1), None);
        for m in [&m1, &m2] {
            fx.messages.ingest(m.clone()).await;
            fx.conversations.upsert(key, Some(m), true).await;
        }

        fx.messages.delete_local(2).await;
        fx.conversations.handle_retraction(key, &m2).await;

        let conversation = fx.conversations.get(key).await.unwrap();
        assert_eq!(conversation.last_message_id, Some(1));
        assert_eq!(conversation.last_message_time, Some(m1.sent_at));
        assert_eq!(conversation.unread_count, 1);
    }

    #[tokio::test]
    async fn prune_drops_conversations_for_removed_targets() {
        let fx = fixture().await;

        let m = MockApi::message(1, 2, Some(1), None);
        fx.conversations
            .upsert(ConversationKey::friend(2), Some(&m), true)
            .await;

        fx.friends.remove_local(2).await;
        assert_eq!(fx.conversations.prune_invalid().await, 1);
        assert!(fx.conversations.get(ConversationKey::friend(2)).await.is_none());
    }
}
