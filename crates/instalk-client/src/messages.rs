use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use instalk_core::{Api, ChatKind, ConversationKey, Draft, Message};

use crate::error::Result;

/// Outcome of offering a message to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// First sighting; the message was added.
    Accepted,
    /// Already known by id; the stored copy is untouched.
    Duplicate,
}

/// The authoritative message set, keyed by server-assigned id. Every entry
/// path funnels through [`MessageStore::ingest`] so duplicates collapse no
/// matter whether a message arrived by push, poll, send echo, or history.
pub struct MessageStore<A: Api> {
    api: Arc<A>,
    self_id: i64,
    state: RwLock<BTreeMap<i64, Message>>,
}

impl<A: Api> MessageStore<A> {
    pub fn new(api: Arc<A>, self_id: i64) -> Self {
        Self {
            api,
            self_id,
            state: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn self_id(&self) -> i64 {
        self.self_id
    }

    /// Seed from the local cache at startup. Does not touch the network.
    pub async fn restore(&self, messages: Vec<Message>) {
        let mut state = self.state.write().await;
        state.clear();
        for message in messages {
            state.insert(message.id, message);
        }
        info!(count = state.len(), "Restored message set from cache");
    }

    /// Replace the whole set from the server. Skipped when the store already
    /// holds messages unless `force` is set. Returns whether a fetch ran.
    pub async fn load_history(&self, force: bool) -> Result<bool> {
        if !force && !self.state.read().await.is_empty() {
            debug!("Message set already populated, skipping history fetch");
            return Ok(false);
        }
        let history = self.api.fetch_history().await?;
        let mut state = self.state.write().await;
        state.clear();
        for message in history {
            state.insert(message.id, message);
        }
        info!(count = state.len(), "Loaded message history");
        Ok(true)
    }

    /// Idempotent insert. A message with a known id is dropped even if its
    /// fields differ from the stored copy.
    pub async fn ingest(&self, message: Message) -> Ingest {
        let mut state = self.state.write().await;
        if state.contains_key(&message.id) {
            debug!(id = message.id, "Dropping duplicate message");
            return Ingest::Duplicate;
        }
        state.insert(message.id, message);
        Ingest::Accepted
    }

    /// Send a draft and ingest the server's echo. Returns the persisted
    /// message and whether it was newly ingested (false when the push channel
    /// delivered it first).
    pub async fn send(&self, draft: &Draft) -> Result<(Message, bool)> {
        let message = self.api.send_message(draft).await?;
        let accepted = self.ingest(message.clone()).await == Ingest::Accepted;
        Ok((message, accepted))
    }

    /// Retract a message server-side, then drop it locally. Returns the
    /// removed message, or `None` when it was not held locally.
    pub async fn retract(&self, message_id: i64) -> Result<Option<Message>> {
        self.api.retract_message(message_id).await?;
        Ok(self.delete_local(message_id).await)
    }

    /// Local-only removal, used for push-announced retractions.
    pub async fn delete_local(&self, message_id: i64) -> Option<Message> {
        self.state.write().await.remove(&message_id)
    }

    /// Polling fallback: fetch messages newer than the latest one held and
    /// ingest whatever the server returns that we have not seen. Returns the
    /// accepted messages in arrival order.
    pub async fn fetch_new(&self) -> Result<Vec<Message>> {
        let reference = {
            let state = self.state.read().await;
            state.values().max_by_key(|m| m.sort_key()).cloned()
        };
        let incoming = self.api.fetch_new_since(reference.as_ref()).await?;

        let mut accepted = Vec::new();
        for message in incoming {
            if self.ingest(message.clone()).await == Ingest::Accepted {
                accepted.push(message);
            }
        }
        if !accepted.is_empty() {
            debug!(count = accepted.len(), "Polled new messages");
        }
        Ok(accepted)
    }

    /// All messages of one conversation, ordered by (sent_at, id).
    pub async fn conversation_messages(&self, key: ConversationKey) -> Vec<Message> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .values()
            .filter(|m| m.conversation_key(self.self_id) == Some(key))
            .cloned()
            .collect();
        messages.sort_by_key(Message::sort_key);
        messages
    }

    /// Ids of messages in `key` that count toward the viewer's unread badge.
    pub async fn unread_for(&self, key: ConversationKey) -> Vec<i64> {
        let state = self.state.read().await;
        state
            .values()
            .filter(|m| {
                m.conversation_key(self.self_id) == Some(key) && m.is_unread_for(self.self_id)
            })
            .map(|m| m.id)
            .collect()
    }

    /// Flip the read flag on the stored copies. Ids not present are ignored.
    pub async fn mark_read_local(&self, ids: &[i64]) {
        let mut state = self.state.write().await;
        for id in ids {
            match state.get_mut(id) {
                Some(message) => message.is_read = true,
                None => warn!(id, "Cannot mark unknown message read"),
            }
        }
    }

    pub async fn get(&self, id: i64) -> Option<Message> {
        self.state.read().await.get(&id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.state.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.state.write().await.clear();
    }

    /// The latest message of a conversation by display order, if any.
    pub async fn last_of(&self, key: ConversationKey) -> Option<Message> {
        let state = self.state.read().await;
        state
            .values()
            .filter(|m| m.conversation_key(self.self_id) == Some(key))
            .max_by_key(|m| m.sort_key())
            .cloned()
    }

    /// Drop all messages belonging to `key`; used when a friend or group
    /// disappears. Returns how many were removed.
    pub async fn drop_conversation(&self, key: ConversationKey) -> usize {
        let mut state = self.state.write().await;
        let doomed: Vec<i64> = state
            .values()
            .filter(|m| m.conversation_key(self.self_id) == Some(key))
            .map(|m| m.id)
            .collect();
        for id in &doomed {
            state.remove(id);
        }
        if !doomed.is_empty() {
            let kind = match key.kind {
                ChatKind::Friend => "friend",
                ChatKind::Group => "group",
            };
            debug!(count = doomed.len(), kind, id = key.id, "Dropped conversation messages");
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockApi;
    use instalk_core::MessageType;

    fn store(api: Arc<MockApi>) -> MessageStore<MockApi> {
        MessageStore::new(api, 1)
    }

    #[tokio::test]
    async fn ingest_is_idempotent() {
        let api = Arc::new(MockApi::new());
        let store = store(api);

        let m = MockApi::message(1, 2, Some(1), None);
        assert_eq!(store.ingest(m.clone()).await, Ingest::Accepted);
        assert_eq!(store.ingest(m.clone()).await, Ingest::Duplicate);

        // A conflicting copy with the same id does not overwrite.
        let mut altered = m.clone();
        altered.content = "changed".into();
        assert_eq!(store.ingest(altered).await, Ingest::Duplicate);
        assert_eq!(store.get(1).await.unwrap().content, m.content);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn load_history_respects_existing_state() {
        let api = Arc::new(MockApi::new());
        *api.history.lock().unwrap() = vec![MockApi::message(1, 2, Some(1), None)];
        let store = store(api.clone());

        assert!(store.load_history(false).await.unwrap());
        assert_eq!(store.len().await, 1);

        // Populated store skips the fetch unless forced.
        *api.history.lock().unwrap() = vec![
            MockApi::message(1, 2, Some(1), None),
            MockApi::message(2, 2, Some(1), None),
        ];
        assert!(!store.load_history(false).await.unwrap());
        assert_eq!(store.len().await, 1);

        assert!(store.load_history(true).await.unwrap());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn conversation_messages_sorted_and_filtered() {
        let api = Arc::new(MockApi::new());
        let store = store(api);

        // Same timestamp on ids 3 and 2: id breaks the tie.
        let mut a = MockApi::message(3, 2, Some(1), None);
        let b = MockApi::message(2, 1, Some(2), None);
        a.sent_at = b.sent_at;
        let other = MockApi::message(4, 5, Some(1), None);

        store.ingest(a).await;
        store.ingest(b).await;
        store.ingest(other).await;

        let ids: Vec<i64> = store
            .conversation_messages(ConversationKey::friend(2))
            .await
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn unread_excludes_own_and_read_messages() {
        let api = Arc::new(MockApi::new());
        let store = store(api);

        let incoming = MockApi::message(1, 2, Some(1), None);
        let outgoing = MockApi::message(2, 1, Some(2), None);
        let mut read = MockApi::message(3, 2, Some(1), None);
        read.is_read = true;

        store.ingest(incoming).await;
        store.ingest(outgoing).await;
        store.ingest(read).await;

        assert_eq!(store.unread_for(ConversationKey::friend(2)).await, vec![1]);

        store.mark_read_local(&[1]).await;
        assert!(store.unread_for(ConversationKey::friend(2)).await.is_empty());
    }

    #[tokio::test]
    async fn fetch_new_skips_known_messages() {
        let api = Arc::new(MockApi::new());
        let known = MockApi::message(1, 2, Some(1), None);
        *api.new_since.lock().unwrap() =
            vec![known.clone(), MockApi::message(2, 2, Some(1), None)];

        let store = store(api);
        store.ingest(known).await;

        let accepted = store.fetch_new().await.unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].id, 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn send_reports_push_race() {
        let api = Arc::new(MockApi::new());
        let store = store(api);

        let draft = Draft::to_friend(2, "hello", MessageType::Text);
        let (message, fresh) = store.send(&draft).await.unwrap();
        assert!(fresh);

        // Push delivers the echo of the next send before the HTTP response
        // lands; the send must notice it lost the race.
        store
            .ingest(MockApi::message(message.id + 1, 1, Some(2), None))
            .await;
        let (again, fresh) = store.send(&draft).await.unwrap();
        assert_eq!(again.id, message.id + 1);
        assert!(!fresh);
    }

    #[tokio::test]
    async fn drop_conversation_removes_only_its_messages() {
        let api = Arc::new(MockApi::new());
        let store = store(api);

        store.ingest(MockApi::message(1, 2, Some(1), None)).await;
        store.ingest(MockApi::message(2, 3, None, Some(9))).await;

        assert_eq!(store.drop_conversation(ConversationKey::group(9)).await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get(1).await.is_some());
    }
}
