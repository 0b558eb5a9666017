use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use instalk_cache::SessionCache;
use instalk_core::{Api, ChatKind, ConversationKey, Draft, Message, MessageType, PushEvent};
use instalk_push::{Connector, PushClient, PushUpdate};

use crate::conversations::ConversationStore;
use crate::error::Result;
use crate::events::SessionEvent;
use crate::friends::FriendStore;
use crate::groups::GroupStore;
use crate::messages::{Ingest, MessageStore};
use crate::presence::PresenceStore;
use crate::profiles::ProfileCache;

/// One logged-in session. Owns the stores, the durable cache, and the push
/// channel, and keeps them consistent: every mutation path funnels through
/// here so the cache and the conversation summaries never drift from the
/// message set.
pub struct ChatSession<A: Api> {
    self_id: i64,
    cache: Arc<SessionCache>,
    pub messages: Arc<MessageStore<A>>,
    pub conversations: Arc<ConversationStore<A>>,
    pub presence: Arc<PresenceStore>,
    pub friends: Arc<FriendStore<A>>,
    pub groups: Arc<GroupStore<A>>,
    pub profiles: Arc<ProfileCache>,
    api: Arc<A>,
    current_chat: RwLock<Option<ConversationKey>>,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: std::sync::Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    push: Mutex<Option<PushClient>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl<A: Api> ChatSession<A> {
    pub fn new(api: Arc<A>, cache: Arc<SessionCache>, self_id: i64) -> Self {
        let messages = Arc::new(MessageStore::new(api.clone(), self_id));
        let friends = Arc::new(FriendStore::new(api.clone()));
        let groups = Arc::new(GroupStore::new(api.clone()));
        let conversations = Arc::new(ConversationStore::new(
            api.clone(),
            self_id,
            messages.clone(),
            friends.clone(),
            groups.clone(),
        ));
        let (event_tx, event_rx) = mpsc::channel(1000);

        Self {
            self_id,
            cache,
            messages,
            conversations,
            presence: Arc::new(PresenceStore::new(self_id)),
            friends,
            groups,
            profiles: Arc::new(ProfileCache::new()),
            api,
            current_chat: RwLock::new(None),
            event_tx,
            event_rx: std::sync::Mutex::new(Some(event_rx)),
            push: Mutex::new(None),
            dispatch: Mutex::new(None),
        }
    }

    pub fn self_id(&self) -> i64 {
        self.self_id
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// The session event stream, available exactly once.
    pub fn take_event_receiver(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.lock().ok()?.take()
    }

    async fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Session event receiver dropped");
        }
    }

    /// Seed the stores from the durable cache. Safe to call before any
    /// network round-trip; presence is deliberately not restored.
    pub async fn restore(&self) -> Result<()> {
        self.messages.restore(self.cache.load_messages().await?).await;
        self.conversations
            .restore(self.cache.load_conversations().await?)
            .await;
        self.profiles.restore(self.cache.load_profiles().await?).await;
        *self.current_chat.write().await = self.cache.load_current_chat().await?;
        Ok(())
    }

    /// Bring the session fully online: refresh rosters, load history if the
    /// restore left the message set empty, rebuild summaries, and take a
    /// fresh presence snapshot.
    pub async fn start(&self) -> Result<()> {
        self.friends.refresh().await?;
        self.friends.refresh_pending().await?;
        self.groups.refresh_mine().await?;
        self.groups.refresh_all().await?;

        for friend in self.friends.friends().await {
            self.profiles.record_friend(&friend).await;
        }
        for group in self.groups.mine().await {
            self.profiles.absorb_group(&group).await;
        }

        let fetched = self.messages.load_history(false).await?;
        self.conversations.resync(fetched).await;
        let pruned = self.conversations.prune_invalid().await;
        if pruned > 0 {
            info!(pruned, "Dropped conversations with stale targets");
        }

        self.presence
            .init(self.api.fetch_online_snapshot().await?)
            .await;

        self.persist_all().await?;
        let count = self.messages.len().await;
        self.emit(SessionEvent::HistoryLoaded { count }).await;
        info!(count, "Session started");
        Ok(())
    }

    /// Attach a push channel. Updates are dispatched on a background task
    /// until the channel gives up or [`ChatSession::shutdown`] runs.
    pub async fn connect_push<C: Connector>(self: &Arc<Self>, connector: C, token: &str) {
        let mut client = PushClient::connect(connector, token);
        let Some(mut rx) = client.take_event_receiver() else {
            return;
        };
        *self.push.lock().await = Some(client);

        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                handle_push_update(&session, update).await;
            }
            debug!("Push update stream ended");
        });
        *self.dispatch.lock().await = Some(task);
    }

    /// Detach the push channel and wait for its dispatch task to drain.
    /// Updates still buffered in the channel are applied here, before the
    /// caller touches the stores.
    async fn teardown_push(&self) {
        if let Some(mut client) = self.push.lock().await.take() {
            client.disconnect().await;
        }
        if let Some(task) = self.dispatch.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Push dispatch task failed");
            }
        }
    }

    /// Send a draft, fold the server's echo into the stores, persist.
    pub async fn send(&self, draft: &Draft) -> Result<Message> {
        let (message, fresh) = self.messages.send(draft).await?;
        if let Some(key) = message.conversation_key(self.self_id) {
            self.conversations.upsert(key, Some(&message), fresh).await;
            self.persist_conversation(key).await;
        }
        self.cache.save_message(&message).await?;
        Ok(message)
    }

    /// Retract one of our messages server-side and repair the summary it may
    /// have been the face of.
    pub async fn retract(&self, message_id: i64) -> Result<()> {
        let removed = self.messages.retract(message_id).await?;
        if let Some(message) = removed {
            if let Some(key) = message.conversation_key(self.self_id) {
                self.conversations.handle_retraction(key, &message).await;
                self.persist_conversation(key).await;
            }
            self.cache.delete_message(message_id).await?;
        }
        Ok(())
    }

    /// Re-send the content of a stored message to another conversation.
    /// Returns `None` when `message_id` is not in the local message set.
    pub async fn forward(&self, message_id: i64, to: ConversationKey) -> Result<Option<Message>> {
        let Some(source) = self.messages.get(message_id).await else {
            return Ok(None);
        };
        let draft = match to.kind {
            ChatKind::Friend => Draft::to_friend(to.id, source.content, source.message_type),
            ChatKind::Group => Draft::to_group(to.id, source.content, source.message_type),
        };
        Ok(Some(self.send(&draft).await?))
    }

    /// Mark everything unread in `key` as read. Returns the flipped ids.
    pub async fn mark_read(&self, key: ConversationKey) -> Result<Vec<i64>> {
        let flipped = self.conversations.mark_read(key).await?;
        if !flipped.is_empty() {
            self.cache.mark_messages_read(&flipped).await?;
        }
        self.persist_conversation(key).await;
        Ok(flipped)
    }

    pub async fn toggle_pin(&self, key: ConversationKey) -> Result<Option<bool>> {
        let pinned = self.conversations.toggle_pin(key).await;
        if pinned.is_some() {
            self.persist_conversation(key).await;
        }
        Ok(pinned)
    }

    /// Select a conversation: persists the selection, clears its badge, and
    /// returns its messages in display order.
    pub async fn open_conversation(&self, key: ConversationKey) -> Result<Vec<Message>> {
        *self.current_chat.write().await = Some(key);
        self.cache.save_current_chat(Some(key)).await?;
        self.mark_read(key).await?;
        Ok(self.messages.conversation_messages(key).await)
    }

    pub async fn current_chat(&self) -> Option<ConversationKey> {
        *self.current_chat.read().await
    }

    pub async fn close_conversation(&self) -> Result<()> {
        *self.current_chat.write().await = None;
        self.cache.save_current_chat(None).await?;
        Ok(())
    }

    /// Polling fallback for sessions without a push channel. Transport
    /// errors are logged and swallowed so a tick never kills the caller's
    /// loop. Returns how many messages were folded in.
    pub async fn poll_new(&self) -> usize {
        let accepted = match self.messages.fetch_new().await {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!(error = %e, "Poll tick failed");
                return 0;
            }
        };
        for message in &accepted {
            self.absorb_new_message(message.clone()).await;
        }
        accepted.len()
    }

    /// Fold one freshly accepted message into summaries, cache, and the
    /// event stream.
    async fn absorb_new_message(&self, message: Message) {
        let Some(key) = message.conversation_key(self.self_id) else {
            warn!(id = message.id, "Dropping message with invalid addressing");
            self.messages.delete_local(message.id).await;
            return;
        };
        self.conversations.upsert(key, Some(&message), true).await;
        if let Err(e) = self.cache.save_message(&message).await {
            warn!(error = %e, id = message.id, "Failed to cache message");
        }
        self.persist_conversation(key).await;
        self.emit(SessionEvent::MessageReceived { message }).await;
    }

    pub async fn remove_friend(&self, friend_id: i64) -> Result<()> {
        self.friends.remove(friend_id).await?;
        self.drop_conversation(ConversationKey::friend(friend_id))
            .await?;
        Ok(())
    }

    pub async fn leave_group(&self, group_id: i64) -> Result<()> {
        self.groups.leave(group_id).await?;
        self.drop_conversation(ConversationKey::group(group_id))
            .await?;
        Ok(())
    }

    /// Remove a conversation and everything hanging off it: its messages,
    /// its cache rows, and the active selection if it pointed here.
    pub async fn drop_conversation(&self, key: ConversationKey) -> Result<()> {
        self.conversations.remove(key).await;
        self.messages.drop_conversation(key).await;
        self.cache.delete_conversation(key).await?;
        self.cache
            .replace_messages(&self.messages.snapshot().await)
            .await?;

        let mut current = self.current_chat.write().await;
        if *current == Some(key) {
            *current = None;
            drop(current);
            self.cache.save_current_chat(None).await?;
        }
        Ok(())
    }

    /// Force a rebuild of the summaries from the message set.
    pub async fn resync(&self) -> Result<()> {
        self.conversations.resync(true).await;
        self.conversations.prune_invalid().await;
        self.persist_all().await
    }

    async fn persist_conversation(&self, key: ConversationKey) {
        match self.conversations.get(key).await {
            Some(conversation) => {
                if let Err(e) = self.cache.save_conversation(&conversation).await {
                    warn!(error = %e, id = key.id, "Failed to cache conversation");
                }
            }
            None => {
                if let Err(e) = self.cache.delete_conversation(key).await {
                    warn!(error = %e, id = key.id, "Failed to drop cached conversation");
                }
            }
        }
    }

    async fn persist_all(&self) -> Result<()> {
        self.cache
            .replace_messages(&self.messages.snapshot().await)
            .await?;
        self.cache
            .replace_conversations(&self.conversations.snapshot().await)
            .await?;
        for profile in self.profiles.snapshot().await {
            self.cache.save_profile(&profile).await?;
        }
        Ok(())
    }

    /// Orderly teardown. The push channel goes down first so no event can
    /// race the store clears; the cache keeps its contents for the next
    /// session.
    pub async fn shutdown(&self) -> Result<()> {
        self.teardown_push().await;
        self.persist_all().await?;

        self.messages.clear().await;
        self.conversations.clear().await;
        self.presence.clear().await;
        self.friends.clear().await;
        self.groups.clear().await;
        info!("Session shut down");
        Ok(())
    }

    /// Shutdown plus cache wipe; nothing of this user survives locally.
    pub async fn logout(&self) -> Result<()> {
        self.teardown_push().await;
        self.messages.clear().await;
        self.conversations.clear().await;
        self.presence.clear().await;
        self.friends.clear().await;
        self.groups.clear().await;
        *self.current_chat.write().await = None;

        self.cache.clear_all().await?;
        info!("Logged out, local cache cleared");
        Ok(())
    }
}

/// Dispatch one push update into the session.
async fn handle_push_update<A: Api>(session: &Arc<ChatSession<A>>, update: PushUpdate) {
    match update {
        PushUpdate::Open => session.emit(SessionEvent::PushConnected).await,
        PushUpdate::Closed { reason } => {
            session
                .emit(SessionEvent::PushDisconnected { reason })
                .await
        }
        PushUpdate::Event(event) => handle_push_event(session, event).await,
    }
}

async fn handle_push_event<A: Api>(session: &Arc<ChatSession<A>>, event: PushEvent) {
    match event {
        PushEvent::NewMessage(message) => {
            // Poll or send echo may have gotten here first.
            if session.messages.ingest(message.clone()).await == Ingest::Accepted {
                session.absorb_new_message(message).await;
            }
        }
        PushEvent::MessageRetracted { message_id } => {
            if let Some(message) = session.messages.delete_local(message_id).await {
                if let Some(key) = message.conversation_key(session.self_id) {
                    session.conversations.handle_retraction(key, &message).await;
                    session.persist_conversation(key).await;
                }
                if let Err(e) = session.cache.delete_message(message_id).await {
                    warn!(error = %e, message_id, "Failed to drop cached message");
                }
                session
                    .emit(SessionEvent::MessageRetracted { message_id })
                    .await;
            }
        }
        PushEvent::UserOnlineStatus { user_id, online } => {
            if session.presence.apply(user_id, online).await {
                session
                    .emit(SessionEvent::PresenceChanged { user_id, online })
                    .await;
            }
        }
        PushEvent::FriendRemoved { friend_id } => {
            session.friends.remove_local(friend_id).await;
            if let Err(e) = session
                .drop_conversation(ConversationKey::friend(friend_id))
                .await
            {
                warn!(error = %e, friend_id, "Failed to drop conversation");
            }
            session.emit(SessionEvent::FriendRemoved { friend_id }).await;
        }
        PushEvent::GroupDissolved { group_id } => {
            session.groups.remove_local(group_id).await;
            if let Err(e) = session
                .drop_conversation(ConversationKey::group(group_id))
                .await
            {
                warn!(error = %e, group_id, "Failed to drop conversation");
            }
            session.emit(SessionEvent::GroupDissolved { group_id }).await;
        }
    }
}

impl<A: Api> ChatSession<A> {
    /// Convenience for building a text draft addressed at `key`.
    pub fn draft_for(key: ConversationKey, content: impl Into<String>) -> Draft {
        match key.kind {
            ChatKind::Friend => Draft::to_friend(key.id, content, MessageType::Text),
            ChatKind::Group => Draft::to_group(key.id, content, MessageType::Text),
        }
    }
}
