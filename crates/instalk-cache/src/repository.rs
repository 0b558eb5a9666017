use std::path::PathBuf;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqlitePool};

use instalk_core::{ChatKind, Conversation, ConversationKey, Message, MessageType, UserProfile};

use crate::error::{CacheError, Result};
use crate::schema::SCHEMA;

const KEY_CURRENT_CHAT_ID: &str = "current_chat_id";
const KEY_CHAT_KIND: &str = "chat_kind";

pub struct SessionCache {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct MessageRecord {
    id: i64,
    sender_id: i64,
    receiver_id: Option<i64>,
    group_id: Option<i64>,
    content: String,
    message_type: String,
    sent_at: String,
    is_read: bool,
}

impl MessageRecord {
    fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            group_id: self.group_id,
            content: self.content,
            message_type: MessageType::parse(&self.message_type)
                .ok_or_else(|| CacheError::Corrupt(format!("message type {}", self.message_type)))?,
            sent_at: parse_time(&self.sent_at)?,
            is_read: self.is_read,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ConversationRecord {
    id: i64,
    kind: String,
    last_message_id: Option<i64>,
    last_message_time: Option<String>,
    unread_count: i64,
    is_pinned: bool,
    created_at: String,
    updated_at: String,
}

impl ConversationRecord {
    fn into_conversation(self) -> Result<Conversation> {
        let kind = ChatKind::parse(&self.kind)
            .ok_or_else(|| CacheError::Corrupt(format!("chat kind {}", self.kind)))?;
        Ok(Conversation {
            id: self.id,
            kind,
            last_message_id: self.last_message_id,
            last_message_time: self.last_message_time.as_deref().map(parse_time).transpose()?,
            unread_count: self.unread_count.max(0) as u32,
            is_pinned: self.is_pinned,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::Corrupt(format!("timestamp {raw}: {e}")))
}

impl SessionCache {
    /// Open (or create) the on-disk cache in the platform data directory.
    pub async fn open() -> Result<Self> {
        let db_path = Self::default_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let cache = Self::open_with_url(&format!("sqlite:{}?mode=rwc", db_path.display())).await?;
        tracing::info!("Session cache opened at {}", db_path.display());
        Ok(cache)
    }

    pub async fn open_with_path(path: &str) -> Result<Self> {
        Self::open_with_url(&format!("sqlite:{}?mode=rwc", path)).await
    }

    /// Private in-memory cache, used by tests and ephemeral sessions.
    pub async fn open_in_memory() -> Result<Self> {
        // One connection only: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn open_with_url(url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(url).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com.instalk", "instalk", "instalk")
            .ok_or(CacheError::NoDataDir)?;
        Ok(dirs.data_dir().join("session.db"))
    }

    pub async fn load_messages(&self) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>("SELECT * FROM messages ORDER BY sent_at, id")
            .fetch_all(&self.pool)
            .await?;
        records.into_iter().map(MessageRecord::into_message).collect()
    }

    pub async fn save_message(&self, message: &Message) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO messages
             (id, sender_id, receiver_id, group_id, content, message_type, sent_at, is_read)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(message.group_id)
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(message.sent_at.to_rfc3339())
        .bind(message.is_read)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_message(&self, id: i64) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    /// Swap the whole message set in one transaction (history reload).
    pub async fn replace_messages(&self, messages: &[Message]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages").execute(&mut *tx).await?;
        for message in messages {
            sqlx::query(
                "INSERT OR REPLACE INTO messages
                 (id, sender_id, receiver_id, group_id, content, message_type, sent_at, is_read)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(message.id)
            .bind(message.sender_id)
            .bind(message.receiver_id)
            .bind(message.group_id)
            .bind(&message.content)
            .bind(message.message_type.as_str())
            .bind(message.sent_at.to_rfc3339())
            .bind(message.is_read)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_messages_read(&self, ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE messages SET is_read = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let records =
            sqlx::query_as::<_, ConversationRecord>("SELECT * FROM conversations ORDER BY id, kind")
                .fetch_all(&self.pool)
                .await?;
        records
            .into_iter()
            .map(ConversationRecord::into_conversation)
            .collect()
    }

    pub async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO conversations
             (id, kind, last_message_id, last_message_time, unread_count, is_pinned, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation.id)
        .bind(conversation.kind.as_str())
        .bind(conversation.last_message_id)
        .bind(conversation.last_message_time.map(|t| t.to_rfc3339()))
        .bind(conversation.unread_count as i64)
        .bind(conversation.is_pinned)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_conversation(&self, key: ConversationKey) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM conversations WHERE id = ? AND kind = ?")
            .bind(key.id)
            .bind(key.kind.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn replace_conversations(&self, conversations: &[Conversation]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM conversations").execute(&mut *tx).await?;
        for conversation in conversations {
            sqlx::query(
                "INSERT OR REPLACE INTO conversations
                 (id, kind, last_message_id, last_message_time, unread_count, is_pinned, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(conversation.id)
            .bind(conversation.kind.as_str())
            .bind(conversation.last_message_id)
            .bind(conversation.last_message_time.map(|t| t.to_rfc3339()))
            .bind(conversation.unread_count as i64)
            .bind(conversation.is_pinned)
            .bind(conversation.created_at.to_rfc3339())
            .bind(conversation.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn save_current_chat(&self, current: Option<ConversationKey>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        match current {
            Some(key) => {
                for (k, v) in [
                    (KEY_CURRENT_CHAT_ID, key.id.to_string()),
                    (KEY_CHAT_KIND, key.kind.as_str().to_string()),
                ] {
                    sqlx::query("INSERT OR REPLACE INTO session (key, value) VALUES (?, ?)")
                        .bind(k)
                        .bind(v)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            None => {
                sqlx::query("DELETE FROM session WHERE key IN (?, ?)")
                    .bind(KEY_CURRENT_CHAT_ID)
                    .bind(KEY_CHAT_KIND)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_current_chat(&self) -> Result<Option<ConversationKey>> {
        let id: Option<(String,)> = sqlx::query_as("SELECT value FROM session WHERE key = ?")
            .bind(KEY_CURRENT_CHAT_ID)
            .fetch_optional(&self.pool)
            .await?;
        let kind: Option<(String,)> = sqlx::query_as("SELECT value FROM session WHERE key = ?")
            .bind(KEY_CHAT_KIND)
            .fetch_optional(&self.pool)
            .await?;

        match (id, kind) {
            (Some((id,)), Some((kind,))) => {
                let id = id
                    .parse::<i64>()
                    .map_err(|_| CacheError::Corrupt(format!("current chat id {id}")))?;
                let kind = ChatKind::parse(&kind)
                    .ok_or_else(|| CacheError::Corrupt(format!("chat kind {kind}")))?;
                Ok(Some(ConversationKey { id, kind }))
            }
            _ => Ok(None),
        }
    }

    pub async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO user_profiles (user_id, username, avatar) VALUES (?, ?, ?)",
        )
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.avatar)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_profiles(&self) -> Result<Vec<UserProfile>> {
        let rows: Vec<(i64, String, Option<String>)> =
            sqlx::query_as("SELECT user_id, username, avatar FROM user_profiles")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, username, avatar)| UserProfile { id, username, avatar })
            .collect())
    }

    /// Wipe everything; used on logout.
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["messages", "conversations", "session", "user_profiles"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(id: i64) -> Message {
        Message {
            id,
            sender_id: 2,
            receiver_id: Some(1),
            group_id: None,
            content: format!("msg {id}"),
            message_type: MessageType::Text,
            sent_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            is_read: false,
        }
    }

    #[tokio::test]
    async fn message_round_trip() {
        let cache = SessionCache::open_in_memory().await.unwrap();
        cache.save_message(&message(1)).await.unwrap();
        cache.save_message(&message(2)).await.unwrap();

        let restored = cache.load_messages().await.unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].id, 1);
        assert_eq!(restored[0].sent_at, message(1).sent_at);

        cache.mark_messages_read(&[1]).await.unwrap();
        let restored = cache.load_messages().await.unwrap();
        assert!(restored[0].is_read);
        assert!(!restored[1].is_read);

        assert!(cache.delete_message(1).await.unwrap());
        assert!(!cache.delete_message(1).await.unwrap());
        assert_eq!(cache.load_messages().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conversation_weak_reference_survives_message_loss() {
        let cache = SessionCache::open_in_memory().await.unwrap();
        let m = message(7);
        let now = Utc.timestamp_opt(1_700_000_100, 0).unwrap();
        let conv = Conversation {
            id: 2,
            kind: ChatKind::Friend,
            last_message_id: Some(m.id),
            last_message_time: Some(m.sent_at),
            unread_count: 3,
            is_pinned: true,
            created_at: now,
            updated_at: now,
        };
        cache.save_conversation(&conv).await.unwrap();

        // Message 7 was never persisted: the by-id reference restores
        // regardless, and resolution against the message set is deferred
        // to the reader.
        let restored = cache.load_conversations().await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].last_message_id, Some(7));
        assert_eq!(restored[0].last_message_time, Some(m.sent_at));
        assert_eq!(restored[0].unread_count, 3);
        assert!(restored[0].is_pinned);
    }

    #[tokio::test]
    async fn current_chat_round_trip() {
        let cache = SessionCache::open_in_memory().await.unwrap();
        assert_eq!(cache.load_current_chat().await.unwrap(), None);

        cache
            .save_current_chat(Some(ConversationKey::group(5)))
            .await
            .unwrap();
        assert_eq!(
            cache.load_current_chat().await.unwrap(),
            Some(ConversationKey::group(5))
        );

        cache.save_current_chat(None).await.unwrap();
        assert_eq!(cache.load_current_chat().await.unwrap(), None);
    }

    #[tokio::test]
    async fn replace_messages_swaps_the_set() {
        let cache = SessionCache::open_in_memory().await.unwrap();
        cache.save_message(&message(1)).await.unwrap();
        cache.replace_messages(&[message(2), message(3)]).await.unwrap();

        let ids: Vec<i64> = cache
            .load_messages()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn profiles_round_trip() {
        let cache = SessionCache::open_in_memory().await.unwrap();
        cache
            .save_profile(&UserProfile {
                id: 9,
                username: "ada".into(),
                avatar: None,
            })
            .await
            .unwrap();

        let profiles = cache.load_profiles().await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].username, "ada");

        cache.clear_all().await.unwrap();
        assert!(cache.load_profiles().await.unwrap().is_empty());
    }
}
