use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the roster a conversation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Friend,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Friend => "friend",
            ChatKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "friend" => Some(ChatKind::Friend),
            "group" => Some(ChatKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::Image => "IMAGE",
            MessageType::File => "FILE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(MessageType::Text),
            "IMAGE" => Some(MessageType::Image),
            "FILE" => Some(MessageType::File),
            _ => None,
        }
    }
}

/// Identity of a conversation: the peer user id or the group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub id: i64,
    pub kind: ChatKind,
}

impl ConversationKey {
    pub fn friend(id: i64) -> Self {
        Self { id, kind: ChatKind::Friend }
    }

    pub fn group(id: i64) -> Self {
        Self { id, kind: ChatKind::Group }
    }
}

/// A message as the server persists it. Exactly one of `receiver_id` and
/// `group_id` is set; ids are server-assigned and never fabricated locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: Option<i64>,
    pub group_id: Option<i64>,
    pub content: String,
    pub message_type: MessageType,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
}

impl Message {
    /// The conversation this message belongs to, from `viewer_id`'s side.
    /// Returns `None` when the receiver/group XOR invariant is violated.
    pub fn conversation_key(&self, viewer_id: i64) -> Option<ConversationKey> {
        match (self.group_id, self.receiver_id) {
            (Some(group_id), None) => Some(ConversationKey::group(group_id)),
            (None, Some(receiver_id)) => {
                let peer = if self.sender_id == viewer_id {
                    receiver_id
                } else {
                    self.sender_id
                };
                Some(ConversationKey::friend(peer))
            }
            _ => None,
        }
    }

    /// Display-order key: timestamp first, id as the deterministic tie-break.
    pub fn sort_key(&self) -> (DateTime<Utc>, i64) {
        (self.sent_at, self.id)
    }

    /// Whether this message counts toward `viewer_id`'s unread badge.
    pub fn is_unread_for(&self, viewer_id: i64) -> bool {
        !self.is_read && self.sender_id != viewer_id
    }
}

/// Outgoing message before the server has assigned an id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub receiver_id: Option<i64>,
    pub group_id: Option<i64>,
    pub content: String,
    pub message_type: MessageType,
}

impl Draft {
    pub fn to_friend(receiver_id: i64, content: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            receiver_id: Some(receiver_id),
            group_id: None,
            content: content.into(),
            message_type,
        }
    }

    pub fn to_group(group_id: i64, content: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            receiver_id: None,
            group_id: Some(group_id),
            content: content.into(),
            message_type,
        }
    }
}

/// Derived summary of the latest exchange with a peer or group. Holds only a
/// weak (by-id) reference to its last message; the message set stays the
/// single source of truth for content, and the summary survives deletion of
/// the message it points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub kind: ChatKind,
    pub last_message_id: Option<i64>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(key: ConversationKey, now: DateTime<Utc>) -> Self {
        Self {
            id: key.id,
            kind: key.kind,
            last_message_id: None,
            last_message_time: None,
            unread_count: 0,
            is_pinned: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey { id: self.id, kind: self.kind }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: i64,
    pub sender: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<i64>,
}

/// Display data for a user, retained even after they leave shared context so
/// historical messages keep a name and avatar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
}

/// Token pair returned by login; refresh handling lives in the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}
