use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Typed events carried by the push channel. The wire shape is
/// `{"type": "NEW_MESSAGE", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushEvent {
    NewMessage(Message),
    #[serde(rename_all = "camelCase")]
    MessageRetracted { message_id: i64 },
    #[serde(rename_all = "camelCase")]
    UserOnlineStatus { user_id: i64, online: bool },
    #[serde(rename_all = "camelCase")]
    FriendRemoved { friend_id: i64 },
    #[serde(rename_all = "camelCase")]
    GroupDissolved { group_id: i64 },
}
