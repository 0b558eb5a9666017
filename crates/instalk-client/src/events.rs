use instalk_core::Message;

/// What the session reports upward to its UI. One channel, taken once with
/// [`crate::ChatSession::take_event_receiver`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PushConnected,
    PushDisconnected { reason: String },
    MessageReceived { message: Message },
    MessageRetracted { message_id: i64 },
    PresenceChanged { user_id: i64, online: bool },
    FriendRemoved { friend_id: i64 },
    GroupDissolved { group_id: i64 },
    HistoryLoaded { count: usize },
}
