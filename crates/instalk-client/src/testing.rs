//! Scripted [`Api`] implementation for store and session tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use chrono::{TimeZone, Utc};

use instalk_core::{
    Api, ApiError, ApiResult, Draft, Friend, FriendRequest, Group, Message, MessageType,
};

#[derive(Default)]
pub struct MockApi {
    pub history: Mutex<Vec<Message>>,
    pub new_since: Mutex<Vec<Message>>,
    pub friends: Mutex<Vec<Friend>>,
    pub pending: Mutex<Vec<FriendRequest>>,
    pub groups: Mutex<Vec<Group>>,
    pub my_groups: Mutex<Vec<Group>>,
    pub online: Mutex<HashMap<i64, bool>>,
    pub fail_mark_read: Mutex<bool>,
    pub mark_read_calls: AtomicU32,
    pub batch_calls: Mutex<Vec<Vec<i64>>>,
    pub history_calls: AtomicU32,
    next_id: AtomicI64,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    pub fn message(id: i64, sender: i64, receiver: Option<i64>, group: Option<i64>) -> Message {
        Message {
            id,
            sender_id: sender,
            receiver_id: receiver,
            group_id: group,
            content: format!("msg {id}"),
            message_type: MessageType::Text,
            sent_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            is_read: false,
        }
    }

    pub fn friend(id: i64) -> Friend {
        Friend {
            id,
            username: format!("user{id}"),
            avatar: None,
        }
    }

    pub fn group(id: i64) -> Group {
        Group {
            id,
            name: format!("group{id}"),
            avatar: None,
            member_ids: Vec::new(),
        }
    }
}

impl Api for MockApi {
    async fn fetch_history(&self) -> ApiResult<Vec<Message>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.history.lock().unwrap().clone())
    }

    async fn send_message(&self, draft: &Draft) -> ApiResult<Message> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Message {
            id,
            sender_id: 1,
            receiver_id: draft.receiver_id,
            group_id: draft.group_id,
            content: draft.content.clone(),
            message_type: draft.message_type,
            sent_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            is_read: false,
        })
    }

    async fn fetch_new_since(&self, _reference: Option<&Message>) -> ApiResult<Vec<Message>> {
        Ok(self.new_since.lock().unwrap().clone())
    }

    async fn mark_read(&self, _message_id: i64) -> ApiResult<()> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_mark_read.lock().unwrap() {
            return Err(ApiError::Transport("mark read failed".into()));
        }
        Ok(())
    }

    async fn mark_read_batch(&self, message_ids: &[i64]) -> ApiResult<()> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_mark_read.lock().unwrap() {
            return Err(ApiError::Transport("mark read failed".into()));
        }
        self.batch_calls.lock().unwrap().push(message_ids.to_vec());
        Ok(())
    }

    async fn retract_message(&self, _message_id: i64) -> ApiResult<()> {
        Ok(())
    }

    async fn fetch_online_snapshot(&self) -> ApiResult<HashMap<i64, bool>> {
        Ok(self.online.lock().unwrap().clone())
    }

    async fn fetch_friends(&self) -> ApiResult<Vec<Friend>> {
        Ok(self.friends.lock().unwrap().clone())
    }

    async fn fetch_pending_requests(&self) -> ApiResult<Vec<FriendRequest>> {
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn send_friend_request(&self, _user_id: i64) -> ApiResult<()> {
        Ok(())
    }

    async fn accept_friend_request(&self, request_id: i64) -> ApiResult<Friend> {
        Ok(Self::friend(request_id))
    }

    async fn reject_friend_request(&self, _request_id: i64) -> ApiResult<()> {
        Ok(())
    }

    async fn delete_friend(&self, _friend_id: i64) -> ApiResult<()> {
        Ok(())
    }

    async fn fetch_groups(&self) -> ApiResult<Vec<Group>> {
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn fetch_my_groups(&self) -> ApiResult<Vec<Group>> {
        Ok(self.my_groups.lock().unwrap().clone())
    }

    async fn create_group(&self, name: &str) -> ApiResult<Group> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Group {
            id,
            name: name.to_string(),
            avatar: None,
            member_ids: vec![1],
        })
    }

    async fn join_group(&self, _group_id: i64) -> ApiResult<()> {
        Ok(())
    }

    async fn leave_group(&self, _group_id: i64) -> ApiResult<()> {
        Ok(())
    }
}
