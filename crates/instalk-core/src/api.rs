use std::collections::HashMap;
use std::future::Future;

use thiserror::Error;

use crate::models::{Draft, Friend, FriendRequest, Group, Message};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("not authenticated")]
    Unauthenticated,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// The REST surface the stores consume. Implemented by the HTTP adapter and
/// by scripted mocks in tests; stores never talk to the network directly.
pub trait Api: Send + Sync + 'static {
    fn fetch_history(&self) -> impl Future<Output = ApiResult<Vec<Message>>> + Send;

    fn send_message(&self, draft: &Draft) -> impl Future<Output = ApiResult<Message>> + Send;

    /// Messages strictly after the reference point, or full history when no
    /// reference is known. Callers still deduplicate by id.
    fn fetch_new_since(
        &self,
        reference: Option<&Message>,
    ) -> impl Future<Output = ApiResult<Vec<Message>>> + Send;

    fn mark_read(&self, message_id: i64) -> impl Future<Output = ApiResult<()>> + Send;

    fn mark_read_batch(&self, message_ids: &[i64]) -> impl Future<Output = ApiResult<()>> + Send;

    fn retract_message(&self, message_id: i64) -> impl Future<Output = ApiResult<()>> + Send;

    fn fetch_online_snapshot(&self)
    -> impl Future<Output = ApiResult<HashMap<i64, bool>>> + Send;

    fn fetch_friends(&self) -> impl Future<Output = ApiResult<Vec<Friend>>> + Send;

    fn fetch_pending_requests(&self)
    -> impl Future<Output = ApiResult<Vec<FriendRequest>>> + Send;

    fn send_friend_request(&self, user_id: i64) -> impl Future<Output = ApiResult<()>> + Send;

    fn accept_friend_request(
        &self,
        request_id: i64,
    ) -> impl Future<Output = ApiResult<Friend>> + Send;

    fn reject_friend_request(&self, request_id: i64)
    -> impl Future<Output = ApiResult<()>> + Send;

    fn delete_friend(&self, friend_id: i64) -> impl Future<Output = ApiResult<()>> + Send;

    fn fetch_groups(&self) -> impl Future<Output = ApiResult<Vec<Group>>> + Send;

    fn fetch_my_groups(&self) -> impl Future<Output = ApiResult<Vec<Group>>> + Send;

    fn create_group(&self, name: &str) -> impl Future<Output = ApiResult<Group>> + Send;

    fn join_group(&self, group_id: i64) -> impl Future<Output = ApiResult<()>> + Send;

    fn leave_group(&self, group_id: i64) -> impl Future<Output = ApiResult<()>> + Send;
}
