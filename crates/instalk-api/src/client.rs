use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use instalk_core::{
    Api, ApiError, ApiResult, AuthTokens, Draft, Friend, FriendRequest, Group, Message,
    UserProfile,
};

#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 6_000,
            connect_timeout_ms: 3_000,
            user_agent: format!("instalk/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Success/failure envelope every endpoint wraps its payload in.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    message: Option<String>,
    data: Option<T>,
}

/// One-time challenge handed out before registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Captcha {
    pub id: String,
    /// Base64-encoded image for the front-end to render.
    pub image: String,
}

/// Partial group edit; fields left unset keep their server-side value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

pub struct HttpApi {
    base_url: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, cfg: HttpApiConfig) -> ApiResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent)
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            base_url,
            http,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Authenticate and remember the access token for subsequent calls.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<AuthTokens> {
        let tokens: AuthTokens = self
            .post_json_public(
                "/auth/login",
                &json!({ "username": username, "password": password }),
            )
            .await?;
        self.set_token(tokens.access_token.clone());
        Ok(tokens)
    }

    /// Fetch a captcha challenge to accompany registration.
    pub async fn fetch_captcha(&self) -> ApiResult<Captcha> {
        let resp = self
            .http
            .get(self.url("/auth/captcha"))
            .send()
            .await
            .map_err(transport)?;
        unwrap_envelope(resp).await
    }

    /// Create an account. Does not log in; call [`HttpApi::login`] after.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        captcha_id: &str,
        captcha_code: &str,
    ) -> ApiResult<()> {
        let _: Option<serde_json::Value> = self
            .post_json_public(
                "/auth/register",
                &json!({
                    "username": username,
                    "password": password,
                    "captchaId": captcha_id,
                    "captchaCode": captcha_code,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> ApiResult<()> {
        self.post_unit(
            "/auth/change-password",
            &json!({ "oldPassword": old_password, "newPassword": new_password }),
        )
        .await
    }

    pub async fn fetch_user_info(&self) -> ApiResult<UserProfile> {
        self.get_json("/auth/userinfo").await
    }

    pub async fn logout(&self) -> ApiResult<()> {
        self.post_unit("/auth/logout", &json!({})).await?;
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    /// Fuzzy username lookup, for sending friend requests to strangers.
    pub async fn search_users(&self, username: &str) -> ApiResult<Vec<UserProfile>> {
        let users: Option<Vec<UserProfile>> = self
            .get_json_query("/friendship/search", &[("username", username)])
            .await?;
        Ok(users.unwrap_or_default())
    }

    /// Fuzzy group-name lookup over the discoverable groups.
    pub async fn search_groups(&self, name: &str) -> ApiResult<Vec<Group>> {
        let groups: Option<Vec<Group>> = self
            .get_json_query("/group/search", &[("name", name)])
            .await?;
        Ok(groups.unwrap_or_default())
    }

    pub async fn update_group_info(&self, update: &GroupUpdate) -> ApiResult<()> {
        self.post_unit("/group/update", update).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> ApiResult<reqwest::RequestBuilder> {
        match self.token() {
            Some(token) => Ok(req.header("Authorization", token)),
            None => Err(ApiError::Unauthenticated),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let req = self.authorize(self.http.get(self.url(path)))?;
        let resp = req.send().await.map_err(transport)?;
        unwrap_envelope(resp).await
    }

    async fn get_json_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ApiResult<T> {
        let req = self.authorize(self.http.get(self.url(path)).query(query))?;
        let resp = req.send().await.map_err(transport)?;
        unwrap_envelope(resp).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> ApiResult<T> {
        let req = self.authorize(self.http.post(self.url(path)).json(body))?;
        let resp = req.send().await.map_err(transport)?;
        unwrap_envelope(resp).await
    }

    /// POST for the endpoints reachable before login.
    async fn post_json_public<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> ApiResult<T> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        unwrap_envelope(resp).await
    }

    /// POST whose envelope carries no payload of interest.
    async fn post_unit(&self, path: &str, body: &impl Serialize) -> ApiResult<()> {
        let _: Option<serde_json::Value> = self.post_json(path, body).await?;
        Ok(())
    }
}

fn transport(e: reqwest::Error) -> ApiError {
    ApiError::Transport(e.to_string())
}

async fn unwrap_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> ApiResult<T> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthenticated);
    }
    if !status.is_success() {
        return Err(ApiError::Transport(format!("http status {}", status)));
    }

    let envelope: Envelope<T> = resp
        .json()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))?;

    if envelope.code != 0 {
        return Err(ApiError::Rejected(
            envelope.message.unwrap_or_else(|| "request failed".into()),
        ));
    }

    match envelope.data {
        Some(data) => Ok(data),
        // `data` may legitimately be null; let `T = Option<_>` absorb it.
        None => serde_json::from_value(serde_json::Value::Null)
            .map_err(|e| ApiError::Decode(e.to_string())),
    }
}

impl Api for HttpApi {
    async fn fetch_history(&self) -> ApiResult<Vec<Message>> {
        let messages: Option<Vec<Message>> = self.get_json("/message/messageList").await?;
        Ok(messages.unwrap_or_default())
    }

    async fn send_message(&self, draft: &Draft) -> ApiResult<Message> {
        self.post_json("/message/send", draft).await
    }

    async fn fetch_new_since(&self, reference: Option<&Message>) -> ApiResult<Vec<Message>> {
        let path = match reference {
            Some(m) => format!(
                "/message/newSince?after={}&afterId={}",
                m.sent_at.to_rfc3339(),
                m.id
            ),
            None => "/message/messageList".to_string(),
        };
        let messages: Option<Vec<Message>> = self.get_json(&path).await?;
        Ok(messages.unwrap_or_default())
    }

    async fn mark_read(&self, message_id: i64) -> ApiResult<()> {
        self.post_unit("/message/markAsRead", &json!({ "messageId": message_id }))
            .await
    }

    async fn mark_read_batch(&self, message_ids: &[i64]) -> ApiResult<()> {
        let joined = message_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.post_unit("/message/markListAsRead", &json!({ "messageIds": joined }))
            .await
    }

    async fn retract_message(&self, message_id: i64) -> ApiResult<()> {
        self.post_unit("/message/retract", &json!({ "messageId": message_id }))
            .await
    }

    async fn fetch_online_snapshot(&self) -> ApiResult<HashMap<i64, bool>> {
        // JSON object keys arrive as strings.
        let raw: Option<HashMap<String, bool>> = self.get_json("/ws/online/all").await?;
        let mut snapshot = HashMap::new();
        for (key, online) in raw.unwrap_or_default() {
            match key.parse::<i64>() {
                Ok(user_id) => {
                    snapshot.insert(user_id, online);
                }
                Err(_) => {
                    tracing::warn!(key = %key, "Skipping non-numeric user id in presence snapshot");
                }
            }
        }
        Ok(snapshot)
    }

    async fn fetch_friends(&self) -> ApiResult<Vec<Friend>> {
        let friends: Option<Vec<Friend>> = self.get_json("/friendship/friendList").await?;
        Ok(friends.unwrap_or_default())
    }

    async fn fetch_pending_requests(&self) -> ApiResult<Vec<FriendRequest>> {
        let pending: Option<Vec<FriendRequest>> = self.get_json("/friendship/pendingList").await?;
        Ok(pending.unwrap_or_default())
    }

    async fn send_friend_request(&self, user_id: i64) -> ApiResult<()> {
        self.post_unit("/friendship/send", &json!({ "id": user_id }))
            .await
    }

    async fn accept_friend_request(&self, request_id: i64) -> ApiResult<Friend> {
        self.post_json("/friendship/accept", &json!({ "id": request_id }))
            .await
    }

    async fn reject_friend_request(&self, request_id: i64) -> ApiResult<()> {
        self.post_unit("/friendship/reject", &json!({ "id": request_id }))
            .await
    }

    async fn delete_friend(&self, friend_id: i64) -> ApiResult<()> {
        self.post_unit("/friendship/delete", &json!({ "id": friend_id }))
            .await
    }

    async fn fetch_groups(&self) -> ApiResult<Vec<Group>> {
        let groups: Option<Vec<Group>> = self.get_json("/group/groupList").await?;
        Ok(groups.unwrap_or_default())
    }

    async fn fetch_my_groups(&self) -> ApiResult<Vec<Group>> {
        let groups: Option<Vec<Group>> = self.get_json("/group/myGroupList").await?;
        Ok(groups.unwrap_or_default())
    }

    async fn create_group(&self, name: &str) -> ApiResult<Group> {
        self.post_json("/group/create", &json!({ "name": name }))
            .await
    }

    async fn join_group(&self, group_id: i64) -> ApiResult<()> {
        self.post_unit("/group/join", &json!({ "groupId": group_id }))
            .await
    }

    async fn leave_group(&self, group_id: i64) -> ApiResult<()> {
        self.post_unit("/group/leave", &json!({ "groupId": group_id }))
            .await
    }
}
