//! Telegram channel: long-poll getUpdates, getMe, sendMessage and sendChatAction via Bot API.

use crate::addressing::SelfIdentity;
use crate::channels::inbound::{IncomingMessage, ReplyRef, ReplyTarget, UserIdentity};
use crate::channels::transport::{ChannelError, ChatTransport};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const RETRY_DELAY: Duration = Duration::from_secs(2);
/// sendMessage rejects texts longer than this many characters.
const MESSAGE_LIMIT: usize = 4096;

/// Bot API envelope: `{ "ok": bool, "result": T, "description": "..." }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl From<TelegramUser> for UserIdentity {
    fn from(u: TelegramUser) -> Self {
        let display_name = match u.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", u.first_name, last),
            _ => u.first_name,
        };
        UserIdentity {
            id: u.id,
            display_name,
            handle: u.username,
            is_bot: u.is_bot,
        }
    }
}

impl TelegramUpdate {
    /// Convert to an inbound message. Non-text messages and messages without a sender yield None.
    pub fn into_incoming(self) -> Option<IncomingMessage> {
        let msg = self.message?;
        let text = msg.text?;
        let sender = msg.from?;
        let reply_to = msg.reply_to_message.map(|r| ReplyRef {
            message_id: r.message_id,
            sender: r.from.map(UserIdentity::from),
        });
        Some(IncomingMessage {
            chat_id: msg.chat.id,
            message_id: msg.message_id,
            sender: sender.into(),
            text,
            reply_to,
        })
    }
}

/// Telegram channel connector: long-polls for updates and sends threaded replies.
pub struct TelegramChannel {
    id: String,
    token: String,
    api_base: String,
    poll_timeout_secs: u64,
    request_timeout: Duration,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// `request_timeout` bounds every Bot API call; getUpdates gets it on top of the long-poll timeout.
    pub fn new(
        token: String,
        api_base: String,
        poll_timeout_secs: u64,
        request_timeout: Duration,
    ) -> Self {
        Self {
            id: "telegram".to_string(),
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
            poll_timeout_secs,
            request_timeout,
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the long-poll loop after the in-flight getUpdates returns.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start the getUpdates long-poll loop and forward text messages to the dispatcher.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<IncomingMessage>,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// POST a Bot API method and unwrap the `{ok, result}` envelope.
    /// URLs are stripped from request errors since they embed the token.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChannelError> {
        self.call_with_timeout(method, body, self.request_timeout).await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        let res = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Request(e.without_url()))?;
        let status = res.status();
        let data: ApiResponse<T> = res
            .json()
            .await
            .map_err(|e| ChannelError::Request(e.without_url()))?;
        if !data.ok {
            return Err(ChannelError::Api(format!(
                "{} failed: {} {}",
                method,
                status,
                data.description.unwrap_or_default()
            )));
        }
        data.result
            .ok_or_else(|| ChannelError::Api(format!("{} returned no result", method)))
    }

    /// Call getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), ChannelError> {
        let mut body = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            body["offset"] = serde_json::Value::from(off);
        }
        let timeout = Duration::from_secs(self.poll_timeout_secs) + self.request_timeout;
        let updates: Vec<TelegramUpdate> = self.call_with_timeout("getUpdates", &body, timeout).await?;
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    /// Call getMe to learn the bot's own id and username.
    pub async fn get_me(&self) -> Result<SelfIdentity, ChannelError> {
        let me: TelegramUser = self.call("getMe", &serde_json::json!({})).await?;
        let handle = me
            .username
            .ok_or_else(|| ChannelError::Api("getMe returned a bot without username".to_string()))?;
        Ok(SelfIdentity::new(me.id, handle))
    }
}

async fn run_get_updates_loop(
    channel: Arc<TelegramChannel>,
    inbound_tx: mpsc::Sender<IncomingMessage>,
) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                if next.is_some() {
                    offset = next;
                }
                for u in updates {
                    let update_id = u.update_id;
                    let Some(inbound) = u.into_incoming() else {
                        log::debug!("telegram: skipping non-text update {}", update_id);
                        continue;
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::warn!("telegram getUpdates error: {}", e);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChatTransport for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn self_identity(&self) -> Result<SelfIdentity, ChannelError> {
        self.get_me().await
    }

    /// Long texts go out as several messages, each threaded to `target`.
    async fn send_reply(&self, target: ReplyTarget, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, MESSAGE_LIMIT) {
            let body = serde_json::json!({
                "chat_id": target.chat_id,
                "text": chunk,
                "reply_parameters": {
                    "message_id": target.message_id,
                    "allow_sending_without_reply": true,
                },
            });
            let _: serde_json::Value = self.call("sendMessage", &body).await?;
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "chat_id": chat_id, "action": "typing" });
        let _: bool = self.call("sendChatAction", &body).await?;
        Ok(())
    }
}

/// Split `text` into pieces of at most `limit` characters, preferring to break after a newline.
fn split_message(text: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > limit {
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let end = match rest[..hard_end].rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ => hard_end,
        };
        chunks.push(&rest[..end]);
        rest = &rest[end..];
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}
