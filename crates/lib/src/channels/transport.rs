//! Chat transport seam: what the dispatcher needs from a channel.

use crate::addressing::SelfIdentity;
use crate::channels::inbound::ReplyTarget;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("channel api error: {0}")]
    Api(String),
}

/// A connected chat channel the dispatcher can reply through.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;

    /// The bot's own identity in this channel, used for mention and reply matching.
    async fn self_identity(&self) -> Result<SelfIdentity, ChannelError>;

    /// Send `text` as a reply threaded to `target`.
    async fn send_reply(&self, target: ReplyTarget, text: &str) -> Result<(), ChannelError>;

    /// Show a "typing" indicator in the chat. Best-effort: callers ignore failures.
    async fn send_typing(&self, chat_id: i64) -> Result<(), ChannelError>;
}
