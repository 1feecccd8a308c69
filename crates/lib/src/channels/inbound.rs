//! Inbound message from a channel: handed to the dispatcher for addressing and reply.

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: i64,
    pub display_name: String,
    /// Stable handle (Telegram username, without `@`). Not every user has one.
    pub handle: Option<String>,
    pub is_bot: bool,
}

/// The message an inbound message replies to. Only the sender matters for addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRef {
    pub message_id: i64,
    pub sender: Option<UserIdentity>,
}

/// Where a threaded reply goes: the chat and the message it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub chat_id: i64,
    pub message_id: i64,
}

/// A text message from a channel, immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender: UserIdentity,
    pub text: String,
    pub reply_to: Option<ReplyRef>,
}

impl IncomingMessage {
    /// Target for a reply threaded to this message.
    pub fn reply_target(&self) -> ReplyTarget {
        ReplyTarget {
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }
}
