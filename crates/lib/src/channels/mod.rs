//! Communication channels (e.g. Telegram).
//!
//! The `ChatTransport` trait is the seam the dispatcher talks to; the Telegram
//! connector long-polls for updates and pushes text messages to the dispatcher.

mod inbound;
mod telegram;
mod transport;

pub use inbound::{IncomingMessage, ReplyRef, ReplyTarget, UserIdentity};
pub use telegram::{TelegramChannel, TelegramUpdate};
pub use transport::{ChannelError, ChatTransport};
