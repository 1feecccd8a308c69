//! Addressing rules: decide whether an inbound message is meant for the bot and,
//! if so, strip the mention/command artifacts to get the query text.
//!
//! Pure logic, no I/O. Rules are checked in order; the bot-origin guard
//! short-circuits everything else, the rest are a plain disjunction:
//!
//! 1. sender is a bot: skip
//! 2. reply to one of the bot's own messages
//! 3. `@handle` mention as a whole token
//! 4. text starts with `/` (any command)

use crate::channels::{IncomingMessage, UserIdentity};

/// Command answered with the canned help text instead of a completion.
pub const START_COMMAND: &str = "/start";

/// The bot's own identity in the chat. Fetched once per session and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    id: i64,
    handle: String,
}

impl SelfIdentity {
    /// `handle` is stored without a leading `@`.
    pub fn new(id: i64, handle: impl Into<String>) -> Self {
        let handle = handle.into();
        let handle = handle.trim_start_matches('@').to_string();
        Self { id, handle }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Same user id or same handle. Display names are never compared.
    fn is(&self, user: &UserIdentity) -> bool {
        user.id == self.id || user.handle.as_deref() == Some(self.handle.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FromBot,
    NotAddressed,
}

/// Outcome of addressing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Not for us; do nothing.
    Skip(SkipReason),
    /// `/start`: answer with the help text, never forwarded.
    Help,
    /// Forward this (possibly empty) query to the completion relay.
    Forward(String),
}

impl DispatchDecision {
    pub fn should_respond(&self) -> bool {
        !matches!(self, DispatchDecision::Skip(_))
    }

    /// Query text after normalization; `Some("")` for `/start`, `None` when skipped.
    pub fn normalized_query(&self) -> Option<&str> {
        match self {
            DispatchDecision::Skip(_) => None,
            DispatchDecision::Help => Some(""),
            DispatchDecision::Forward(q) => Some(q),
        }
    }
}

/// Decide whether `msg` is addressed to `me` and normalize its text.
pub fn resolve(msg: &IncomingMessage, me: &SelfIdentity) -> DispatchDecision {
    if msg.sender.is_bot {
        return DispatchDecision::Skip(SkipReason::FromBot);
    }

    let reply_to_self = msg
        .reply_to
        .as_ref()
        .and_then(|r| r.sender.as_ref())
        .is_some_and(|s| me.is(s));
    let addressed = reply_to_self
        || contains_mention(&msg.text, me.handle())
        || msg.text.starts_with('/');
    if !addressed {
        return DispatchDecision::Skip(SkipReason::NotAddressed);
    }

    normalize(&msg.text, me.handle())
}

fn normalize(text: &str, handle: &str) -> DispatchDecision {
    let stripped = strip_mentions(text, handle);
    let stripped = stripped.trim();
    if !stripped.starts_with('/') {
        return DispatchDecision::Forward(stripped.to_string());
    }
    let (command, rest) = match stripped.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest),
        None => (stripped, ""),
    };
    if command == START_COMMAND {
        DispatchDecision::Help
    } else {
        DispatchDecision::Forward(rest.trim().to_string())
    }
}

/// Telegram usernames are `[A-Za-z0-9_]`.
fn is_handle_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Byte offsets of every `@handle` that is not followed by another handle character,
/// so `@mybot` never matches inside `@mybot_two`.
fn mention_spans(text: &str, handle: &str) -> Vec<(usize, usize)> {
    if handle.is_empty() {
        return Vec::new();
    }
    let needle = format!("@{}", handle);
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(pos) = text[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        let whole_token = !text[end..].chars().next().is_some_and(is_handle_char);
        if whole_token {
            spans.push((start, end));
        }
        from = end;
    }
    spans
}

fn contains_mention(text: &str, handle: &str) -> bool {
    !mention_spans(text, handle).is_empty()
}

fn strip_mentions(text: &str, handle: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end) in mention_spans(text, handle) {
        out.push_str(&text[last..start]);
        last = end;
    }
    out.push_str(&text[last..]);
    out
}
