//! Dispatch driver: addressing -> typing indicator -> completion relay -> threaded reply.
//!
//! Per-message failures stay inside `handle`; the loop keeps going no matter what
//! one message does.

use crate::addressing::{self, DispatchDecision, SelfIdentity, SkipReason};
use crate::channels::{ChatTransport, IncomingMessage};
use crate::config::RepliesConfig;
use crate::llm::CompletionService;
use crate::relay::{CompletionOutcome, CompletionRelay};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Skipped(SkipReason),
    /// `/start` answered with the help text.
    Help,
    /// Model reply sent.
    Answered,
    /// Completion failed or the reply was rejected; apology sent.
    Apologized,
}

pub struct Dispatcher<S> {
    transport: Arc<dyn ChatTransport>,
    relay: Arc<CompletionRelay<S>>,
    me: SelfIdentity,
    replies: RepliesConfig,
}

impl<S: CompletionService + 'static> Dispatcher<S> {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        relay: Arc<CompletionRelay<S>>,
        me: SelfIdentity,
        replies: RepliesConfig,
    ) -> Self {
        Self {
            transport,
            relay,
            me,
            replies,
        }
    }

    /// Process one message start to finish. Send failures are logged, not returned;
    /// a rejected model reply falls back to the apology.
    pub async fn handle(&self, msg: &IncomingMessage) -> Handled {
        let query = match addressing::resolve(msg, &self.me) {
            DispatchDecision::Skip(reason) => {
                log::debug!(
                    "dispatch: skipping message {} in chat {} ({:?})",
                    msg.message_id,
                    msg.chat_id,
                    reason
                );
                return Handled::Skipped(reason);
            }
            DispatchDecision::Help => {
                self.reply(msg, &self.replies.help).await;
                return Handled::Help;
            }
            DispatchDecision::Forward(query) => query,
        };

        log::info!(
            "dispatch: message {} in chat {} from {} addressed to bot",
            msg.message_id,
            msg.chat_id,
            msg.sender.id
        );

        // The typing indicator never holds up the completion: it is dropped
        // as soon as the relay finishes.
        let complete = self.relay.complete(&query);
        tokio::pin!(complete);
        let outcome = tokio::select! {
            biased;
            _ = self.typing(msg.chat_id) => complete.await,
            outcome = &mut complete => outcome,
        };

        match outcome {
            CompletionOutcome::Success { text } => {
                if self.reply(msg, &text).await {
                    return Handled::Answered;
                }
                self.reply(msg, &self.replies.apology).await;
                Handled::Apologized
            }
            CompletionOutcome::Failure { cause } => {
                log::warn!(
                    "dispatch: completion failed for message {} in chat {}: {}",
                    msg.message_id,
                    msg.chat_id,
                    cause
                );
                self.reply(msg, &self.replies.apology).await;
                Handled::Apologized
            }
        }
    }

    async fn typing(&self, chat_id: i64) {
        if let Err(e) = self.transport.send_typing(chat_id).await {
            log::debug!("dispatch: typing indicator failed: {}", e);
        }
    }

    /// Returns false when the transport rejected the reply.
    async fn reply(&self, msg: &IncomingMessage, text: &str) -> bool {
        match self.transport.send_reply(msg.reply_target(), text).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "dispatch: sending reply to message {} in chat {} via {} failed: {}",
                    msg.message_id,
                    msg.chat_id,
                    self.transport.id(),
                    e
                );
                false
            }
        }
    }

    /// Drain `inbound_rx` until the sender side closes. With `concurrent`, each
    /// message gets its own task; otherwise messages are handled one at a time.
    /// Returns only after every spawned message task has finished.
    pub async fn run(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<IncomingMessage>, concurrent: bool) {
        log::info!(
            "dispatch: listening as @{} ({})",
            self.me.handle(),
            if concurrent { "concurrent" } else { "sequential" }
        );
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                msg = inbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if concurrent {
                        let this = Arc::clone(&self);
                        tasks.spawn(async move {
                            this.handle(&msg).await;
                        });
                    } else {
                        self.handle(&msg).await;
                    }
                }
                Some(res) = tasks.join_next(), if !tasks.is_empty() => log_task_result(res),
            }
        }
        if !tasks.is_empty() {
            log::info!("dispatch: waiting for {} in-flight messages", tasks.len());
        }
        while let Some(res) = tasks.join_next().await {
            log_task_result(res);
        }
        log::info!("dispatch: inbound channel closed");
    }
}

fn log_task_result(res: Result<(), JoinError>) {
    if let Err(e) = res {
        log::error!("dispatch: message task failed: {}", e);
    }
}
