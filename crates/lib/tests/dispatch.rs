//! Integration test: drive the dispatcher with a fake transport and completion service.
//! Does not require Telegram or a completion endpoint.

use async_trait::async_trait;
use lib::addressing::{SelfIdentity, SkipReason};
use lib::channels::{ChannelError, ChatTransport, IncomingMessage, ReplyRef, ReplyTarget, UserIdentity};
use lib::config::RepliesConfig;
use lib::dispatch::{Dispatcher, Handled};
use lib::llm::{Candidate, Completion, CompletionService, LlmError};
use lib::relay::{CompletionRelay, RelaySettings};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingTransport {
    replies: Mutex<Vec<(ReplyTarget, String)>>,
    typing: Mutex<Vec<i64>>,
    fail_typing: bool,
    hang_typing: bool,
    /// Reject replies longer than this, like a chat API with a length cap.
    max_reply_chars: Option<usize>,
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn id(&self) -> &str {
        "fake"
    }

    async fn self_identity(&self) -> Result<SelfIdentity, ChannelError> {
        Ok(SelfIdentity::new(42, "mybot"))
    }

    async fn send_reply(&self, target: ReplyTarget, text: &str) -> Result<(), ChannelError> {
        if self.max_reply_chars.is_some_and(|max| text.chars().count() > max) {
            return Err(ChannelError::Api("message is too long".to_string()));
        }
        self.replies.lock().unwrap().push((target, text.to_string()));
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), ChannelError> {
        if self.hang_typing {
            std::future::pending::<()>().await;
        }
        if self.fail_typing {
            return Err(ChannelError::Api("typing refused".to_string()));
        }
        self.typing.lock().unwrap().push(chat_id);
        Ok(())
    }
}

enum Reply {
    Text(String),
    Error(&'static str),
    Hang,
}

struct ScriptedService {
    reply: Reply,
    queries: Mutex<Vec<String>>,
}

impl ScriptedService {
    fn with(reply: Reply) -> Self {
        Self {
            reply,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn ok(text: &str) -> Self {
        Self::with(Reply::Text(text.to_string()))
    }

    fn failing(cause: &'static str) -> Self {
        Self::with(Reply::Error(cause))
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn create_completion(
        &self,
        _system_prompt: &str,
        user_text: &str,
        _max_tokens: u32,
    ) -> Result<Completion, LlmError> {
        self.queries.lock().unwrap().push(user_text.to_string());
        match &self.reply {
            Reply::Text(text) => Ok(Completion {
                candidates: vec![Candidate {
                    text: Some(text.clone()),
                }],
            }),
            Reply::Error(cause) => Err(LlmError::Api(cause.to_string())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Completion::default())
            }
        }
    }
}

struct Harness {
    transport: Arc<RecordingTransport>,
    relay: Arc<CompletionRelay<ScriptedService>>,
    dispatcher: Arc<Dispatcher<ScriptedService>>,
}

fn replies() -> RepliesConfig {
    RepliesConfig {
        apology: "Sorry, try again.".to_string(),
        help: "Mention me to ask something.".to_string(),
    }
}

fn harness(service: ScriptedService, transport: RecordingTransport) -> Harness {
    harness_with_timeout(service, transport, Duration::from_secs(5))
}

fn harness_with_timeout(
    service: ScriptedService,
    transport: RecordingTransport,
    timeout: Duration,
) -> Harness {
    let transport = Arc::new(transport);
    let relay = Arc::new(CompletionRelay::new(
        service,
        RelaySettings {
            system_prompt: "be brief".to_string(),
            max_tokens: 500,
            timeout,
        },
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        transport.clone(),
        relay.clone(),
        SelfIdentity::new(42, "mybot"),
        replies(),
    ));
    Harness {
        transport,
        relay,
        dispatcher,
    }
}

impl Harness {
    fn replies(&self) -> Vec<(ReplyTarget, String)> {
        self.transport.replies.lock().unwrap().clone()
    }

    fn relay_queries(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.relay.service().queries.lock().unwrap()
    }
}

fn human() -> UserIdentity {
    UserIdentity {
        id: 5,
        display_name: "Ann".to_string(),
        handle: Some("ann".to_string()),
        is_bot: false,
    }
}

fn message(message_id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id: -100,
        message_id,
        sender: human(),
        text: text.to_string(),
        reply_to: None,
    }
}

fn target(message_id: i64) -> ReplyTarget {
    ReplyTarget {
        chat_id: -100,
        message_id,
    }
}

#[tokio::test]
async fn command_query_is_answered_in_thread() {
    let h = harness(ScriptedService::ok("A joke."), RecordingTransport::default());
    let out = h.dispatcher.handle(&message(10, "/ask tell me a joke")).await;
    assert_eq!(out, Handled::Answered);
    assert_eq!(h.replies(), vec![(target(10), "A joke.".to_string())]);
    assert_eq!(*h.relay_queries(), vec!["tell me a joke".to_string()]);
    assert_eq!(*h.transport.typing.lock().unwrap(), vec![-100]);
}

#[tokio::test]
async fn start_sends_help_without_completion() {
    let h = harness(ScriptedService::ok("unused"), RecordingTransport::default());
    let out = h.dispatcher.handle(&message(11, "/start")).await;
    assert_eq!(out, Handled::Help);
    assert_eq!(h.replies(), vec![(target(11), replies().help)]);
    assert!(h.relay_queries().is_empty());
    assert!(h.transport.typing.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failure_sends_fixed_apology_in_thread() {
    for cause in ["503 upstream down", "connection reset by peer"] {
        let h = harness(ScriptedService::failing(cause), RecordingTransport::default());
        let out = h.dispatcher.handle(&message(12, "@mybot hello")).await;
        assert_eq!(out, Handled::Apologized);
        let sent = h.replies();
        assert_eq!(sent, vec![(target(12), replies().apology)]);
        assert!(!sent[0].1.contains(cause));
    }
}

#[tokio::test]
async fn bot_messages_never_reach_the_relay() {
    let h = harness(ScriptedService::ok("unused"), RecordingTransport::default());
    let mut msg = message(13, "@mybot /ask loop?");
    msg.sender.is_bot = true;
    assert_eq!(h.dispatcher.handle(&msg).await, Handled::Skipped(SkipReason::FromBot));
    assert!(h.replies().is_empty());
    assert!(h.relay_queries().is_empty());
}

#[tokio::test]
async fn reply_to_bot_is_answered_without_mention() {
    let h = harness(ScriptedService::ok("Sure."), RecordingTransport::default());
    let mut msg = message(14, "can you elaborate?");
    msg.reply_to = Some(ReplyRef {
        message_id: 9,
        sender: Some(UserIdentity {
            id: 42,
            display_name: "Relay".to_string(),
            handle: Some("mybot".to_string()),
            is_bot: true,
        }),
    });
    assert_eq!(h.dispatcher.handle(&msg).await, Handled::Answered);
    assert_eq!(*h.relay_queries(), vec!["can you elaborate?".to_string()]);
}

#[tokio::test]
async fn typing_failure_is_ignored() {
    let transport = RecordingTransport {
        fail_typing: true,
        ..Default::default()
    };
    let h = harness(ScriptedService::ok("still here"), transport);
    assert_eq!(h.dispatcher.handle(&message(15, "/ask hi")).await, Handled::Answered);
    assert_eq!(h.replies(), vec![(target(15), "still here".to_string())]);
}

#[tokio::test]
async fn run_processes_queue_until_closed() {
    for concurrent in [false, true] {
        let h = harness(ScriptedService::ok("ok"), RecordingTransport::default());
        let (tx, rx) = mpsc::channel(8);
        let run = tokio::spawn(h.dispatcher.clone().run(rx, concurrent));
        tx.send(message(1, "nobody asked")).await.unwrap();
        tx.send(message(2, "/ask one")).await.unwrap();
        tx.send(message(3, "@mybot two")).await.unwrap();
        drop(tx);
        run.await.unwrap();

        let mut ids: Vec<i64> = h.replies().iter().map(|(t, _)| t.message_id).collect();
        ids.sort();
        assert_eq!(ids, vec![2, 3]);
    }
}

#[tokio::test]
async fn run_waits_for_slow_concurrent_messages() {
    let h = harness_with_timeout(
        ScriptedService::with(Reply::Hang),
        RecordingTransport::default(),
        Duration::from_millis(100),
    );
    let (tx, rx) = mpsc::channel(8);
    let run = tokio::spawn(h.dispatcher.clone().run(rx, true));
    tx.send(message(30, "/ask slow")).await.unwrap();
    tx.send(message(31, "/ask slower")).await.unwrap();
    drop(tx);
    run.await.unwrap();

    let mut sent = h.replies();
    sent.sort_by_key(|(t, _)| t.message_id);
    assert_eq!(
        sent,
        vec![(target(30), replies().apology), (target(31), replies().apology)]
    );
}

#[tokio::test]
async fn stalled_typing_does_not_block_the_reply() {
    let transport = RecordingTransport {
        hang_typing: true,
        ..Default::default()
    };
    let h = harness(ScriptedService::ok("answer"), transport);
    let out = tokio::time::timeout(Duration::from_secs(3), h.dispatcher.handle(&message(20, "/ask hi")))
        .await
        .expect("handle must not wait on the typing indicator");
    assert_eq!(out, Handled::Answered);
    assert_eq!(*h.relay_queries(), vec!["hi".to_string()]);
    assert_eq!(h.replies(), vec![(target(20), "answer".to_string())]);
}

#[tokio::test]
async fn completion_timeout_sends_apology_in_thread() {
    let h = harness_with_timeout(
        ScriptedService::with(Reply::Hang),
        RecordingTransport::default(),
        Duration::from_millis(50),
    );
    let out = h.dispatcher.handle(&message(21, "@mybot are you there?")).await;
    assert_eq!(out, Handled::Apologized);
    assert_eq!(h.replies(), vec![(target(21), replies().apology)]);
}

#[tokio::test]
async fn rejected_answer_falls_back_to_apology() {
    let transport = RecordingTransport {
        max_reply_chars: Some(40),
        ..Default::default()
    };
    let long_answer = "word ".repeat(100);
    let h = harness(ScriptedService::ok(&long_answer), transport);
    let out = h.dispatcher.handle(&message(22, "/ask write an essay")).await;
    assert_eq!(out, Handled::Apologized);
    assert_eq!(h.replies(), vec![(target(22), replies().apology)]);
}
