use std::sync::{Arc, Mutex};

use dispatcher::channel::{Channel, OnChatMetadata, OnMessage};
use dispatcher::config::{AutoRegisterConfig, TriggerConfig};
use dispatcher::dispatcher::Dispatcher;
use dispatcher::models::chat_id::{ChatId, Transport};
use dispatcher::models::message::Message;
use dispatcher::persistence::address_book_repo::AddressBookRepo;
use dispatcher::persistence::db;
use dispatcher::persistence::session_repo::SessionRepo;
use dispatcher::policy::PolicyWatcher;
use dispatcher::worker;
use dispatcher::Result;

/// An in-process `Channel` whose only job is to let the test fire a
/// callback the same way a real transport's poll loop would, and record
/// whatever it tried to send back.
struct FakeChannel {
    callback: Mutex<Option<OnMessage>>,
    sent: Mutex<Vec<(ChatId, String)>>,
}

impl FakeChannel {
    fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    #[allow(clippy::unwrap_used)]
    fn fire(&self, message: Message) {
        let guard = self.callback.lock().unwrap();
        if let Some(callback) = guard.as_ref() {
            callback(message);
        }
    }
}

#[async_trait::async_trait]
impl Channel for FakeChannel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn transport(&self) -> Transport {
        Transport::Signal
    }

    async fn send(&self, chat_id: &ChatId, body: &str) -> Result<()> {
        #[allow(clippy::unwrap_used)]
        self.sent.lock().unwrap().push((chat_id.clone(), body.to_owned()));
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    fn on_message(&self, callback: OnMessage) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    fn on_chat_metadata(&self, _callback: OnChatMetadata) {}
}

fn message(chat_id: &str, body: &str) -> Message {
    Message {
        id: "msg-1".into(),
        chat_id: ChatId::parse(chat_id).expect("valid chat id"),
        sender_id: "sender".into(),
        body: body.into(),
        received_at: chrono::Utc::now(),
        is_self_echo: false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn an_unknown_signal_sender_is_auto_registered_and_enqueued() {
    let db = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let address_book = AddressBookRepo::new(Arc::clone(&db));
    let sessions = SessionRepo::new(Arc::clone(&db));

    let config = dispatcher::config::WorkerConfig {
        host_cli: "true".into(),
        host_cli_args: Vec::new(),
        pool_size: 1,
        idle_reap_seconds: 60,
        startup_timeout_seconds: 1,
        turn_timeout_seconds: 5,
    };
    let ipc_root = std::env::temp_dir().join(format!("dispatcher-test-{}", uuid::Uuid::new_v4()));
    let fake_channel = Arc::new(FakeChannel::new());
    let channels: Vec<Arc<dyn Channel>> = vec![Arc::clone(&fake_channel) as Arc<dyn Channel>];
    let pool = worker::spawn_pool(config, ipc_root, channels.clone(), sessions);

    let policy = Arc::new(PolicyWatcher::static_policy(TriggerConfig {
        pattern: String::new(),
        auto_register: AutoRegisterConfig {
            signal: true,
            slack: false,
        },
    }));

    let dispatcher = Dispatcher::new(address_book.clone(), policy, pool);
    dispatcher.attach(&channels);

    let chat_id = ChatId::parse("sig:+15551234567").expect("valid");
    fake_channel.fire(message(chat_id.as_str(), "hello there"));

    let registered = wait_for_registration(&address_book, &chat_id).await;
    assert_eq!(registered.folder, "auto-sig");
    assert!(registered.auto_registered);

    // The worker pool's "true" stand-in exits before emitting a result
    // line, so no reply ever reaches the channel's outbound send.
    #[allow(clippy::unwrap_used)]
    assert!(fake_channel.sent.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn redelivering_the_same_message_id_is_a_no_op() {
    let db = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let address_book = AddressBookRepo::new(Arc::clone(&db));
    let sessions = SessionRepo::new(Arc::clone(&db));

    let config = dispatcher::config::WorkerConfig {
        host_cli: "true".into(),
        host_cli_args: Vec::new(),
        pool_size: 1,
        idle_reap_seconds: 60,
        startup_timeout_seconds: 1,
        turn_timeout_seconds: 5,
    };
    let ipc_root = std::env::temp_dir().join(format!("dispatcher-test-{}", uuid::Uuid::new_v4()));
    let fake_channel = Arc::new(FakeChannel::new());
    let channels: Vec<Arc<dyn Channel>> = vec![Arc::clone(&fake_channel) as Arc<dyn Channel>];
    let pool = worker::spawn_pool(config, ipc_root, channels.clone(), sessions);

    let policy = Arc::new(PolicyWatcher::static_policy(TriggerConfig {
        pattern: String::new(),
        auto_register: AutoRegisterConfig {
            signal: true,
            slack: false,
        },
    }));

    let dispatcher = Dispatcher::new(address_book.clone(), policy, pool);
    dispatcher.attach(&channels);

    let chat_id = ChatId::parse("sig:+15551234567").expect("valid");
    fake_channel.fire(message(chat_id.as_str(), "hello there"));
    wait_for_registration(&address_book, &chat_id).await;

    // Let the first message's own `update_last_seen` settle before taking
    // the baseline, so the assertion below isolates the duplicate's effect.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let first_last_active = address_book
        .get(&chat_id)
        .await
        .expect("lookup")
        .expect("conversation registered")
        .last_active_at;

    // Re-deliver the identical (chat-id, message-id) pair. If it were
    // routed again it would re-stamp last_active_at; instead it must be
    // dropped before the Address Book is ever touched a second time.
    fake_channel.fire(message(chat_id.as_str(), "hello there"));
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let after = address_book
        .get(&chat_id)
        .await
        .expect("lookup")
        .expect("conversation still registered");
    assert_eq!(after.last_active_at, first_last_active);
}

async fn wait_for_registration(
    address_book: &AddressBookRepo,
    chat_id: &ChatId,
) -> dispatcher::models::conversation::Conversation {
    for _ in 0..50 {
        if let Ok(Some(conversation)) = address_book.get(chat_id).await {
            return conversation;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("conversation was never auto-registered");
}
