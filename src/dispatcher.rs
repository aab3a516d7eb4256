//! Dispatcher — live wiring between Channels, the Router, and the Worker
//! Pool. The Router itself stays a pure decision table
//! ([`crate::router::Router`]); this module is the one place that performs
//! the Address Book lookup, applies hot-reloaded trigger policy, persists
//! auto-registration, and hands the resulting turn to the Worker Pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::channel::Channel;
use crate::models::chat_id::ChatId;
use crate::models::conversation::Conversation;
use crate::models::message::{ChatMetadata, Message};
use crate::models::task::ContextMode;
use crate::persistence::address_book_repo::AddressBookRepo;
use crate::policy::PolicyWatcher;
use crate::router::{AddressBookView, DropReason, RouteDecision, Router, RouterPolicy};
use crate::worker::{Turn, WorkerPoolHandle};

/// A one-entry [`AddressBookView`] built from a conversation already
/// fetched asynchronously, letting the synchronous `Router::route` consult
/// it without itself touching the database.
struct SingleLookup(Option<Conversation>);

impl AddressBookView for SingleLookup {
    fn lookup(&self, _chat_id: &ChatId) -> Option<Conversation> {
        self.0.clone()
    }
}

/// Ties the Address Book, hot-reloaded trigger policy, and Worker Pool to
/// the live `Channel` instances. Shared via `Arc` across every channel's
/// `on_message` callback, since those callbacks are plain synchronous
/// closures and each one spawns its own handling task.
pub struct Dispatcher {
    address_book: AddressBookRepo,
    policy: Arc<PolicyWatcher>,
    pool: WorkerPoolHandle,
    recent_ids: Mutex<VecDeque<(String, Instant)>>,
}

/// Re-delivery of the same (chat-id, message-id) pair within this window
/// is treated as a no-op rather than a second enqueued turn.
const DEDUP_WINDOW: Duration = Duration::from_secs(120);
/// Upper bound on the dedup ring, independent of the time window, so a
/// burst of unique ids can't grow it unbounded.
const DEDUP_CAPACITY: usize = 1024;

impl Dispatcher {
    /// Build a dispatcher from its already-constructed collaborators.
    #[must_use]
    pub fn new(
        address_book: AddressBookRepo,
        policy: Arc<PolicyWatcher>,
        pool: WorkerPoolHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            address_book,
            policy,
            pool,
            recent_ids: Mutex::new(VecDeque::new()),
        })
    }

    /// Register this dispatcher's inbound callbacks on every channel. Each
    /// invocation spawns a detached task so one slow Address Book write
    /// never blocks a channel's own poll or socket-mode read loop.
    pub fn attach(self: &Arc<Self>, channels: &[Arc<dyn Channel>]) {
        for channel in channels {
            let this = Arc::clone(self);
            channel.on_message(Box::new(move |message| {
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    this.handle_inbound(message).await;
                });
            }));

            let this = Arc::clone(self);
            channel.on_chat_metadata(Box::new(move |metadata| {
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    this.handle_chat_metadata(metadata).await;
                });
            }));
        }
    }

    /// Refresh a conversation's display name from out-of-band chat
    /// metadata. Never registers a new conversation — only `handle_inbound`
    /// (via auto-registration) does that.
    async fn handle_chat_metadata(&self, metadata: ChatMetadata) {
        let Some(display_name) = metadata.display_name else {
            return;
        };

        match self.address_book.get(&metadata.chat_id).await {
            Ok(Some(_)) => {
                if let Err(err) = self
                    .address_book
                    .update_display_name(&metadata.chat_id, &display_name)
                    .await
                {
                    warn!(%err, chat_id = %metadata.chat_id, "failed to update display name from chat metadata");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%err, chat_id = %metadata.chat_id, "address book lookup failed while applying chat metadata");
            }
        }
    }

    async fn handle_inbound(&self, message: Message) {
        if self.is_duplicate(&message).await {
            info!(
                chat_id = %message.chat_id,
                message_id = %message.id,
                "dropped re-delivered inbound message"
            );
            return;
        }

        let conversation = match self.address_book.get(&message.chat_id).await {
            Ok(conversation) => conversation,
            Err(err) => {
                warn!(%err, chat_id = %message.chat_id, "address book lookup failed; dropping message");
                return;
            }
        };

        let policy = self.policy.current().await;
        let router = Router::new(RouterPolicy {
            auto_register_signal: policy.auto_register.signal,
            auto_register_slack: policy.auto_register.slack,
        });

        let book = SingleLookup(conversation);
        match router.route(&message, &book) {
            RouteDecision::Drop(reason) => {
                if reason != DropReason::SelfEcho {
                    info!(chat_id = %message.chat_id, ?reason, "dropped inbound message");
                }
                return;
            }
            RouteDecision::AutoRegister { folder } => {
                let fresh = Conversation::new_auto_registered(message.chat_id.clone(), folder);
                if let Err(err) = self.address_book.put(&fresh).await {
                    warn!(%err, "failed to auto-register conversation");
                    return;
                }
                info!(chat_id = %message.chat_id, folder = %fresh.folder, "auto-registered new conversation");

                let book = SingleLookup(Some(fresh));
                if let RouteDecision::Enqueue { folder, payload } = router.route(&message, &book) {
                    self.enqueue(&message, folder, payload, &book).await;
                }
            }
            RouteDecision::Enqueue { folder, payload } => {
                self.enqueue(&message, folder, payload, &book).await;
            }
        }

        if let Err(err) = self.address_book.update_last_seen(&message.chat_id).await {
            warn!(%err, "failed to update last_active_at");
        }
    }

    /// Checks and records `message.id` against a short rolling window,
    /// keyed by (chat id, message id) so two transports can't collide on
    /// the same raw id. Not persisted — a restart forgets the window,
    /// matching the outbound queue's own "restarts start fresh" stance.
    async fn is_duplicate(&self, message: &Message) -> bool {
        let key = format!("{}:{}", message.chat_id, message.id);
        let now = Instant::now();
        let mut recent = self.recent_ids.lock().await;

        while let Some((_, seen_at)) = recent.front() {
            if now.duration_since(*seen_at) > DEDUP_WINDOW {
                recent.pop_front();
            } else {
                break;
            }
        }

        if recent.iter().any(|(seen, _)| *seen == key) {
            return true;
        }

        recent.push_back((key, now));
        if recent.len() > DEDUP_CAPACITY {
            recent.pop_front();
        }
        false
    }

    async fn enqueue(&self, message: &Message, folder: String, payload: String, book: &SingleLookup) {
        let Some(conversation) = book.0.clone() else {
            warn!(%folder, "route decided to enqueue without a backing conversation");
            return;
        };

        let turn = Turn {
            chat_id: message.chat_id.clone(),
            folder,
            payload,
            is_main: conversation.is_main,
            capabilities: conversation.capabilities,
            context_mode: ContextMode::Inherit,
            container_overrides: conversation.container_overrides,
        };

        if let Err(err) = self.pool.enqueue(turn).await {
            warn!(%err, "failed to enqueue turn");
        }
    }
}
