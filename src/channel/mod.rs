//! Channel Abstraction — a uniform transport contract over Signal and
//! Slack, plus the shared offline-send queue both implementations use.

pub mod signal;
pub mod slack;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::chat_id::ChatId;
use crate::models::message::{ChatMetadata, Message};
use crate::Result;

/// Callback invoked for every inbound message a channel has already
/// normalized (self-echo dropped, subtype dropped, mentions stripped).
pub type OnMessage = Box<dyn Fn(Message) + Send + Sync>;

/// Callback invoked whenever a channel observes chat metadata (timestamp,
/// display name, group/direct classification) for a chat id, independent
/// of whether a message body accompanied it.
pub type OnChatMetadata = Box<dyn Fn(ChatMetadata) + Send + Sync>;

/// Uniform transport contract. The Router and Worker Pool hold a
/// homogeneous `Vec<Arc<dyn Channel>>` regardless of which concrete
/// transport backs each entry.
#[async_trait]
pub trait Channel: Send + Sync {
    /// A short transport name used in logs and snapshots (`"signal"`, `"slack"`).
    fn name(&self) -> &str;

    /// Establish connectivity (daemon socket, socket-mode listener). Must
    /// be idempotent — calling `connect` on an already-connected channel
    /// is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Tear down connectivity without losing queued outbound sends.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the channel currently believes it is connected.
    fn is_connected(&self) -> bool;

    /// Whether this channel instance owns the given chat id (i.e. its
    /// transport prefix matches).
    fn owns(&self, chat_id: &ChatId) -> bool {
        chat_id.transport() == self.transport()
    }

    /// The transport this channel instance serves.
    fn transport(&self) -> crate::models::chat_id::Transport;

    /// Send `body` to `chat_id`. If the channel is disconnected the send
    /// is appended to the in-memory offline queue and flushed FIFO on the
    /// next successful `connect`.
    async fn send(&self, chat_id: &ChatId, body: &str) -> Result<()>;

    /// Register the callback invoked for every normalized inbound message.
    /// Implementations call this at most once during `connect`.
    fn on_message(&self, callback: OnMessage);

    /// Register the callback invoked whenever this channel observes chat
    /// metadata for a chat id. Implementations call this at most once,
    /// alongside `on_message`.
    fn on_chat_metadata(&self, callback: OnChatMetadata);
}

/// FIFO queue of sends accumulated while a channel is disconnected,
/// drained in order as soon as the channel reconnects.
pub struct OfflineQueue {
    queue: Mutex<VecDeque<(ChatId, String)>>,
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineQueue {
    /// Construct an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a pending send.
    #[allow(clippy::unwrap_used)] // poisoned mutex is an unrecoverable bug, not a runtime error
    pub fn push(&self, chat_id: ChatId, body: String) {
        self.queue.lock().unwrap().push_back((chat_id, body));
    }

    /// Drain every pending send, oldest first.
    #[allow(clippy::unwrap_used)]
    pub fn drain(&self) -> Vec<(ChatId, String)> {
        self.queue.lock().unwrap().drain(..).collect()
    }
}
