//! Address Book conversation records.

use chrono::{DateTime, Utc};

use super::chat_id::ChatId;

/// A registered conversation: the durable mapping from a chat id to the
/// folder its turns are dispatched into, plus the metadata the Router and
/// Worker Pool need without touching the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// The chat id this record answers for.
    pub chat_id: ChatId,
    /// Folder name workers for this conversation are rooted in.
    pub folder: String,
    /// Human-readable label shown in snapshots and logs.
    pub display_name: Option<String>,
    /// Capability flags inherited by every chat id sharing this folder
    /// (e.g. `"schedule"`, `"bookmark"`, `"voice"`).
    pub capabilities: Vec<String>,
    /// Trigger token matched against inbound text (e.g. `"Andy"` for the
    /// `^@Andy\b` gate). Empty means every message routes.
    pub trigger_token: String,
    /// Whether inbound text must match the trigger token to be routed.
    pub requires_trigger: bool,
    /// Optional worker spawn override (extra mounts, extra env), passed
    /// through to the Worker Pool untouched.
    pub container_overrides: Option<serde_json::Value>,
    /// Whether this is the operator's main conversation. Main-conversation
    /// tool requests may affect any other conversation's tasks or address
    /// book entries.
    pub is_main: bool,
    /// Whether this record was created by the auto-registration path
    /// rather than an explicit `register_group` tool call.
    pub auto_registered: bool,
    /// When this record was first created.
    pub created_at: DateTime<Utc>,
    /// Last time a turn was routed to this conversation.
    pub last_active_at: DateTime<Utc>,
}

impl Conversation {
    /// Construct a freshly auto-registered conversation.
    #[must_use]
    pub fn new_auto_registered(chat_id: ChatId, folder: String) -> Self {
        let now = Utc::now();
        Self {
            chat_id,
            folder,
            display_name: None,
            capabilities: Vec::new(),
            trigger_token: String::new(),
            requires_trigger: false,
            container_overrides: None,
            is_main: false,
            auto_registered: true,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Whether this conversation carries the named capability.
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c == name)
    }
}
