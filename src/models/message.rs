//! Normalized inbound message representation.

use chrono::{DateTime, Utc};

use super::chat_id::ChatId;

/// A channel-normalized inbound message, after self-echo/subtype dropping
/// and mention-stripping but before the Router has made a routing
/// decision. Never persisted — only the folder it resolves to and the
/// worker's own storage outlive the turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Transport-supplied message identifier, used to deduplicate
    /// re-delivered inbound messages within a short window. Derived from
    /// whatever stable id the transport provides (Signal's envelope
    /// timestamp, Slack's message `ts`); never reused across messages.
    pub id: String,
    /// Chat id the message arrived on.
    pub chat_id: ChatId,
    /// Sender identifier, transport-specific (phone number or user id).
    pub sender_id: String,
    /// Message body with channel-specific mention syntax stripped.
    pub body: String,
    /// Timestamp the channel reported for the message.
    pub received_at: DateTime<Utc>,
    /// Whether this message originated from the bot's own account
    /// (already filtered before reaching the Router, kept for logging).
    pub is_self_echo: bool,
}

/// Out-of-band chat metadata a channel observes alongside (or independent
/// of) an inbound message — raised via [`super::super::channel::Channel`]'s
/// `on_chat_metadata` callback so the Address Book can keep a
/// conversation's display name and group/direct classification current
/// without waiting for a message body.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMetadata {
    /// Chat id this metadata describes.
    pub chat_id: ChatId,
    /// When the channel observed this metadata.
    pub observed_at: DateTime<Utc>,
    /// Human-readable name, if the transport reports one.
    pub display_name: Option<String>,
    /// Short transport name (`"signal"`, `"slack"`), matching
    /// [`super::super::channel::Channel::name`].
    pub transport_tag: &'static str,
    /// Whether this chat id addresses a group/channel rather than a 1:1
    /// conversation.
    pub is_group: bool,
}
