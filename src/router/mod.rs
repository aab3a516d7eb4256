//! Router — the pure inbound-message decision table.
//!
//! `Router::route` takes a normalized [`Message`] plus a read-only view of
//! the Address Book and returns a [`RouteDecision`] without touching the
//! database or the Worker Pool itself; the live `Dispatcher` wires the
//! decision to actual I/O. This split keeps the decision table unit
//! testable with a fake `AddressBookView`.

use regex::Regex;

use crate::models::chat_id::{ChatId, Transport};
use crate::models::conversation::Conversation;
use crate::models::message::Message;

/// Read-only Address Book access the Router needs. Implemented by the live
/// repository and by in-memory fakes in tests.
pub trait AddressBookView {
    /// Look up the conversation registered for `chat_id`, if any.
    fn lookup(&self, chat_id: &ChatId) -> Option<Conversation>;
}

/// Why an inbound message was dropped rather than routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The message originated from the bot's own account.
    SelfEcho,
    /// No conversation is registered and auto-registration is disabled for
    /// this transport.
    UnknownNoPolicy,
    /// A conversation exists but requires a trigger prefix the message
    /// text did not contain.
    TriggerMismatch,
}

/// The Router's verdict for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Drop the message without enqueuing a turn.
    Drop(DropReason),
    /// Auto-register a brand-new conversation before falling through to
    /// the trigger/enqueue steps. Carries the template folder to create.
    AutoRegister {
        /// Folder the new conversation should be created under.
        folder: String,
    },
    /// Route a turn to the Worker Pool.
    Enqueue {
        /// Folder the turn is scoped to.
        folder: String,
        /// Message text, with any matched trigger prefix stripped.
        payload: String,
    },
}

/// Per-transport auto-registration policy and trigger configuration
/// consulted by the decision table. Mirrors `config::AutoRegisterConfig`
/// without depending on the config module directly, keeping the Router
/// free of I/O concerns.
#[derive(Debug, Clone)]
pub struct RouterPolicy {
    /// Whether unknown Signal senders are auto-registered.
    pub auto_register_signal: bool,
    /// Whether unknown Slack channels are auto-registered.
    pub auto_register_slack: bool,
}

/// Stateless router over one compiled global trigger pattern plus the
/// per-conversation `requires_trigger`/`trigger_token` fields.
#[derive(Clone)]
pub struct Router {
    policy: RouterPolicy,
}

impl Router {
    /// Build a router from policy. The trigger regex itself is compiled
    /// per-conversation in [`Self::route`] from each conversation's own
    /// trigger token, since tokens differ per folder.
    #[must_use]
    pub fn new(policy: RouterPolicy) -> Self {
        Self { policy }
    }

    fn auto_register_enabled(&self, transport: Transport) -> bool {
        match transport {
            Transport::Signal => self.policy.auto_register_signal,
            Transport::Slack => self.policy.auto_register_slack,
            Transport::Voice => false,
        }
    }

    /// Decide what to do with one normalized inbound message.
    ///
    /// Steps 1-3 of the decision table are evaluated here; step 2's
    /// auto-registration is only *signaled* (the caller performs the
    /// Address Book write and re-invokes `route` with the now-registered
    /// conversation, matching "insert... fall through").
    pub fn route(&self, message: &Message, book: &impl AddressBookView) -> RouteDecision {
        if message.is_self_echo {
            return RouteDecision::Drop(DropReason::SelfEcho);
        }

        let Some(conversation) = book.lookup(&message.chat_id) else {
            if self.auto_register_enabled(message.chat_id.transport()) {
                return RouteDecision::AutoRegister {
                    folder: template_folder(message.chat_id.transport()),
                };
            }
            return RouteDecision::Drop(DropReason::UnknownNoPolicy);
        };

        self.route_registered(message, &conversation)
    }

    fn route_registered(&self, message: &Message, conversation: &Conversation) -> RouteDecision {
        if !conversation.requires_trigger {
            return RouteDecision::Enqueue {
                folder: conversation.folder.clone(),
                payload: message.body.clone(),
            };
        }

        let pattern = format!(r"(?i)^@{}\b", regex::escape(&conversation.trigger_token));
        let Ok(re) = Regex::new(&pattern) else {
            return RouteDecision::Drop(DropReason::TriggerMismatch);
        };

        match re.find(&message.body) {
            Some(m) => RouteDecision::Enqueue {
                folder: conversation.folder.clone(),
                payload: message.body[m.end()..].trim_start().to_owned(),
            },
            None => RouteDecision::Drop(DropReason::TriggerMismatch),
        }
    }
}

/// The default folder template used for a newly auto-registered
/// conversation, before the operator renames it.
fn template_folder(transport: Transport) -> String {
    format!("auto-{transport}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    struct FakeBook(HashMap<String, Conversation>);

    impl AddressBookView for FakeBook {
        fn lookup(&self, chat_id: &ChatId) -> Option<Conversation> {
            self.0.get(chat_id.as_str()).cloned()
        }
    }

    fn message(chat_id: &str, body: &str) -> Message {
        Message {
            id: "test-msg".into(),
            chat_id: ChatId::parse(chat_id).expect("valid chat id"),
            sender_id: "sender".into(),
            body: body.to_owned(),
            received_at: Utc::now(),
            is_self_echo: false,
        }
    }

    fn conversation(folder: &str, requires_trigger: bool, trigger_token: &str) -> Conversation {
        let mut c = Conversation::new_auto_registered(
            ChatId::parse("sig:+15551234567").expect("valid"),
            folder.to_owned(),
        );
        c.requires_trigger = requires_trigger;
        c.trigger_token = trigger_token.to_owned();
        c
    }

    #[test]
    fn self_echo_is_dropped() {
        let router = Router::new(RouterPolicy {
            auto_register_signal: false,
            auto_register_slack: false,
        });
        let mut msg = message("sig:+15551234567", "hello");
        msg.is_self_echo = true;
        let book = FakeBook(HashMap::new());

        assert_eq!(
            router.route(&msg, &book),
            RouteDecision::Drop(DropReason::SelfEcho)
        );
    }

    #[test]
    fn unknown_chat_with_no_policy_is_dropped() {
        let router = Router::new(RouterPolicy {
            auto_register_signal: false,
            auto_register_slack: false,
        });
        let msg = message("sig:+15551234567", "hello");
        let book = FakeBook(HashMap::new());

        assert_eq!(
            router.route(&msg, &book),
            RouteDecision::Drop(DropReason::UnknownNoPolicy)
        );
    }

    #[test]
    fn unknown_chat_with_policy_signals_auto_register() {
        let router = Router::new(RouterPolicy {
            auto_register_signal: true,
            auto_register_slack: false,
        });
        let msg = message("sig:+15551234567", "hello");
        let book = FakeBook(HashMap::new());

        assert_eq!(
            router.route(&msg, &book),
            RouteDecision::AutoRegister {
                folder: "auto-sig".into()
            }
        );
    }

    #[test]
    fn trigger_gate_drops_non_matching_text() {
        let router = Router::new(RouterPolicy {
            auto_register_signal: false,
            auto_register_slack: false,
        });
        let mut book = HashMap::new();
        book.insert(
            "sig:+15551234567".to_owned(),
            conversation("andy", true, "Andy"),
        );
        let book = FakeBook(book);

        let msg = message("sig:+15551234567", "hi there");
        assert_eq!(
            router.route(&msg, &book),
            RouteDecision::Drop(DropReason::TriggerMismatch)
        );
    }

    #[test]
    fn trigger_gate_strips_matched_prefix() {
        let router = Router::new(RouterPolicy {
            auto_register_signal: false,
            auto_register_slack: false,
        });
        let mut book = HashMap::new();
        book.insert(
            "sig:+15551234567".to_owned(),
            conversation("andy", true, "Andy"),
        );
        let book = FakeBook(book);

        let msg = message("sig:+15551234567", "@Andy ping");
        assert_eq!(
            router.route(&msg, &book),
            RouteDecision::Enqueue {
                folder: "andy".into(),
                payload: "ping".into(),
            }
        );
    }

    #[test]
    fn no_trigger_required_routes_every_message() {
        let router = Router::new(RouterPolicy {
            auto_register_signal: false,
            auto_register_slack: false,
        });
        let mut book = HashMap::new();
        book.insert(
            "sig:+15551234567".to_owned(),
            conversation("andy", false, ""),
        );
        let book = FakeBook(book);

        let msg = message("sig:+15551234567", "anything at all");
        assert_eq!(
            router.route(&msg, &book),
            RouteDecision::Enqueue {
                folder: "andy".into(),
                payload: "anything at all".into(),
            }
        );
    }
}
