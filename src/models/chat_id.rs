//! Chat identifier parsing and validation.

use std::fmt;

use crate::{AppError, Result};

/// The transport a [`ChatId`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// The Signal JSON-RPC daemon.
    Signal,
    /// A Slack workspace.
    Slack,
    /// The loopback voice HTTP endpoint.
    Voice,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => write!(f, "sig"),
            Self::Slack => write!(f, "slack"),
            Self::Voice => write!(f, "voice"),
        }
    }
}

/// A validated chat identifier: `sig:<e164>`, `sig:group:<id>`,
/// `slack:<user>`, `slack:<ns>:channel:<id>`, or `voice:session`.
///
/// The raw string is kept canonical (lowercase prefix, no surrounding
/// whitespace) so it can be used directly as an Address Book key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChatId(String);

impl ChatId {
    /// Parse and validate a raw chat id against the transport grammar.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ToolValidation` if `raw` does not match any of
    /// the five recognized forms.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let valid = raw == "voice:session"
            || (raw.starts_with("sig:group:") && raw.len() > "sig:group:".len())
            || (raw.starts_with("sig:") && !raw.starts_with("sig:group:") && raw.len() > 4)
            || (raw.contains(":channel:") && raw.starts_with("slack:"))
            || (raw.starts_with("slack:") && !raw.contains(":channel:") && raw.len() > 6);

        if !valid {
            return Err(AppError::ToolValidation(format!(
                "chat id does not match the recognized grammar: {raw}"
            )));
        }

        Ok(Self(raw.to_owned()))
    }

    /// The transport this chat id belongs to.
    #[must_use]
    pub fn transport(&self) -> Transport {
        if self.0.starts_with("sig:") {
            Transport::Signal
        } else if self.0.starts_with("slack:") {
            Transport::Slack
        } else {
            Transport::Voice
        }
    }

    /// Whether this id addresses a group/channel conversation rather than
    /// a direct one-to-one conversation.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.0.starts_with("sig:group:") || self.0.contains(":channel:")
    }

    /// The underlying string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ChatId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ChatId> for String {
    fn from(value: ChatId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_grammar_form() {
        assert!(ChatId::parse("sig:+15551234567").is_ok());
        assert!(ChatId::parse("sig:group:abc123").is_ok());
        assert!(ChatId::parse("slack:U0123456").is_ok());
        assert!(ChatId::parse("slack:T0ABC:channel:C0123456").is_ok());
        assert!(ChatId::parse("voice:session").is_ok());
    }

    #[test]
    fn rejects_unrecognized_forms() {
        assert!(ChatId::parse("").is_err());
        assert!(ChatId::parse("sig:").is_err());
        assert!(ChatId::parse("telegram:12345").is_err());
    }

    #[test]
    fn group_detection_matches_grammar() {
        let direct = ChatId::parse("sig:+15551234567").expect("valid");
        let group = ChatId::parse("sig:group:abc123").expect("valid");
        let channel = ChatId::parse("slack:T0ABC:channel:C0123456").expect("valid");
        assert!(!direct.is_group());
        assert!(group.is_group());
        assert!(channel.is_group());
    }
}
