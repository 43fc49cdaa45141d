//! Core types: user, chat, inbound update, outbound request, parse mode, and the conversion traits
//! transports implement to produce them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DbotError;

/// User identity (id, username, names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Chat (channel, group or private) identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub chat_type: String,
}

/// Message carried by an inbound update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: Chat,
    /// Sender; absent for anonymous admins and channel posts.
    pub from: Option<User>,
    pub text: Option<String>,
    pub date: DateTime<Utc>,
}

impl IncomingMessage {
    /// Chat id to reply to.
    pub fn chat_id(&self) -> i64 {
        self.chat.id
    }

    /// Sender id, if the message has a sender.
    pub fn sender_id(&self) -> Option<i64> {
        self.from.as_ref().map(|u| u.id)
    }
}

/// One inbound event returned by polling. `update_id` increases monotonically and doubles as the
/// delivery cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

impl Update {
    /// Text of the carried message, if any.
    pub fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.text.as_deref())
    }
}

/// Id of a message accepted by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Text formatting mode passed through to the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParseMode {
    #[default]
    Html,
    Markdown,
    MarkdownV2,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
            ParseMode::Markdown => "Markdown",
            ParseMode::MarkdownV2 => "MarkdownV2",
        }
    }
}

impl fmt::Display for ParseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseMode {
    type Err = DbotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(ParseMode::Html),
            "markdown" => Ok(ParseMode::Markdown),
            "markdownv2" => Ok(ParseMode::MarkdownV2),
            other => Err(DbotError::config(format!("Unknown parse mode: {}", other))),
        }
    }
}

/// Destination of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The configured broadcast channel.
    Channel,
    /// A specific chat (user, group).
    Chat(i64),
}

/// One queued outbound message. Consumed exactly once by the send worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub target: Target,
    pub text: String,
    /// Overrides the configured parse mode when set.
    pub parse_mode: Option<ParseMode>,
}

impl OutboundRequest {
    pub fn to_channel(text: impl Into<String>) -> Self {
        Self {
            target: Target::Channel,
            text: text.into(),
            parse_mode: None,
        }
    }

    pub fn to_chat(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            target: Target::Chat(chat_id),
            text: text.into(),
            parse_mode: None,
        }
    }

    pub fn with_parse_mode(mut self, parse_mode: ParseMode) -> Self {
        self.parse_mode = Some(parse_mode);
        self
    }
}

/// Converts a transport-specific user type to core [`User`].
pub trait ToCoreUser: Send + Sync {
    fn to_core(&self) -> User;
}

/// Converts a transport-specific update type to core [`Update`].
pub trait ToCoreUpdate: Send + Sync {
    fn to_core(&self) -> Update;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_from_str_is_case_insensitive() {
        assert_eq!("HTML".parse::<ParseMode>().unwrap(), ParseMode::Html);
        assert_eq!("markdown".parse::<ParseMode>().unwrap(), ParseMode::Markdown);
        assert_eq!(" MarkdownV2 ".parse::<ParseMode>().unwrap(), ParseMode::MarkdownV2);
    }

    #[test]
    fn test_parse_mode_unknown_is_config_error() {
        let err = "bbcode".parse::<ParseMode>().unwrap_err();
        assert!(matches!(err, DbotError::Config(_)));
    }

    #[test]
    fn test_outbound_request_builders() {
        let req = OutboundRequest::to_chat(42, "hi").with_parse_mode(ParseMode::MarkdownV2);
        assert_eq!(req.target, Target::Chat(42));
        assert_eq!(req.text, "hi");
        assert_eq!(req.parse_mode, Some(ParseMode::MarkdownV2));
        assert_eq!(OutboundRequest::to_channel("x").target, Target::Channel);
    }

    #[test]
    fn test_update_text_and_sender() {
        let update = Update {
            update_id: 1,
            message: Some(IncomingMessage {
                message_id: 10,
                chat: Chat {
                    id: 5,
                    chat_type: "private".to_string(),
                },
                from: Some(User {
                    id: 5,
                    username: None,
                    first_name: Some("A".to_string()),
                    last_name: None,
                }),
                text: Some("ping".to_string()),
                date: Utc::now(),
            }),
        };
        assert_eq!(update.text(), Some("ping"));
        let message = update.message.as_ref().unwrap();
        assert_eq!(message.sender_id(), Some(5));
        assert_eq!(message.chat_id(), 5);

        let empty = Update {
            update_id: 2,
            message: None,
        };
        assert_eq!(empty.text(), None);
    }
}
