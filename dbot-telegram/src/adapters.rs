//! Adapters from Telegram (teloxide) types to dbot_core types.
//! Depends only on teloxide and dbot_core type definitions.

use dbot_core::{Chat, IncomingMessage, ToCoreUpdate, ToCoreUser, Update, User};
use teloxide::types::UpdateKind;

/// Wraps a teloxide User for conversion to core [`User`].
pub struct TelegramUserWrapper<'a>(pub &'a teloxide::types::User);

impl<'a> ToCoreUser for TelegramUserWrapper<'a> {
    fn to_core(&self) -> User {
        User {
            id: self.0.id.0 as i64,
            username: self.0.username.clone(),
            first_name: Some(self.0.first_name.clone()),
            last_name: self.0.last_name.clone(),
        }
    }
}

/// Wraps a teloxide Update for conversion to core [`Update`]. Updates that carry no message (or a
/// channel post) keep their id with `message: None` so the poll cursor still advances past them.
pub struct TelegramUpdateWrapper<'a>(pub &'a teloxide::types::Update);

impl<'a> ToCoreUpdate for TelegramUpdateWrapper<'a> {
    fn to_core(&self) -> Update {
        let message = match &self.0.kind {
            UpdateKind::Message(m) => Some(convert_message(m)),
            _ => None,
        };
        Update {
            update_id: i64::from(self.0.id.0),
            message,
        }
    }
}

fn convert_message(message: &teloxide::types::Message) -> IncomingMessage {
    IncomingMessage {
        message_id: i64::from(message.id.0),
        chat: Chat {
            id: message.chat.id.0,
            chat_type: chat_type(&message.chat).to_string(),
        },
        from: message.from.as_ref().map(|u| TelegramUserWrapper(u).to_core()),
        text: message.text().map(str::to_string),
        date: message.date,
    }
}

fn chat_type(chat: &teloxide::types::Chat) -> &'static str {
    if chat.is_private() {
        "private"
    } else if chat.is_supergroup() {
        "supergroup"
    } else if chat.is_group() {
        "group"
    } else if chat.is_channel() {
        "channel"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Test: TelegramUserWrapper converts teloxide User to core User with correct id, username, first_name, last_name.**
    #[test]
    fn test_telegram_user_wrapper_to_core() {
        let user = teloxide::types::User {
            id: teloxide::types::UserId(123),
            is_bot: false,
            first_name: "Test".to_string(),
            last_name: Some("User".to_string()),
            username: Some("testuser".to_string()),
            language_code: Some("en".to_string()),
            is_premium: false,
            added_to_attachment_menu: false,
        };

        let wrapper = TelegramUserWrapper(&user);
        let core_user = wrapper.to_core();

        assert_eq!(core_user.id, 123);
        assert_eq!(core_user.username, Some("testuser".to_string()));
        assert_eq!(core_user.first_name, Some("Test".to_string()));
        assert_eq!(core_user.last_name, Some("User".to_string()));
    }

    fn parse_update(json: &str) -> teloxide::types::Update {
        serde_json::from_str(json).unwrap()
    }

    /// **Test: A private text message update keeps id, chat, sender and text.**
    #[test]
    fn test_telegram_update_wrapper_text_message() {
        let update = parse_update(
            r#"{
                "update_id": 100,
                "message": {
                    "message_id": 7,
                    "date": 1700000000,
                    "chat": { "id": 456, "type": "private", "first_name": "Test" },
                    "from": { "id": 123, "is_bot": false, "first_name": "Test", "username": "test_user" },
                    "text": "hello"
                }
            }"#,
        );
        assert!(matches!(update.kind, UpdateKind::Message(_)));

        let core = TelegramUpdateWrapper(&update).to_core();

        assert_eq!(core.update_id, 100);
        assert_eq!(core.text(), Some("hello"));
        let message = core.message.unwrap();
        assert_eq!(message.message_id, 7);
        assert_eq!(message.chat_id(), 456);
        assert_eq!(message.chat.chat_type, "private");
        assert_eq!(message.sender_id(), Some(123));
        assert_eq!(message.date.timestamp(), 1700000000);
    }

    /// **Test: A channel post update keeps its id with no message.**
    #[test]
    fn test_telegram_update_wrapper_channel_post() {
        let update = parse_update(
            r#"{
                "update_id": 101,
                "channel_post": {
                    "message_id": 8,
                    "date": 1700000000,
                    "chat": { "id": -100123, "type": "channel", "title": "News" },
                    "text": "post"
                }
            }"#,
        );
        assert!(matches!(update.kind, UpdateKind::ChannelPost(_)));

        let core = TelegramUpdateWrapper(&update).to_core();

        assert_eq!(core.update_id, 101);
        assert!(core.message.is_none());
    }
}
