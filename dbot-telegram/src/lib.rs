//! # dbot-telegram
//!
//! Telegram connectivity layer: settings loaded from explicit values, the environment and `.env`,
//! a teloxide-backed [`dbot_core::Transport`], and adapters from teloxide types to core types.
//! No queueing, polling loops or lifecycle; those live in telegram-bot.

mod adapters;
mod bot_adapter;
mod config;

pub use adapters::{TelegramUpdateWrapper, TelegramUserWrapper};
pub use bot_adapter::{classify_request_error, TelegramTransport};
pub use config::{
    mask_token, EnvSource, Settings, SettingsBuilder, DEFAULT_POLL_TIMEOUT_SECS,
    DEFAULT_RETRY_DELAY_SECS, DEFAULT_SEND_DELAY_SECS, ENV_ALLOWED_USER_IDS, ENV_API_URL,
    ENV_BASE_URL, ENV_BOT_TOKEN, ENV_CHANNEL_ID, ENV_PARSE_MODE, ENV_POLL_TIMEOUT,
    ENV_RETRY_DELAY, ENV_SEND_DELAY, ENV_TELOXIDE_API_URL,
};
