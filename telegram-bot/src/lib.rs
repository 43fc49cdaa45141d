//! # Telegram bot client
//!
//! Process-wide [`TelegramBot`] facade over a FIFO outbound queue and a long-poll receiver.
//! Settings and the teloxide transport come from dbot-telegram, the handler registry from
//! handler-registry, core types from dbot-core.

pub mod facade;
pub mod outbound;
pub mod poller;
pub mod signal;
pub mod text;

pub use facade::{BotState, TelegramBot};
pub use outbound::{Delivery, OutboundQueue};
pub use poller::{InboundPoller, PollerState};
pub use signal::StopSignal;
pub use text::join_url;

// Re-export core (from dbot-core)
pub use dbot_core::{
    handler_fn, init_tracing, Chat, DbotError, HandlerError, IncomingMessage, MessageHandler,
    MessageId, OutboundRequest, ParseMode, Result, Target, Transport, TransportError, Update,
    User,
};

// Re-export settings (from dbot-telegram)
pub use dbot_telegram::{EnvSource, Settings, SettingsBuilder, TelegramTransport};
