//! # dbot-core
//!
//! Core types and traits for the Telegram bot client: [`Transport`], [`MessageHandler`], update and
//! outbound request types, the error taxonomy, and tracing initialization. Transport-agnostic; used
//! by handler-registry, dbot-telegram and telegram-bot.

pub mod error;
pub mod handler;
pub mod logger;
pub mod transport;
pub mod types;

pub use error::{DbotError, HandlerError, Result, TransportError};
pub use handler::{handler_fn, same_handler, MessageHandler};
pub use logger::{init_tracing, DEFAULT_LOG_FILTER};
#[cfg(feature = "mock")]
pub use transport::MockTransport;
pub use transport::Transport;
pub use types::{
    Chat, IncomingMessage, MessageId, OutboundRequest, ParseMode, Target, ToCoreUpdate,
    ToCoreUser, Update, User,
};
