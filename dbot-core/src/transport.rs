//! Transport abstraction for the remote chat API.
//!
//! [`Transport`] is transport-agnostic; `dbot_telegram::TelegramTransport` implements it via
//! teloxide. Each call performs one network round trip and classifies failures as
//! [`TransportError`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{MessageId, ParseMode, Target, Update};

/// One-call-per-invocation access to the remote API. Implementations must be shareable across
/// the send worker and the poller.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `text` to `target` with the given parse mode; returns the id of the sent message.
    async fn send_message(
        &self,
        target: &Target,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<MessageId, TransportError>;

    /// Long-polls for updates starting at `offset` (`None` = from the oldest unacknowledged).
    /// The server holds the call open for up to `timeout` and returns an empty vec when nothing
    /// arrives.
    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TransportError>;
}
