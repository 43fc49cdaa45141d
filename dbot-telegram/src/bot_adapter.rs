//! Wraps teloxide::Bot and implements [`dbot_core::Transport`]. Production code talks to the Bot API
//! through this type; tests substitute another Transport impl.

use std::time::Duration;

use async_trait::async_trait;
use dbot_core::{
    DbotError, MessageId, ParseMode, Result, Target, ToCoreUpdate, Transport, TransportError,
    Update,
};
use teloxide::prelude::*;
use teloxide::types::{ParseMode as TgParseMode, Recipient};
use teloxide::{ApiError, RequestError};
use tracing::{debug, instrument};

use crate::adapters::TelegramUpdateWrapper;
use crate::config::Settings;

/// Extra time the HTTP client waits beyond the long-poll timeout before giving up on a request.
const HTTP_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Thin wrapper around teloxide::Bot that implements dbot-core's Transport trait.
pub struct TelegramTransport {
    bot: teloxide::Bot,
    channel: Recipient,
}

impl TelegramTransport {
    /// Builds a transport from settings: token, optional custom API server, and an HTTP timeout
    /// long enough for `poll_timeout` long-polls.
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(settings.poll_timeout() + HTTP_TIMEOUT_MARGIN)
            .build()
            .map_err(|e| DbotError::config(format!("Failed to build HTTP client: {}", e)))?;

        let mut bot = teloxide::Bot::with_client(settings.bot_token(), client);
        if let Some(url) = settings.api_url() {
            bot = bot.set_api_url(url.clone());
        }

        Ok(Self::from_bot(bot, &settings.normalized_channel_id()))
    }

    /// Creates a transport from an existing teloxide Bot; `channel` is `@name` or a numeric id.
    pub fn from_bot(bot: teloxide::Bot, channel: &str) -> Self {
        Self {
            bot,
            channel: channel_recipient(channel),
        }
    }

    /// Returns the underlying teloxide::Bot for direct API use when needed.
    pub fn inner(&self) -> &teloxide::Bot {
        &self.bot
    }

    fn recipient(&self, target: &Target) -> Recipient {
        match target {
            Target::Channel => self.channel.clone(),
            Target::Chat(id) => Recipient::Id(ChatId(*id)),
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    async fn send_message(
        &self,
        target: &Target,
        text: &str,
        parse_mode: ParseMode,
    ) -> std::result::Result<MessageId, TransportError> {
        let sent = self
            .bot
            .send_message(self.recipient(target), text)
            .parse_mode(to_teloxide_parse_mode(parse_mode))
            .await
            .map_err(classify_request_error)?;
        debug!(message_id = sent.id.0, "step: message accepted");
        Ok(MessageId(i64::from(sent.id.0)))
    }

    #[instrument(skip(self))]
    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> std::result::Result<Vec<Update>, TransportError> {
        let timeout_secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);
        let mut request = self.bot.get_updates().timeout(timeout_secs);
        if let Some(offset) = offset {
            let offset = i32::try_from(offset).map_err(|_| {
                TransportError::InvalidRequest(format!("update offset out of range: {}", offset))
            })?;
            request = request.offset(offset);
        }

        let updates = request.await.map_err(classify_request_error)?;
        debug!(count = updates.len(), "step: updates received");
        Ok(updates
            .iter()
            .map(|u| TelegramUpdateWrapper(u).to_core())
            .collect())
    }
}

/// Numeric ids (e.g. `-100123`) address a chat directly; anything else is a channel username.
fn channel_recipient(channel: &str) -> Recipient {
    match channel.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(channel.to_string()),
    }
}

#[allow(deprecated)]
fn to_teloxide_parse_mode(mode: ParseMode) -> TgParseMode {
    match mode {
        ParseMode::Html => TgParseMode::Html,
        ParseMode::Markdown => TgParseMode::Markdown,
        ParseMode::MarkdownV2 => TgParseMode::MarkdownV2,
    }
}

/// Maps a teloxide failure onto the transient/terminal taxonomy the workers retry on.
pub fn classify_request_error(err: RequestError) -> TransportError {
    match err {
        RequestError::RetryAfter(secs) => TransportError::RateLimited {
            retry_after: Some(secs.duration()),
        },
        RequestError::Network(e) => TransportError::Network(e.to_string()),
        RequestError::Io(e) => TransportError::Network(e.to_string()),
        RequestError::InvalidJson { source, .. } => {
            TransportError::Network(format!("invalid response body: {}", source))
        }
        RequestError::Api(ApiError::InvalidToken) => {
            TransportError::Unauthorized(ApiError::InvalidToken.to_string())
        }
        // Telegram answers 404 "Not Found" for a malformed token path.
        RequestError::Api(ApiError::Unknown(description)) if description == "Not Found" => {
            TransportError::Unauthorized(description)
        }
        RequestError::Api(api) => TransportError::InvalidRequest(api.to_string()),
        RequestError::MigrateToChatId(chat_id) => {
            TransportError::InvalidRequest(format!("chat migrated to {}", chat_id))
        }
        #[allow(unreachable_patterns)]
        other => TransportError::Network(other.to_string()),
    }
}
