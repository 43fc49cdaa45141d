//! Error types for the bot core.
//!
//! [`DbotError`] is the top-level error; [`TransportError`] classifies failures at the remote API
//! boundary and [`HandlerError`] wraps a failing message handler.

use std::time::Duration;

use thiserror::Error;

/// Top-level error for dbot (configuration, lifecycle, transport, handler, IO).
#[derive(Error, Debug)]
pub enum DbotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TelegramBot is not initialized. Call initialize() first.")]
    NotInitialized,

    #[error("TelegramBot has been shut down; call reset_instance() to get a fresh instance")]
    ShutDown,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Request discarded: the bot is shutting down")]
    Cancelled,

    #[error("Cannot block inside an async runtime; await the delivery instead")]
    BlockingInRuntime,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbotError {
    /// Shorthand for a configuration error with a formatted message.
    pub fn config(message: impl Into<String>) -> Self {
        DbotError::Config(message.into())
    }
}

/// Failure of one call to the remote API.
///
/// `Network` and `RateLimited` are transient and retried by the workers; `InvalidRequest` and
/// `Unauthorized` are terminal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by the server (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl TransportError {
    /// True for errors worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_) | TransportError::RateLimited { .. }
        )
    }

    /// Delay before the next attempt: `base`, or the server's `retry_after` hint when longer.
    pub fn backoff(&self, base: Duration) -> Duration {
        match self {
            TransportError::RateLimited {
                retry_after: Some(hint),
            } => base.max(*hint),
            _ => base,
        }
    }
}

/// A message handler failed while processing an update. Never propagates past dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Error in message handler {handler}: {reason}")]
    Failed { handler: String, reason: String },

    #[error("Message handler {handler} panicked: {reason}")]
    Panicked { handler: String, reason: String },
}

impl HandlerError {
    /// Name of the handler that failed.
    pub fn handler(&self) -> &str {
        match self {
            HandlerError::Failed { handler, .. } | HandlerError::Panicked { handler, .. } => {
                handler
            }
        }
    }
}

/// Result type for core operations; uses [`DbotError`].
pub type Result<T> = std::result::Result<T, DbotError>;
