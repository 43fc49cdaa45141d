//! Shared fixtures for telegram-bot integration tests.
//!
//! [`FakeTransport`] records every send attempt with its timestamp, answers sends from a script
//! of outcomes, and serves scripted update batches to the poller.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use telegram_bot::{
    Chat, IncomingMessage, MessageId, ParseMode, Settings, Target, Transport, TransportError,
    Update, User,
};
use tracing_subscriber::{fmt, EnvFilter};

/// One recorded call to `send_message`.
#[derive(Debug, Clone)]
pub struct SendRecord {
    pub target: Target,
    pub text: String,
    pub parse_mode: ParseMode,
    pub at: Instant,
}

/// Transport double: scripted send outcomes (empty script = success) and update batches (empty
/// script = an idle long poll that returns nothing after a short wait).
#[derive(Default)]
pub struct FakeTransport {
    sends: Mutex<Vec<SendRecord>>,
    send_script: Mutex<VecDeque<Result<(), TransportError>>>,
    update_script: Mutex<VecDeque<Result<Vec<Update>, TransportError>>>,
    offsets: Mutex<Vec<Option<i64>>>,
    next_message_id: AtomicI64,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the outcome of the next send attempt.
    pub fn script_send(&self, outcome: Result<(), TransportError>) {
        self.send_script.lock().unwrap().push_back(outcome);
    }

    /// Queues the result of the next `get_updates` call.
    pub fn script_updates(&self, batch: Result<Vec<Update>, TransportError>) {
        self.update_script.lock().unwrap().push_back(batch);
    }

    pub fn sends(&self) -> Vec<SendRecord> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sends().into_iter().map(|s| s.text).collect()
    }

    pub fn offsets(&self) -> Vec<Option<i64>> {
        self.offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_message(
        &self,
        target: &Target,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<MessageId, TransportError> {
        self.sends.lock().unwrap().push(SendRecord {
            target: *target,
            text: text.to_string(),
            parse_mode,
            at: Instant::now(),
        });
        let scripted = self.send_script.lock().unwrap().pop_front();
        match scripted {
            Some(Err(e)) => Err(e),
            _ => Ok(MessageId(
                self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
            )),
        }
    }

    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TransportError> {
        self.offsets.lock().unwrap().push(offset);
        let scripted = self.update_script.lock().unwrap().pop_front();
        match scripted {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(timeout.min(Duration::from_millis(20))).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Settings for tests: no pacing, short retry delay, one-second poll timeout.
pub fn test_settings() -> Settings {
    Settings::builder()
        .bot_token("test_bot_token_12345")
        .channel_id("@test_channel")
        .poll_timeout(Duration::from_secs(1))
        .retry_delay(Duration::from_millis(50))
        .send_delay(Duration::ZERO)
        .build()
        .expect("test settings")
}

/// Private-chat text update from `user_id`.
pub fn text_update(update_id: i64, user_id: i64, text: &str) -> Update {
    Update {
        update_id,
        message: Some(IncomingMessage {
            message_id: update_id,
            chat: Chat {
                id: user_id,
                chat_type: "private".to_string(),
            },
            from: Some(User {
                id: user_id,
                username: Some("test_user".to_string()),
                first_name: Some("Test".to_string()),
                last_name: None,
            }),
            text: Some(text.to_string()),
            date: Utc::now(),
        }),
    }
}

/// Polls `condition` until it holds or `timeout` elapses; returns the final value.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

static TRACING_INIT: Once = Once::new();

/// Initialize tracing once per test process; `RUST_LOG` controls the level.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,telegram_bot=debug"));

        let _ = fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .try_init();
    });
}
