//! Echo bot: replies "Echo: <text>" to every text message until Ctrl-C.
//!
//! Reads TELEGRAM_BOT_TOKEN / TELEGRAM_CHANNEL_ID (and the optional TELEGRAM_* settings) from the
//! environment or `.env`.

use chrono::Local;
use telegram_bot::{init_tracing, TelegramBot};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let log_file = "logs/echo-bot.log";
    init_tracing(Some(log_file))?;

    let bot = TelegramBot::get_instance();
    bot.initialize(None, None)?;
    info!(start_time = %Local::now().format("%Y-%m-%d %H:%M:%S"), log_file = %log_file, "Echo Bot started");

    bot.add_handler_fn(|update| {
        let Some(message) = update.message.as_ref() else {
            return Ok(());
        };
        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        let user_id = message.sender_id().unwrap_or(0);
        let chat_id = message.chat_id();

        info!(
            user_id = user_id,
            chat_id = chat_id,
            message_content = %text,
            "Echoing message"
        );

        match TelegramBot::get_instance().reply_to_user(&format!("Echo: {}", text), chat_id) {
            Ok(message_id) => info!(user_id = user_id, chat_id = chat_id, %message_id, "Sent echo response"),
            Err(e) => error!(user_id = user_id, chat_id = chat_id, error = %e, "Failed to send echo"),
        }
        Ok(())
    })?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;

    info!("Ctrl-C received, shutting down");
    bot.shutdown();
    Ok(())
}
