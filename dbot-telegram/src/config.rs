//! Bot settings: token, broadcast channel, URL prefix, parse mode, poll/retry/send timing.
//!
//! Sources, highest precedence first: values set explicitly on [`SettingsBuilder`], the process
//! environment, the `.env` file. Loading the `.env` file never mutates the process environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use dbot_core::{DbotError, ParseMode, Result};

pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_CHANNEL_ID: &str = "TELEGRAM_CHANNEL_ID";
pub const ENV_BASE_URL: &str = "TELEGRAM_BASE_URL";
pub const ENV_PARSE_MODE: &str = "TELEGRAM_PARSE_MODE";
pub const ENV_POLL_TIMEOUT: &str = "TELEGRAM_POLL_TIMEOUT";
pub const ENV_RETRY_DELAY: &str = "TELEGRAM_RETRY_DELAY";
pub const ENV_SEND_DELAY: &str = "TELEGRAM_SEND_DELAY";
pub const ENV_API_URL: &str = "TELEGRAM_API_URL";
pub const ENV_TELOXIDE_API_URL: &str = "TELOXIDE_API_URL";
pub const ENV_ALLOWED_USER_IDS: &str = "TELEGRAM_ALLOWED_USER_IDS";

pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 5.0;
pub const DEFAULT_SEND_DELAY_SECS: f64 = 0.1;

const ERR_MISSING_BOT_TOKEN: &str = "Bot token is required";
const ERR_MISSING_CHANNEL_ID: &str = "Channel ID is required";

/// Immutable, validated bot settings. Build with [`Settings::new`], [`Settings::builder`] or
/// [`Settings::from_env`].
#[derive(Clone, PartialEq)]
pub struct Settings {
    bot_token: String,
    channel_id: String,
    base_url: String,
    parse_mode: ParseMode,
    poll_timeout: Duration,
    retry_delay: Duration,
    send_delay: Duration,
    api_url: Option<reqwest::Url>,
    allowed_user_ids: Vec<i64>,
}

impl Settings {
    /// Settings with the two required fields and defaults elsewhere.
    pub fn new(bot_token: impl Into<String>, channel_id: impl Into<String>) -> Result<Self> {
        Self::builder()
            .bot_token(bot_token)
            .channel_id(channel_id)
            .build()
    }

    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Loads settings from the process environment and the `.env` file (`env_path`, or `./.env`).
    pub fn from_env(env_path: Option<&Path>) -> Result<Self> {
        let source = EnvSource::load(env_path)?;
        SettingsBuilder::default().merge_env(&source)?.build()
    }

    pub fn bot_token(&self) -> &str {
        &self.bot_token
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Channel id as the API expects it: `@name` for usernames, numeric ids unchanged.
    pub fn normalized_channel_id(&self) -> String {
        if self.channel_id.starts_with('@') || self.channel_id.parse::<i64>().is_ok() {
            self.channel_id.clone()
        } else {
            format!("@{}", self.channel_id)
        }
    }

    /// Prefix joined with paths by `send_url_sync`; empty means "send paths as-is".
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn parse_mode(&self) -> ParseMode {
        self.parse_mode
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn send_delay(&self) -> Duration {
        self.send_delay
    }

    /// Custom Bot API server, if configured.
    pub fn api_url(&self) -> Option<&reqwest::Url> {
        self.api_url.as_ref()
    }

    pub fn allowed_user_ids(&self) -> &[i64] {
        &self.allowed_user_ids
    }

    /// True when no allow-list is configured, the update has no sender, or the sender is listed.
    pub fn is_user_allowed(&self, user_id: Option<i64>) -> bool {
        match user_id {
            Some(id) if !self.allowed_user_ids.is_empty() => self.allowed_user_ids.contains(&id),
            _ => true,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bot_token", &mask_token(&self.bot_token))
            .field("channel_id", &self.channel_id)
            .field("base_url", &self.base_url)
            .field("parse_mode", &self.parse_mode)
            .field("poll_timeout", &self.poll_timeout)
            .field("retry_delay", &self.retry_delay)
            .field("send_delay", &self.send_delay)
            .field("api_url", &self.api_url.as_ref().map(|u| u.as_str()))
            .field("allowed_user_ids", &self.allowed_user_ids)
            .finish()
    }
}

/// Masks a secret for logs: first 7 + "***" + last 4 chars; 11 chars or fewer become "***".
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 11 {
        return "***".to_string();
    }
    let head: String = chars[..7].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", head, tail)
}

/// Explicit settings values; anything left unset is filled by [`merge_env`](Self::merge_env) or
/// defaulted by [`build`](Self::build).
#[derive(Clone, Default)]
pub struct SettingsBuilder {
    bot_token: Option<String>,
    channel_id: Option<String>,
    base_url: Option<String>,
    parse_mode: Option<ParseMode>,
    poll_timeout: Option<Duration>,
    retry_delay: Option<Duration>,
    send_delay: Option<Duration>,
    api_url: Option<String>,
    allowed_user_ids: Option<Vec<i64>>,
}

impl fmt::Debug for SettingsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsBuilder")
            .field("bot_token", &self.bot_token.as_deref().map(mask_token))
            .field("channel_id", &self.channel_id)
            .field("base_url", &self.base_url)
            .field("parse_mode", &self.parse_mode)
            .field("poll_timeout", &self.poll_timeout)
            .field("retry_delay", &self.retry_delay)
            .field("send_delay", &self.send_delay)
            .field("api_url", &self.api_url)
            .field("allowed_user_ids", &self.allowed_user_ids)
            .finish()
    }
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bot_token(mut self, bot_token: impl Into<String>) -> Self {
        self.bot_token = Some(bot_token.into());
        self
    }

    pub fn channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn parse_mode(mut self, parse_mode: ParseMode) -> Self {
        self.parse_mode = Some(parse_mode);
        self
    }

    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = Some(poll_timeout);
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    pub fn send_delay(mut self, send_delay: Duration) -> Self {
        self.send_delay = Some(send_delay);
        self
    }

    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn allowed_user_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.allowed_user_ids = Some(ids.into_iter().collect());
        self
    }

    /// Fills every field that was not set explicitly from `source`. Fails if a present value does
    /// not parse as its declared type.
    pub fn merge_env(mut self, source: &EnvSource) -> Result<Self> {
        if self.bot_token.is_none() {
            self.bot_token = source.get(ENV_BOT_TOKEN);
        }
        if self.channel_id.is_none() {
            self.channel_id = source.get(ENV_CHANNEL_ID);
        }
        if self.base_url.is_none() {
            self.base_url = source.get(ENV_BASE_URL);
        }
        if self.parse_mode.is_none() {
            if let Some(raw) = source.get(ENV_PARSE_MODE) {
                self.parse_mode = Some(raw.parse()?);
            }
        }
        if self.poll_timeout.is_none() {
            if let Some(raw) = source.get(ENV_POLL_TIMEOUT) {
                self.poll_timeout = Some(Duration::from_secs(parse_value::<u64>(
                    ENV_POLL_TIMEOUT,
                    &raw,
                )?));
            }
        }
        if self.retry_delay.is_none() {
            if let Some(raw) = source.get(ENV_RETRY_DELAY) {
                self.retry_delay = Some(parse_seconds(ENV_RETRY_DELAY, &raw)?);
            }
        }
        if self.send_delay.is_none() {
            if let Some(raw) = source.get(ENV_SEND_DELAY) {
                self.send_delay = Some(parse_seconds(ENV_SEND_DELAY, &raw)?);
            }
        }
        if self.api_url.is_none() {
            self.api_url = source
                .get(ENV_API_URL)
                .or_else(|| source.get(ENV_TELOXIDE_API_URL));
        }
        if self.allowed_user_ids.is_none() {
            if let Some(raw) = source.get(ENV_ALLOWED_USER_IDS) {
                self.allowed_user_ids = Some(parse_user_ids(&raw)?);
            }
        }
        Ok(self)
    }

    /// Applies defaults and validates.
    pub fn build(self) -> Result<Settings> {
        let bot_token = self
            .bot_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| DbotError::config(ERR_MISSING_BOT_TOKEN))?;
        let channel_id = self
            .channel_id
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| DbotError::config(ERR_MISSING_CHANNEL_ID))?;

        let poll_timeout = self
            .poll_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS));
        if poll_timeout.as_secs() == 0 {
            return Err(DbotError::config(
                "Poll timeout must be at least one second",
            ));
        }

        let api_url = self
            .api_url
            .map(|raw| {
                reqwest::Url::parse(&raw).map_err(|e| {
                    DbotError::config(format!(
                        "{} (or {}) is set but not a valid URL: {} ({})",
                        ENV_API_URL, ENV_TELOXIDE_API_URL, raw, e
                    ))
                })
            })
            .transpose()?;

        Ok(Settings {
            bot_token,
            channel_id,
            base_url: self.base_url.unwrap_or_default(),
            parse_mode: self.parse_mode.unwrap_or_default(),
            poll_timeout,
            retry_delay: self
                .retry_delay
                .unwrap_or(Duration::from_secs_f64(DEFAULT_RETRY_DELAY_SECS)),
            send_delay: self
                .send_delay
                .unwrap_or(Duration::from_secs_f64(DEFAULT_SEND_DELAY_SECS)),
            api_url,
            allowed_user_ids: self.allowed_user_ids.unwrap_or_default(),
        })
    }
}

/// Key/value source for settings: the process environment (unless built from pairs) backed by
/// the entries of a `.env` file. Empty values count as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    process_env: bool,
    file: HashMap<String, String>,
}

impl EnvSource {
    /// Reads `env_path`, or `./.env` (searched upwards) when `None`. A missing default file is
    /// fine; a missing explicit file is a configuration error.
    pub fn load(env_path: Option<&Path>) -> Result<Self> {
        let iter = match env_path {
            Some(path) => Some(dotenvy::from_path_iter(path).map_err(|e| {
                DbotError::config(format!("Failed to read env file {}: {}", path.display(), e))
            })?),
            None => match dotenvy::dotenv_iter() {
                Ok(iter) => Some(iter),
                Err(e) if e.not_found() => None,
                Err(e) => {
                    return Err(DbotError::config(format!("Failed to read .env: {}", e)));
                }
            },
        };

        let mut file = HashMap::new();
        if let Some(iter) = iter {
            for item in iter {
                let (key, value) =
                    item.map_err(|e| DbotError::config(format!("Invalid env file entry: {}", e)))?;
                file.insert(key, value);
            }
        }

        Ok(Self {
            process_env: true,
            file,
        })
    }

    /// Source made only of the given pairs; the process environment is not consulted.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            process_env: false,
            file: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let from_process = if self.process_env {
            env::var(key).ok()
        } else {
            None
        };
        from_process
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.file.get(key).cloned().filter(|v| !v.trim().is_empty()))
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| DbotError::config(format!("Invalid settings: {}={:?}: {}", key, raw, e)))
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration> {
    let secs: f64 = parse_value(key, raw)?;
    Duration::try_from_secs_f64(secs).map_err(|_| {
        DbotError::config(format!(
            "Invalid settings: {}={:?}: must be a non-negative number of seconds",
            key, raw
        ))
    })
}

fn parse_user_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_value::<i64>(ENV_ALLOWED_USER_IDS, s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn assert_config_err<T: fmt::Debug>(result: Result<T>, needle: &str) {
        match result {
            Err(DbotError::Config(msg)) => {
                assert!(msg.contains(needle), "{:?} does not mention {:?}", msg, needle)
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_new_applies_defaults() {
        let settings = Settings::new("test_token", "@test_channel").unwrap();
        assert_eq!(settings.bot_token(), "test_token");
        assert_eq!(settings.channel_id(), "@test_channel");
        assert_eq!(settings.base_url(), "");
        assert_eq!(settings.parse_mode(), ParseMode::Html);
        assert_eq!(settings.poll_timeout(), Duration::from_secs(30));
        assert_eq!(settings.retry_delay(), Duration::from_secs(5));
        assert_eq!(settings.send_delay(), Duration::from_millis(100));
        assert!(settings.api_url().is_none());
        assert!(settings.allowed_user_ids().is_empty());
    }

    #[test]
    fn test_missing_required_fields() {
        assert_config_err(Settings::new("", "@test_channel"), "Bot token is required");
        assert_config_err(Settings::new("test_token", ""), "Channel ID is required");
        assert_config_err(Settings::builder().build(), "Bot token is required");
    }

    #[test]
    fn test_missing_required_fields_from_env_source() {
        let source = EnvSource::from_pairs([(ENV_BOT_TOKEN, "env_token")]);
        let result = Settings::builder().merge_env(&source).unwrap().build();
        assert_config_err(result, "Channel ID is required");
    }

    #[test]
    fn test_explicit_values_take_precedence_over_env() {
        let source = EnvSource::from_pairs([
            (ENV_BOT_TOKEN, "env_token"),
            (ENV_CHANNEL_ID, "@env_channel"),
            (ENV_BASE_URL, "https://env.example.com"),
            (ENV_POLL_TIMEOUT, "60"),
            (ENV_SEND_DELAY, "0.5"),
        ]);

        let settings = Settings::builder()
            .bot_token("explicit_token")
            .poll_timeout(Duration::from_secs(10))
            .merge_env(&source)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(settings.bot_token(), "explicit_token");
        assert_eq!(settings.poll_timeout(), Duration::from_secs(10));
        assert_eq!(settings.channel_id(), "@env_channel");
        assert_eq!(settings.base_url(), "https://env.example.com");
        assert_eq!(settings.send_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_env_numeric_and_parse_mode_values() {
        let source = EnvSource::from_pairs([
            (ENV_BOT_TOKEN, "t"),
            (ENV_CHANNEL_ID, "c"),
            (ENV_PARSE_MODE, "MarkdownV2"),
            (ENV_POLL_TIMEOUT, "60"),
            (ENV_RETRY_DELAY, "10.5"),
            (ENV_SEND_DELAY, "0"),
        ]);
        let settings = SettingsBuilder::new()
            .merge_env(&source)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(settings.parse_mode(), ParseMode::MarkdownV2);
        assert_eq!(settings.poll_timeout(), Duration::from_secs(60));
        assert_eq!(settings.retry_delay(), Duration::from_secs_f64(10.5));
        assert_eq!(settings.send_delay(), Duration::ZERO);
    }

    #[test]
    fn test_empty_env_values_fall_back_to_defaults() {
        let source = EnvSource::from_pairs([
            (ENV_BOT_TOKEN, "t"),
            (ENV_CHANNEL_ID, "c"),
            (ENV_POLL_TIMEOUT, ""),
            (ENV_RETRY_DELAY, "  "),
        ]);
        let settings = SettingsBuilder::new()
            .merge_env(&source)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(settings.poll_timeout(), Duration::from_secs(30));
        assert_eq!(settings.retry_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_numeric_values_are_rejected() {
        let bad_timeout = EnvSource::from_pairs([(ENV_POLL_TIMEOUT, "soon")]);
        assert_config_err(
            SettingsBuilder::new().merge_env(&bad_timeout),
            ENV_POLL_TIMEOUT,
        );

        let negative_delay = EnvSource::from_pairs([(ENV_RETRY_DELAY, "-1")]);
        assert_config_err(
            SettingsBuilder::new().merge_env(&negative_delay),
            ENV_RETRY_DELAY,
        );

        let bad_mode = EnvSource::from_pairs([(ENV_PARSE_MODE, "bbcode")]);
        assert_config_err(SettingsBuilder::new().merge_env(&bad_mode), "parse mode");
    }

    #[test]
    fn test_zero_poll_timeout_is_rejected() {
        let result = Settings::builder()
            .bot_token("t")
            .channel_id("c")
            .poll_timeout(Duration::ZERO)
            .build();
        assert_config_err(result, "Poll timeout");
    }

    #[test]
    fn test_normalized_channel_id() {
        let with_at = Settings::new("t", "@my_channel").unwrap();
        assert_eq!(with_at.normalized_channel_id(), "@my_channel");

        let without_at = Settings::new("t", "my_channel").unwrap();
        assert_eq!(without_at.normalized_channel_id(), "@my_channel");

        let numeric = Settings::new("t", "-100123456789").unwrap();
        assert_eq!(numeric.normalized_channel_id(), "-100123456789");
    }

    #[test]
    fn test_api_url_falls_back_to_teloxide_key_and_is_validated() {
        let source = EnvSource::from_pairs([
            (ENV_BOT_TOKEN, "t"),
            (ENV_CHANNEL_ID, "c"),
            (ENV_TELOXIDE_API_URL, "http://127.0.0.1:8081"),
        ]);
        let settings = SettingsBuilder::new()
            .merge_env(&source)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            settings.api_url().map(|u| u.as_str()),
            Some("http://127.0.0.1:8081/")
        );

        let invalid = Settings::builder()
            .bot_token("t")
            .channel_id("c")
            .api_url("not-a-valid-url")
            .build();
        assert_config_err(invalid, "not a valid URL");
    }

    #[test]
    fn test_allowed_user_ids() {
        let source = EnvSource::from_pairs([(ENV_ALLOWED_USER_IDS, "1, 2,,3")]);
        let settings = SettingsBuilder::new()
            .bot_token("t")
            .channel_id("c")
            .merge_env(&source)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(settings.allowed_user_ids(), &[1, 2, 3]);
        assert!(settings.is_user_allowed(Some(2)));
        assert!(!settings.is_user_allowed(Some(4)));
        assert!(settings.is_user_allowed(None));

        let open = Settings::new("t", "c").unwrap();
        assert!(open.is_user_allowed(Some(4)));

        let bad = EnvSource::from_pairs([(ENV_ALLOWED_USER_IDS, "1,abc")]);
        assert_config_err(SettingsBuilder::new().merge_env(&bad), ENV_ALLOWED_USER_IDS);
    }

    #[test]
    fn test_debug_masks_token() {
        let settings = Settings::new("123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw", "@c").unwrap();
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw"));
        assert!(rendered.contains("1234567***Dsaw"));
    }

    #[test]
    fn test_mask_token_short() {
        assert_eq!(mask_token(""), "***");
        assert_eq!(mask_token("12345678901"), "***");
        assert_eq!(mask_token("123456789012"), "1234567***9012");
    }

    #[test]
    fn test_load_missing_explicit_env_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.env");
        assert_config_err(EnvSource::load(Some(&missing)), "Failed to read env file");
    }

    #[test]
    #[serial]
    fn test_from_env_reads_file_and_process_env_wins() {
        env::remove_var(ENV_BOT_TOKEN);
        env::remove_var(ENV_CHANNEL_ID);
        env::remove_var(ENV_BASE_URL);
        env::remove_var(ENV_POLL_TIMEOUT);
        env::remove_var(ENV_RETRY_DELAY);
        env::remove_var(ENV_SEND_DELAY);
        env::remove_var(ENV_PARSE_MODE);
        env::remove_var(ENV_API_URL);
        env::remove_var(ENV_TELOXIDE_API_URL);
        env::remove_var(ENV_ALLOWED_USER_IDS);
        env::set_var(ENV_CHANNEL_ID, "@process_channel");

        let mut env_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(env_file, "{}=file_token", ENV_BOT_TOKEN).unwrap();
        writeln!(env_file, "{}=@file_channel", ENV_CHANNEL_ID).unwrap();
        writeln!(env_file, "{}=https://file.example.com", ENV_BASE_URL).unwrap();
        writeln!(env_file, "{}=45", ENV_POLL_TIMEOUT).unwrap();

        let settings = Settings::from_env(Some(env_file.path())).unwrap();

        assert_eq!(settings.bot_token(), "file_token");
        assert_eq!(settings.channel_id(), "@process_channel");
        assert_eq!(settings.base_url(), "https://file.example.com");
        assert_eq!(settings.poll_timeout(), Duration::from_secs(45));
        // Loading must not leak file values into the process environment.
        assert!(env::var(ENV_BOT_TOKEN).is_err());

        env::remove_var(ENV_CHANNEL_ID);
    }
}
