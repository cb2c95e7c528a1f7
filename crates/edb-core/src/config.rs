use std::{env, fs, path::Path, time::Duration};

use crate::{errors::Error, Result};

/// Run mode selected at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Polling,
    Webhook,
}

impl Mode {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "" | "polling" => Ok(Mode::Polling),
            "webhook" => Ok(Mode::Webhook),
            other => Err(Error::Config(format!(
                "EMOTION_DIARY_MODE must be 'polling' or 'webhook', got '{other}'"
            ))),
        }
    }
}

/// Typed configuration for the bot, loaded from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub mode: Mode,

    // Webhook listener
    pub webhook_host: String,
    pub webhook_port: u16,
    pub webhook_secret: Option<String>,

    // Polling driver
    pub poll_timeout: Duration,
    pub idle_delay: Duration,

    // Pipeline tunables
    pub dedup_window: Duration,
    pub ident_salt: String,

    /// Alternative Bot API base URL (tests, local API servers).
    pub api_base_url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let mode = Mode::parse(&env_str("EMOTION_DIARY_MODE").unwrap_or_default())?;

        let webhook_host = env_str("WEBHOOK_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let webhook_port = env_u16("WEBHOOK_PORT").unwrap_or(8080);
        let webhook_secret = env_str("TELEGRAM_WEBHOOK_SECRET").and_then(non_empty);
        if mode == Mode::Webhook && webhook_secret.is_none() {
            return Err(Error::Config(
                "TELEGRAM_WEBHOOK_SECRET is required in webhook mode".to_string(),
            ));
        }

        let poll_timeout = Duration::from_secs(env_u64("POLL_TIMEOUT_SECS").unwrap_or(30));
        let idle_delay = Duration::from_millis(env_u64("IDLE_DELAY_MS").unwrap_or(1000));
        let dedup_window = Duration::from_secs(env_u64("DEDUP_WINDOW_SECS").unwrap_or(600));

        let ident_salt = env_str("EMOTION_DIARY_IDENT_SALT")
            .and_then(non_empty)
            .unwrap_or_else(|| crate::storage::DEFAULT_IDENT_SALT.to_string());

        let api_base_url = env_str("TELEGRAM_API_BASE_URL").and_then(non_empty);

        Ok(Self {
            telegram_bot_token,
            mode,
            webhook_host,
            webhook_port,
            webhook_secret,
            poll_timeout,
            idle_delay,
            dedup_window,
            ident_salt,
            api_base_url,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    env_str(key).and_then(|s| s.trim().parse::<u16>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
