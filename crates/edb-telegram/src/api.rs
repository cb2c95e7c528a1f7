//! Minimal Telegram Bot API client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use edb_core::ports::{Messenger, UpdateSource};
use edb_core::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramApi {
    /// Build a client for the given bot token. `base_url` overrides the
    /// public endpoint (tests, local Bot API servers).
    pub fn new(token: &str, base_url: Option<String>) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::Config("telegram bot token must be provided".into()));
        }
        let mut base_url =
            base_url.unwrap_or_else(|| format!("https://api.telegram.org/bot{token}/"));
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    /// Invoke an arbitrary Bot API method and unwrap the response envelope.
    pub async fn call_method(&self, method: &str, params: Value) -> Result<Value> {
        let url = format!("{}{method}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("telegram api error");
            return Err(Error::Api(description.to_string()));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl UpdateSource for TelegramApi {
    async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Value>> {
        let mut params = json!({"timeout": timeout_secs});
        if let Some(offset) = offset {
            params["offset"] = json!(offset);
        }
        let result = self.call_method("getUpdates", params).await?;
        match result {
            Value::Array(updates) => Ok(updates),
            Value::Null => Ok(Vec::new()),
            other => Err(Error::Api(format!(
                "getUpdates returned a non-array result: {other}"
            ))),
        }
    }
}

#[async_trait]
impl Messenger for TelegramApi {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.call_method("sendMessage", json!({"chat_id": chat_id, "text": text}))
            .await?;
        Ok(())
    }
}
