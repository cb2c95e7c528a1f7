use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Inbound boundary: something that yields batches of raw platform updates.
///
/// The Telegram long-poll client is the production implementation; tests
/// drive the polling loop with a scripted fake.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Value>>;
}

/// Outbound boundary: deliver a plain-text response to a chat.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
}
