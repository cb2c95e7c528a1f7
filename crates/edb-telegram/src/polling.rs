//! Long-poll driver feeding updates into the event bus.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use edb_core::bus::{EventBus, Payload, Topic};
use edb_core::ports::UpdateSource;
use edb_core::Result;

use crate::normalize::normalize_update;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Continuously fetch updates and publish them until cancelled.
///
/// The offset advances to one past the highest update id of each batch, so
/// acknowledged updates are never requested again. Transient fetch failures
/// are logged and retried after a bounded backoff.
pub async fn run_polling(
    bus: Arc<EventBus>,
    source: Arc<dyn UpdateSource>,
    poll_timeout: Duration,
    idle_delay: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!("starting polling loop");
    let mut offset: Option<i64> = None;
    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("polling loop cancelled");
                return Ok(());
            }
            fetched = source.get_updates(offset, poll_timeout.as_secs()) => fetched,
        };
        let updates = match fetched {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "polling failed, retrying");
                if wait(&cancel, idle_delay.min(MAX_BACKOFF)).await {
                    tracing::info!("polling loop cancelled");
                    return Ok(());
                }
                continue;
            }
        };
        if updates.is_empty() {
            if wait(&cancel, idle_delay).await {
                tracing::info!("polling loop cancelled");
                return Ok(());
            }
            continue;
        }
        for update in &updates {
            let envelope = normalize_update(update);
            if let Some(update_id) = envelope.update_id {
                offset = Some(offset.unwrap_or(0).max(update_id + 1));
            }
            let mut metadata = Payload::new();
            metadata.insert("transport".into(), json!("polling"));
            bus.publish(Topic::Update, envelope.into_payload(), metadata)
                .await;
        }
    }
}

/// Sleep for `delay`, returning true if cancelled meanwhile.
async fn wait(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = sleep(delay) => false,
    }
}
