//! Agent persisting mood entries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::bus::{field, Event, EventBus, EventHandler, Payload, Topic, TopicFilter};
use crate::storage::Storage;
use crate::{Error, Result};

/// Persists `checkin.save` requests and announces the stored entry.
pub struct CheckinWriter {
    bus: Arc<EventBus>,
    storage: Arc<dyn Storage>,
}

impl CheckinWriter {
    pub fn new(bus: Arc<EventBus>, storage: Arc<dyn Storage>) -> Self {
        Self { bus, storage }
    }

    pub fn attach(bus: &Arc<EventBus>, storage: Arc<dyn Storage>) -> Result<Arc<Self>> {
        let agent = Arc::new(Self::new(bus.clone(), storage));
        bus.subscribe(&[TopicFilter::Exact(Topic::CheckinSave)], agent.clone())?;
        Ok(agent)
    }
}

#[async_trait]
impl EventHandler for CheckinWriter {
    async fn handle(&self, event: Event) -> Result<()> {
        let payload = &event.payload;
        let (Some(pid), Some(chat_id)) = (
            field::text(payload, "pid"),
            field::int(payload, "chat_id"),
        ) else {
            tracing::debug!("checkin.save missing pid/chat_id, dropped");
            return Ok(());
        };
        let Some(mood) = payload
            .get("mood")
            .and_then(field::as_int)
            .filter(|m| matches!(m, -1 | 0 | 1))
        else {
            tracing::debug!(chat_id, "checkin.save with invalid mood, dropped");
            return Ok(());
        };
        let ts = match payload.get("ts") {
            Some(Value::String(raw)) => field::parse_ts(raw)
                .ok_or_else(|| Error::Payload(format!("unparseable entry timestamp '{raw}'")))?,
            _ => Utc::now(),
        };
        let note = field::text(payload, "note").map(str::to_string);

        let entry = self.storage.save_entry(pid, ts, mood, note).await?;

        let mut saved = Payload::new();
        saved.insert("pid".into(), json!(pid));
        saved.insert("chat_id".into(), json!(chat_id));
        saved.insert("entry".into(), serde_json::to_value(&entry)?);
        self.bus
            .publish(Topic::CheckinSaved, saved, Payload::new())
            .await;
        Ok(())
    }
}
