//! Agent removing user data on request.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::bus::{field, Event, EventBus, EventHandler, Payload, Topic, TopicFilter};
use crate::storage::Storage;
use crate::Result;

pub struct Delete {
    bus: Arc<EventBus>,
    storage: Arc<dyn Storage>,
}

impl Delete {
    pub fn new(bus: Arc<EventBus>, storage: Arc<dyn Storage>) -> Self {
        Self { bus, storage }
    }

    pub fn attach(bus: &Arc<EventBus>, storage: Arc<dyn Storage>) -> Result<Arc<Self>> {
        let agent = Arc::new(Self::new(bus.clone(), storage));
        bus.subscribe(&[TopicFilter::Exact(Topic::DeleteRequest)], agent.clone())?;
        Ok(agent)
    }
}

#[async_trait]
impl EventHandler for Delete {
    async fn handle(&self, event: Event) -> Result<()> {
        let payload = &event.payload;
        let (Some(pid), Some(chat_id)) = (
            field::text(payload, "pid"),
            field::int(payload, "chat_id"),
        ) else {
            tracing::debug!("delete.request missing pid/chat_id, dropped");
            return Ok(());
        };
        self.storage.delete_user(pid).await?;

        let mut done = Payload::new();
        done.insert("pid".into(), json!(pid));
        done.insert("chat_id".into(), json!(chat_id));
        self.bus.publish(Topic::DeleteDone, done, Payload::new()).await;
        Ok(())
    }
}
