//! Delivers `tg.response` payloads through the messenger port.

use std::sync::Arc;

use async_trait::async_trait;

use edb_core::bus::{field, Event, EventBus, EventHandler, Topic, TopicFilter};
use edb_core::ports::Messenger;
use edb_core::Result;

pub struct Responder {
    messenger: Arc<dyn Messenger>,
}

impl Responder {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }

    pub fn attach(bus: &Arc<EventBus>, messenger: Arc<dyn Messenger>) -> Result<Arc<Self>> {
        let agent = Arc::new(Self::new(messenger));
        bus.subscribe(&[TopicFilter::Exact(Topic::Response)], agent.clone())?;
        Ok(agent)
    }
}

#[async_trait]
impl EventHandler for Responder {
    async fn handle(&self, event: Event) -> Result<()> {
        let payload = &event.payload;
        let Some(chat_id) = field::int(payload, "chat_id") else {
            tracing::debug!("tg.response without chat_id, dropped");
            return Ok(());
        };
        let Some(text) = field::text(payload, "text") else {
            tracing::debug!(chat_id, "tg.response without text, dropped");
            return Ok(());
        };
        self.messenger.send_text(chat_id, text).await
    }
}
