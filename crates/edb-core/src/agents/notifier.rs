//! Notifier agent turning domain events into user-facing acknowledgements.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::bus::{field, Event, EventBus, EventHandler, Payload, Topic, TopicFilter};
use crate::Result;

/// Builds `tg.response` payloads for events worth telling the user about.
pub struct Notifier {
    bus: Arc<EventBus>,
}

impl Notifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn attach(bus: &Arc<EventBus>) -> Result<Arc<Self>> {
        let agent = Arc::new(Self::new(bus.clone()));
        bus.subscribe(
            &[
                TopicFilter::Exact(Topic::CheckinSaved),
                TopicFilter::Exact(Topic::DeleteDone),
            ],
            agent.clone(),
        )?;
        Ok(agent)
    }
}

#[async_trait]
impl EventHandler for Notifier {
    async fn handle(&self, event: Event) -> Result<()> {
        let payload = &event.payload;
        let Some(chat_id) = field::int(payload, "chat_id") else {
            tracing::debug!(topic = %event.topic, "notifier payload without chat_id");
            return Ok(());
        };
        let text = match event.topic {
            Topic::CheckinSaved => {
                let Some(mood) = payload
                    .get("entry")
                    .and_then(|e| e.get("mood"))
                    .and_then(field::as_int)
                else {
                    tracing::debug!(chat_id, "checkin.saved without entry mood");
                    return Ok(());
                };
                format!("Записал настроение: {mood}. Спасибо, что поделились!")
            }
            Topic::DeleteDone => "Все данные удалены. Надеемся увидеть вас снова!".to_string(),
            _ => return Ok(()),
        };

        let mut response = Payload::new();
        response.insert("chat_id".into(), json!(chat_id));
        response.insert("created_at".into(), json!(Utc::now().to_rfc3339()));
        response.insert("text".into(), json!(text));
        self.bus
            .publish(Topic::Response, response, Payload::new())
            .await;
        Ok(())
    }
}
