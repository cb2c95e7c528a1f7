//! Asynchronous in-memory event bus used by the pipeline agents.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{Error, Result};

pub mod field;

/// Known domain topics with their wire names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Raw or dedup-annotated Telegram update.
    Update,
    ExportRequest,
    DeleteRequest,
    CheckinSave,
    CheckinSaved,
    DeleteDone,
    /// Outbound response to be delivered to a chat.
    Response,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Update => "tg.update",
            Topic::ExportRequest => "export.request",
            Topic::DeleteRequest => "delete.request",
            Topic::CheckinSave => "checkin.save",
            Topic::CheckinSaved => "checkin.saved",
            Topic::DeleteDone => "delete.done",
            Topic::Response => "tg.response",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription selector: a concrete topic or every publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopicFilter {
    Exact(Topic),
    Any,
}

/// Ordered string-keyed mapping used for both payloads and metadata.
pub type Payload = Map<String, Value>;

/// Domain event with payload and metadata.
///
/// Events are value objects; pipeline stages that re-publish an update with
/// extra annotations work on a copy and never mutate the original.
#[derive(Clone, Debug)]
pub struct Event {
    pub topic: Topic,
    pub payload: Payload,
    pub metadata: Payload,
}

impl Event {
    pub fn new(topic: Topic, payload: Payload, metadata: Payload) -> Self {
        Self {
            topic,
            payload,
            metadata,
        }
    }

    /// Copy of this event with one metadata entry added/replaced.
    pub fn annotated(&self, key: &str, value: Value) -> Event {
        let mut copy = self.clone();
        copy.metadata.insert(key.to_string(), value);
        copy
    }

    /// True if the metadata entry exists and is truthy.
    pub fn meta_flag(&self, key: &str) -> bool {
        matches!(self.metadata.get(key), Some(Value::Bool(true)))
    }
}

/// Capability implemented by every bus subscriber.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<()>;
}

/// Simple pub/sub event bus.
///
/// The subscription table is owned state behind a mutex; the lock is only
/// held to snapshot the handler list, never across an await, so handlers are
/// free to publish follow-up events.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<TopicFilter, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for the given filters.
    ///
    /// Registering one handler for several filters appends it to each list
    /// independently. A handler subscribed to both a concrete topic and
    /// [`TopicFilter::Any`] therefore runs once per matching subscription;
    /// the duplicate delivery is deliberate and kept for parity.
    pub fn subscribe(&self, filters: &[TopicFilter], handler: Arc<dyn EventHandler>) -> Result<()> {
        if filters.is_empty() {
            return Err(Error::Bus("subscribe requires at least one topic".into()));
        }
        let mut table = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for filter in filters {
            tracing::debug!(?filter, "subscribing handler");
            table.entry(*filter).or_default().push(handler.clone());
        }
        Ok(())
    }

    /// Publish an event to all registered subscribers.
    ///
    /// Exact-topic handlers are scheduled before wildcard handlers, each in
    /// registration order; their futures run concurrently and this call
    /// returns once all of them have settled. Handler errors and panics are
    /// logged and never propagate to the publisher.
    pub async fn publish(&self, topic: Topic, payload: Payload, metadata: Payload) {
        self.publish_event(Event::new(topic, payload, metadata))
            .await;
    }

    pub async fn publish_event(&self, event: Event) {
        let handlers = {
            let table = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            let mut snapshot: Vec<Arc<dyn EventHandler>> = Vec::new();
            if let Some(exact) = table.get(&TopicFilter::Exact(event.topic)) {
                snapshot.extend(exact.iter().cloned());
            }
            if let Some(any) = table.get(&TopicFilter::Any) {
                snapshot.extend(any.iter().cloned());
            }
            snapshot
        };
        if handlers.is_empty() {
            tracing::debug!(topic = %event.topic, "no subscribers for event");
            return;
        }

        let mut tasks = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let ev = event.clone();
            tasks.push(tokio::spawn(async move { handler.handle(ev).await }));
        }
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(topic = %event.topic, error = %e, "event handler failed")
                }
                Err(e) => {
                    tracing::error!(topic = %event.topic, error = %e, "event handler panicked")
                }
            }
        }
    }

    /// Remove all subscribers (shutdown and test isolation).
    pub fn clear(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<Event>>,
    }

    impl Recorder {
        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: Event) -> Result<()> {
            self.seen.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: Event) -> Result<()> {
            Err(Error::Bus("boom".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        async fn handle(&self, _event: Event) -> Result<()> {
            panic!("handler blew up");
        }
    }

    #[tokio::test]
    async fn subscribe_rejects_empty_topic_list() {
        let bus = EventBus::new();
        let handler = Arc::new(Recorder::default());
        assert!(bus.subscribe(&[], handler).is_err());
    }

    #[tokio::test]
    async fn publish_reaches_exact_and_wildcard_subscribers() {
        let bus = EventBus::new();
        let exact = Arc::new(Recorder::default());
        let any = Arc::new(Recorder::default());
        bus.subscribe(&[TopicFilter::Exact(Topic::Update)], exact.clone())
            .unwrap();
        bus.subscribe(&[TopicFilter::Any], any.clone()).unwrap();

        bus.publish(Topic::Update, Payload::new(), Payload::new())
            .await;
        bus.publish(Topic::DeleteDone, Payload::new(), Payload::new())
            .await;

        assert_eq!(exact.count(), 1);
        assert_eq!(any.count(), 2);
    }

    #[tokio::test]
    async fn dual_subscription_is_invoked_twice() {
        // One handler on both the concrete topic and the wildcard runs once
        // per matching subscription. Kept on purpose, do not "fix".
        let bus = EventBus::new();
        let handler = Arc::new(Recorder::default());
        bus.subscribe(
            &[TopicFilter::Exact(Topic::Update), TopicFilter::Any],
            handler.clone(),
        )
        .unwrap();

        bus.publish(Topic::Update, Payload::new(), Payload::new())
            .await;

        assert_eq!(handler.count(), 2);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(&[TopicFilter::Exact(Topic::Update)], Arc::new(Failing))
            .unwrap();
        bus.subscribe(&[TopicFilter::Exact(Topic::Update)], Arc::new(Panicking))
            .unwrap();
        bus.subscribe(&[TopicFilter::Exact(Topic::Update)], recorder.clone())
            .unwrap();

        bus.publish(Topic::Update, Payload::new(), Payload::new())
            .await;

        assert_eq!(recorder.count(), 1);
    }

    #[tokio::test]
    async fn clear_removes_all_subscriptions() {
        let bus = EventBus::new();
        let handler = Arc::new(Recorder::default());
        bus.subscribe(&[TopicFilter::Any], handler.clone()).unwrap();
        bus.clear();

        bus.publish(Topic::Update, Payload::new(), Payload::new())
            .await;

        assert_eq!(handler.count(), 0);
    }

    #[tokio::test]
    async fn annotated_copy_leaves_original_untouched() {
        let event = Event::new(Topic::Update, Payload::new(), Payload::new());
        let copy = event.annotated("dedup_passed", Value::Bool(true));
        assert!(copy.meta_flag("dedup_passed"));
        assert!(!event.meta_flag("dedup_passed"));
    }
}
