//! Deduplication agent filtering repeated Telegram updates.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::bus::{field, Event, EventBus, EventHandler, Topic, TopicFilter};
use crate::{agents::DEDUP_PASSED, Result};

#[derive(Default)]
struct DedupState {
    seen: HashMap<i64, DateTime<Utc>>,
    // Arrival order of the same entries, oldest first. `seen` and `order`
    // hold exactly one record per update id.
    order: VecDeque<(i64, DateTime<Utc>)>,
}

/// Suppresses re-delivery of an update id within a trailing time window.
///
/// Ages are measured against the newest recorded timestamp rather than the
/// wall clock, which keeps the filter deterministic when historical updates
/// are replayed.
pub struct Dedup {
    bus: Arc<EventBus>,
    window: Duration,
    state: Mutex<DedupState>,
}

impl Dedup {
    pub fn new(bus: Arc<EventBus>, window: std::time::Duration) -> Self {
        Self {
            bus,
            window: Duration::from_std(window).unwrap_or(Duration::MAX),
            state: Mutex::new(DedupState::default()),
        }
    }

    /// Construct the agent and subscribe it to raw updates.
    pub fn attach(bus: &Arc<EventBus>, window: std::time::Duration) -> Result<Arc<Self>> {
        let agent = Arc::new(Self::new(bus.clone(), window));
        bus.subscribe(&[TopicFilter::Exact(Topic::Update)], agent.clone())?;
        Ok(agent)
    }

    /// Record `(update_id, ts)` and report whether the update should pass.
    fn admit(&self, update_id: i64, ts: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = state.seen.get(&update_id) {
            if ts - *existing <= self.window {
                return false;
            }
            state.order.retain(|(id, _)| *id != update_id);
        }
        state.seen.insert(update_id, ts);
        state.order.push_back((update_id, ts));
        while let Some(&(front_id, front_ts)) = state.order.front() {
            if ts - front_ts > self.window {
                state.order.pop_front();
                state.seen.remove(&front_id);
            } else {
                break;
            }
        }
        true
    }

    /// Clear cached update ids, yielding once so in-flight handlers settle.
    pub async fn flush(&self) {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.seen.clear();
        state.order.clear();
    }

    #[cfg(test)]
    fn cache_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        assert_eq!(state.seen.len(), state.order.len());
        state.seen.len()
    }
}

#[async_trait]
impl EventHandler for Dedup {
    async fn handle(&self, event: Event) -> Result<()> {
        if event.meta_flag(DEDUP_PASSED) {
            return Ok(());
        }
        let Some(update_id) = field::int(&event.payload, "update_id") else {
            // No identifier: inherently unique, pass straight through.
            self.bus
                .publish_event(event.annotated(DEDUP_PASSED, Value::Bool(true)))
                .await;
            return Ok(());
        };
        let ts = field::ts(&event.payload, "ts").unwrap_or_else(Utc::now);
        if !self.admit(update_id, ts) {
            tracing::debug!(update_id, "duplicate update suppressed");
            return Ok(());
        }
        self.bus
            .publish_event(event.annotated(DEDUP_PASSED, Value::Bool(true)))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, time::Duration as StdDuration};

    use serde_json::json;

    use super::*;
    use crate::bus::Payload;

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<Event>>,
    }

    impl Recorder {
        fn passed(&self) -> usize {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.meta_flag(DEDUP_PASSED))
                .count()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: Event) -> Result<()> {
            self.seen.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn payload(v: serde_json::Value) -> Payload {
        v.as_object().unwrap().clone()
    }

    async fn setup(window: StdDuration) -> (Arc<EventBus>, Arc<Dedup>, Arc<Recorder>) {
        let bus = Arc::new(EventBus::new());
        let dedup = Dedup::attach(&bus, window).unwrap();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(&[TopicFilter::Exact(Topic::Update)], recorder.clone())
            .unwrap();
        (bus, dedup, recorder)
    }

    #[tokio::test]
    async fn update_without_id_always_passes() {
        let (bus, _dedup, recorder) = setup(StdDuration::from_secs(600)).await;
        for _ in 0..2 {
            bus.publish(
                Topic::Update,
                payload(json!({"text": "hi"})),
                Payload::new(),
            )
            .await;
        }
        assert_eq!(recorder.passed(), 2);
    }

    #[tokio::test]
    async fn duplicate_within_window_is_suppressed() {
        let (bus, _dedup, recorder) = setup(StdDuration::from_secs(600)).await;
        let p = payload(json!({"update_id": 1, "ts": "2024-05-01T10:00:00+00:00"}));
        bus.publish(Topic::Update, p.clone(), Payload::new()).await;
        bus.publish(Topic::Update, p, Payload::new()).await;
        assert_eq!(recorder.passed(), 1);
    }

    #[tokio::test]
    async fn repeat_outside_window_passes_again() {
        let (bus, _dedup, recorder) = setup(StdDuration::from_secs(600)).await;
        bus.publish(
            Topic::Update,
            payload(json!({"update_id": 1, "ts": "2024-05-01T10:00:00+00:00"})),
            Payload::new(),
        )
        .await;
        bus.publish(
            Topic::Update,
            payload(json!({"update_id": 1, "ts": "2024-05-01T10:11:00+00:00"})),
            Payload::new(),
        )
        .await;
        assert_eq!(recorder.passed(), 2);
    }

    #[tokio::test]
    async fn already_annotated_update_is_ignored() {
        let (bus, dedup, recorder) = setup(StdDuration::from_secs(600)).await;
        let mut metadata = Payload::new();
        metadata.insert(DEDUP_PASSED.into(), Value::Bool(true));
        bus.publish(
            Topic::Update,
            payload(json!({"update_id": 5})),
            metadata,
        )
        .await;
        // Only the event we published ourselves; no re-publish, no caching.
        assert_eq!(recorder.passed(), 1);
        assert_eq!(dedup.cache_size(), 0);
    }

    #[tokio::test]
    async fn pruning_tracks_the_newest_timestamp() {
        let (bus, dedup, _recorder) = setup(StdDuration::from_secs(600)).await;
        for (id, ts) in [
            (1, "2024-05-01T10:00:00+00:00"),
            (2, "2024-05-01T10:05:00+00:00"),
            (3, "2024-05-01T10:20:00+00:00"),
        ] {
            bus.publish(
                Topic::Update,
                payload(json!({"update_id": id, "ts": ts})),
                Payload::new(),
            )
            .await;
        }
        // Update 1 is 20 minutes older than update 3 and must be pruned.
        assert_eq!(dedup.cache_size(), 2);
    }

    #[tokio::test]
    async fn flush_resets_the_cache() {
        let (bus, dedup, recorder) = setup(StdDuration::from_secs(600)).await;
        let p = payload(json!({"update_id": 9, "ts": "2024-05-01T10:00:00+00:00"}));
        bus.publish(Topic::Update, p.clone(), Payload::new()).await;
        dedup.flush().await;
        assert_eq!(dedup.cache_size(), 0);
        bus.publish(Topic::Update, p, Payload::new()).await;
        assert_eq!(recorder.passed(), 2);
    }
}
