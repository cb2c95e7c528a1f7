//! Router agent converting deduplicated updates into domain commands.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::bus::{field, Event, EventBus, EventHandler, Payload, Topic, TopicFilter};
use crate::storage::Storage;
use crate::{agents::DEDUP_PASSED, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Export,
    Delete,
    Checkin,
}

/// Classifies updates and emits `export.request`, `delete.request` or
/// `checkin.save` events. Stateless apart from the identity lookup.
pub struct Router {
    bus: Arc<EventBus>,
    storage: Arc<dyn Storage>,
}

impl Router {
    pub fn new(bus: Arc<EventBus>, storage: Arc<dyn Storage>) -> Self {
        Self { bus, storage }
    }

    /// Construct the agent and subscribe it to updates.
    pub fn attach(bus: &Arc<EventBus>, storage: Arc<dyn Storage>) -> Result<Arc<Self>> {
        let agent = Arc::new(Self::new(bus.clone(), storage));
        bus.subscribe(&[TopicFilter::Exact(Topic::Update)], agent.clone())?;
        Ok(agent)
    }
}

#[async_trait]
impl EventHandler for Router {
    async fn handle(&self, event: Event) -> Result<()> {
        if !event.meta_flag(DEDUP_PASSED) {
            return Ok(());
        }
        let payload = &event.payload;
        let Some(chat_id) = field::int(payload, "chat_id") else {
            tracing::debug!("tg.update without chat_id, dropped");
            return Ok(());
        };
        let ident = self.storage.get_or_create_ident(chat_id).await?;

        match resolve_command(payload) {
            Some(Command::Export) => {
                self.bus
                    .publish(
                        Topic::ExportRequest,
                        request_payload(&ident.pid, chat_id),
                        Payload::new(),
                    )
                    .await;
            }
            Some(Command::Delete) => {
                self.bus
                    .publish(
                        Topic::DeleteRequest,
                        request_payload(&ident.pid, chat_id),
                        Payload::new(),
                    )
                    .await;
            }
            Some(Command::Checkin) => {
                let Some(mood) = resolve_mood(payload) else {
                    tracing::debug!(chat_id, "cannot resolve mood from payload");
                    return Ok(());
                };
                let ts = match payload.get("ts") {
                    Some(Value::String(raw)) => field::parse_ts(raw).ok_or_else(|| {
                        Error::Payload(format!("unparseable checkin timestamp '{raw}'"))
                    })?,
                    _ => Utc::now(),
                };
                let note = field::text(payload, "note")
                    .filter(|s| !s.is_empty())
                    .or_else(|| field::text(payload, "text"))
                    .map(str::to_string);
                let mut save = Payload::new();
                save.insert("pid".into(), json!(ident.pid));
                save.insert("chat_id".into(), json!(chat_id));
                save.insert("mood".into(), json!(mood));
                save.insert("ts".into(), json!(ts.to_rfc3339()));
                save.insert("note".into(), json!(note));
                self.bus.publish(Topic::CheckinSave, save, Payload::new()).await;
            }
            None => {
                tracing::debug!(chat_id, "update matched no command");
            }
        }
        Ok(())
    }
}

fn request_payload(pid: &str, chat_id: i64) -> Payload {
    let mut p = Payload::new();
    p.insert("pid".into(), json!(pid));
    p.insert("chat_id".into(), json!(chat_id));
    p
}

/// Derive the high-level command from callback data or message text.
fn resolve_command(payload: &Payload) -> Option<Command> {
    let candidate = field::text(payload, "callback_data")
        .or_else(|| field::text(payload, "text"))
        .unwrap_or("");
    let data = candidate.trim().to_lowercase();
    if data.starts_with("/export") {
        return Some(Command::Export);
    }
    if data.starts_with("/delete") {
        return Some(Command::Delete);
    }
    if data.starts_with("/start") || data.starts_with("/checkin") {
        return Some(Command::Checkin);
    }
    if ["mood", "feeling", "эмоция"].iter().any(|t| data.contains(t)) {
        return Some(Command::Checkin);
    }
    if payload.get("mood").is_some_and(|v| !v.is_null()) {
        return Some(Command::Checkin);
    }
    None
}

/// Extract the mood value, in priority order: `mood:<v>` callback data, an
/// explicit `mood` field, then the message text. Only `{-1, 0, 1}` is valid.
fn resolve_mood(payload: &Payload) -> Option<i64> {
    if let Some(raw) = field::text(payload, "callback_data") {
        if let Some(suffix) = raw.trim().strip_prefix("mood:") {
            // Telegram clients sometimes send a typographic minus.
            let part = suffix.trim().replace('\u{2212}', "-");
            if let Ok(mood) = part.parse::<i64>() {
                // A parsed but out-of-range value fails the whole resolution;
                // an unparseable suffix falls through to the other sources.
                return in_range(mood);
            }
        }
    }

    let mood = if payload.get("mood").is_some_and(|v| !v.is_null()) {
        payload.get("mood").and_then(field::as_int)
    } else {
        let text = field::text(payload, "text")
            .map(str::to_lowercase)
            .unwrap_or_default();
        if text.starts_with("/checkin") {
            text.split_whitespace()
                .nth(1)
                .and_then(|tok| word_mood(tok).or_else(|| tok.parse::<i64>().ok()))
        } else {
            word_mood(text.trim())
        }
    };
    mood.and_then(in_range)
}

fn in_range(mood: i64) -> Option<i64> {
    matches!(mood, -1 | 0 | 1).then_some(mood)
}

fn word_mood(word: &str) -> Option<i64> {
    match word {
        "bad" | "terrible" => Some(-1),
        "meh" | "ok" => Some(0),
        "good" | "great" => Some(1),
        _ => None,
    }
}
