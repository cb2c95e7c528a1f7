//! Normalization of raw Telegram updates into the canonical bus payload.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use edb_core::bus::{field, Payload};

/// Canonical, platform-agnostic form of one inbound update.
///
/// `ts` is always a resolved timestamp after normalization, never a raw
/// wire value; `raw` keeps the untransformed update for downstream audit.
#[derive(Clone, Debug)]
pub struct UpdateEnvelope {
    pub update_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub text: Option<String>,
    pub message_id: Option<i64>,
    pub callback_data: Option<String>,
    pub from_id: Option<i64>,
    pub ts: DateTime<Utc>,
    pub raw: Value,
}

impl UpdateEnvelope {
    /// Ordered bus payload for a `tg.update` publish.
    pub fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        if let Some(update_id) = self.update_id {
            payload.insert("update_id".into(), json!(update_id));
        }
        payload.insert("raw".into(), self.raw);
        if let Some(chat_id) = self.chat_id {
            payload.insert("chat_id".into(), json!(chat_id));
        }
        if let Some(text) = self.text {
            payload.insert("text".into(), json!(text));
        }
        if let Some(message_id) = self.message_id {
            payload.insert("message_id".into(), json!(message_id));
        }
        if let Some(callback_data) = self.callback_data {
            payload.insert("callback_data".into(), json!(callback_data));
        }
        if let Some(from_id) = self.from_id {
            payload.insert("from_id".into(), json!(from_id));
        }
        payload.insert("ts".into(), json!(self.ts.to_rfc3339()));
        payload
    }
}

#[derive(Default)]
struct MessageFields {
    chat_id: Option<i64>,
    text: Option<String>,
    message_id: Option<i64>,
    ts: Option<DateTime<Utc>>,
}

fn extract_message_fields(message: &Value) -> MessageFields {
    MessageFields {
        chat_id: message
            .get("chat")
            .and_then(|chat| chat.get("id"))
            .and_then(field::as_int),
        text: message
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string),
        message_id: message.get("message_id").and_then(field::as_int),
        ts: message.get("date").and_then(parse_date),
    }
}

/// Telegram sends `date` as epoch seconds; synthesized updates may carry an
/// ISO-8601 string instead. Unparseable strings yield no timestamp here and
/// fall through to the now() default.
fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_opt(secs, 0).single()
        }
        Value::String(s) => field::parse_ts(s),
        _ => None,
    }
}

/// Convert a raw Telegram update into the canonical envelope.
///
/// Fields from `callback_query.message` override those of a top-level
/// `message`: a callback query always describes the message the pressed
/// button was attached to.
pub fn normalize_update(update: &Value) -> UpdateEnvelope {
    let mut envelope = UpdateEnvelope {
        update_id: update.get("update_id").and_then(field::as_int),
        chat_id: None,
        text: None,
        message_id: None,
        callback_data: None,
        from_id: None,
        ts: Utc::now(),
        raw: update.clone(),
    };

    let mut ts = None;
    for key in ["message", "edited_message"] {
        if let Some(message) = update.get(key).filter(|m| m.is_object()) {
            apply(&mut envelope, &mut ts, extract_message_fields(message));
        }
    }

    if let Some(callback) = update.get("callback_query").filter(|c| c.is_object()) {
        if let Some(data) = callback.get("data").and_then(Value::as_str) {
            envelope.callback_data = Some(data.to_string());
        }
        if let Some(message) = callback.get("message").filter(|m| m.is_object()) {
            apply(&mut envelope, &mut ts, extract_message_fields(message));
        }
        if envelope.from_id.is_none() {
            envelope.from_id = callback
                .get("from")
                .and_then(|from| from.get("id"))
                .and_then(field::as_int);
        }
    }

    if let Some(ts) = ts {
        envelope.ts = ts;
    }
    envelope
}

fn apply(envelope: &mut UpdateEnvelope, ts: &mut Option<DateTime<Utc>>, fields: MessageFields) {
    if fields.chat_id.is_some() {
        envelope.chat_id = fields.chat_id;
    }
    if fields.text.is_some() {
        envelope.text = fields.text;
    }
    if fields.message_id.is_some() {
        envelope.message_id = fields.message_id;
    }
    if fields.ts.is_some() {
        *ts = fields.ts;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_plain_message_fields() {
        let update = json!({
            "update_id": 100,
            "message": {
                "message_id": 7,
                "chat": {"id": 55},
                "text": "hello",
                "date": 1714557600
            }
        });
        let env = normalize_update(&update);
        assert_eq!(env.update_id, Some(100));
        assert_eq!(env.chat_id, Some(55));
        assert_eq!(env.text.as_deref(), Some("hello"));
        assert_eq!(env.message_id, Some(7));
        assert_eq!(env.ts, Utc.timestamp_opt(1714557600, 0).unwrap());
        assert_eq!(env.raw, update);
    }

    #[test]
    fn iso_string_date_is_parsed() {
        let update = json!({
            "message": {"chat": {"id": 1}, "date": "2024-05-01T10:00:00+00:00"}
        });
        let env = normalize_update(&update);
        assert_eq!(env.ts, field::parse_ts("2024-05-01T10:00:00+00:00").unwrap());
    }

    #[test]
    fn unparseable_string_date_defaults_to_now() {
        let before = Utc::now();
        let update = json!({
            "message": {"chat": {"id": 1}, "date": "not a date"}
        });
        let env = normalize_update(&update);
        assert!(env.ts >= before);
    }

    #[test]
    fn callback_message_overrides_outer_message() {
        let update = json!({
            "update_id": 5,
            "message": {
                "message_id": 1,
                "chat": {"id": 10},
                "text": "outer",
                "date": 1714557600
            },
            "callback_query": {
                "data": "mood:1",
                "from": {"id": 77},
                "message": {
                    "message_id": 2,
                    "chat": {"id": 20},
                    "text": "inner",
                    "date": 1714561200
                }
            }
        });
        let env = normalize_update(&update);
        assert_eq!(env.chat_id, Some(20));
        assert_eq!(env.text.as_deref(), Some("inner"));
        assert_eq!(env.message_id, Some(2));
        assert_eq!(env.ts, Utc.timestamp_opt(1714561200, 0).unwrap());
        assert_eq!(env.callback_data.as_deref(), Some("mood:1"));
        assert_eq!(env.from_id, Some(77));
    }

    #[test]
    fn callback_without_nested_message_keeps_outer_fields() {
        let update = json!({
            "message": {"chat": {"id": 10}, "text": "outer", "date": 1714557600},
            "callback_query": {"data": "mood:0", "from": {"id": 3}}
        });
        let env = normalize_update(&update);
        assert_eq!(env.chat_id, Some(10));
        assert_eq!(env.text.as_deref(), Some("outer"));
        assert_eq!(env.callback_data.as_deref(), Some("mood:0"));
        assert_eq!(env.from_id, Some(3));
    }

    #[test]
    fn normalization_is_idempotent_over_raw() {
        let update = json!({
            "update_id": 9,
            "message": {
                "message_id": 4,
                "chat": {"id": 10},
                "text": "hi",
                "date": 1714557600
            }
        });
        let first = normalize_update(&update);
        let second = normalize_update(&first.raw);
        assert_eq!(second.update_id, first.update_id);
        assert_eq!(second.chat_id, first.chat_id);
        assert_eq!(second.text, first.text);
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.ts, first.ts);
    }

    #[test]
    fn payload_keeps_ts_as_rfc3339_string() {
        let update = json!({
            "update_id": 1,
            "message": {"chat": {"id": 2}, "date": 1714557600}
        });
        let payload = normalize_update(&update).into_payload();
        assert_eq!(field::int(&payload, "update_id"), Some(1));
        assert_eq!(
            field::ts(&payload, "ts").unwrap(),
            Utc.timestamp_opt(1714557600, 0).unwrap()
        );
        assert!(payload.get("raw").is_some());
    }
}
