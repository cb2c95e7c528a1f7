//! Telegram transport adapter for the Emotion Diary bot.
//!
//! Everything Telegram-specific lives here: the raw-update normalizer, the
//! Bot API client, the long-poll driver, the webhook listener and the
//! outbound responder. The core pipeline only ever sees canonical payloads
//! on the bus and the ports defined in `edb-core`.

pub mod api;
pub mod normalize;
pub mod polling;
pub mod responder;
pub mod webhook;
