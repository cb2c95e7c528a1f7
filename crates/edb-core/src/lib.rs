//! Core pipeline logic for the Emotion Diary bot (Rust port).
//!
//! This crate is intentionally transport-agnostic. The Telegram API client,
//! the polling loop and the webhook listener live in the adapter crate; here
//! we keep the event bus, the pipeline agents and the storage ports they
//! talk to.

pub mod agents;
pub mod bus;
pub mod config;
pub mod errors;
pub mod logging;
pub mod ports;
pub mod storage;

pub use errors::{Error, Result};
