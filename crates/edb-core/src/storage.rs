//! Storage port and the in-memory implementation used by the pipeline.
//!
//! The bot never stores raw chat ids next to diary data: the stable user
//! reference (`pid`) is an HMAC of the chat id keyed by a deployment salt,
//! and the `ident` record is the only place the two meet.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::Result;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_IDENT_SALT: &str = "emotion-diary-dev";

/// Chat-to-user binding.
#[derive(Clone, Debug, Serialize)]
pub struct Ident {
    pub pid: String,
    pub chat_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Mood journal entry persisted for a user.
#[derive(Clone, Debug, Serialize)]
pub struct Entry {
    pub id: i64,
    pub pid: String,
    pub ts: DateTime<Utc>,
    pub mood: i64,
    pub note: Option<String>,
}

/// Persistence port consumed by the agents.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_or_create_ident(&self, chat_id: i64) -> Result<Ident>;
    async fn save_entry(
        &self,
        pid: &str,
        ts: DateTime<Utc>,
        mood: i64,
        note: Option<String>,
    ) -> Result<Entry>;
    async fn list_entries(&self, pid: &str) -> Result<Vec<Entry>>;
    async fn delete_user(&self, pid: &str) -> Result<()>;
}

/// Deterministic pid for a chat id under the given salt.
pub fn hash_chat_id(salt: &str, chat_id: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC can take key of any size");
    mac.update(chat_id.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Default)]
struct MemoryState {
    idents: HashMap<i64, Ident>,
    entries: Vec<Entry>,
    next_entry_id: i64,
}

/// Mutex-guarded in-memory storage.
pub struct MemoryStorage {
    ident_salt: String,
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new(ident_salt: impl Into<String>) -> Self {
        Self {
            ident_salt: ident_salt.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_IDENT_SALT)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_or_create_ident(&self, chat_id: i64) -> Result<Ident> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ident) = state.idents.get(&chat_id) {
            return Ok(ident.clone());
        }
        let ident = Ident {
            pid: hash_chat_id(&self.ident_salt, chat_id),
            chat_id,
            created_at: Utc::now(),
        };
        state.idents.insert(chat_id, ident.clone());
        Ok(ident)
    }

    async fn save_entry(
        &self,
        pid: &str,
        ts: DateTime<Utc>,
        mood: i64,
        note: Option<String>,
    ) -> Result<Entry> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_entry_id += 1;
        let entry = Entry {
            id: state.next_entry_id,
            pid: pid.to_string(),
            ts,
            mood,
            note,
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_entries(&self, pid: &str) -> Result<Vec<Entry>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<Entry> = state
            .entries
            .iter()
            .filter(|e| e.pid == pid)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.ts);
        Ok(entries)
    }

    async fn delete_user(&self, pid: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.retain(|e| e.pid != pid);
        state.idents.retain(|_, ident| ident.pid != pid);
        Ok(())
    }
}
