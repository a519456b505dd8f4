//! Durable draft slot for an in-progress registration.

use super::form::GuardFormData;
use super::rules::Step;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::warn;

/// Storage key of the single registration draft.
pub const DRAFT_KEY: &str = "guard_registration_draft";

/// Bumped when `GuardFormData` changes shape incompatibly.
pub const DRAFT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum DraftError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Draft store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftEnvelope {
    pub data: GuardFormData,
    pub saved_at: DateTime<Utc>,
    pub current_step: Step,
    pub version: u32,
}

impl DraftEnvelope {
    pub fn new(data: GuardFormData, current_step: Step) -> Self {
        Self {
            data,
            saved_at: Utc::now(),
            current_step,
            version: DRAFT_VERSION,
        }
    }
}

/// Key/value slot storage backed by SQLite.
#[derive(Clone)]
pub struct DraftStore {
    conn: Arc<Mutex<Connection>>,
}

impl DraftStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DraftError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, DraftError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DraftError> {
        conn.execute_batch(include_str!("../../migrations/000001_local_storage.up.sql"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DraftError> {
        self.conn.lock().map_err(|_| DraftError::LockPoisoned)
    }

    // --- Raw slots ---

    pub fn get_item(&self, key: &str) -> Result<Option<String>, DraftError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), DraftError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO local_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<(), DraftError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM local_storage WHERE key = ?1", params![key])?;
        Ok(())
    }

    // --- Registration draft ---

    pub fn save_draft(&self, envelope: &DraftEnvelope) -> Result<(), DraftError> {
        let json = serde_json::to_string(envelope)?;
        self.set_item(DRAFT_KEY, &json)
    }

    /// Load the saved draft. Unreadable or outdated drafts are dropped.
    pub fn load_draft(&self) -> Result<Option<DraftEnvelope>, DraftError> {
        let Some(raw) = self.get_item(DRAFT_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str::<DraftEnvelope>(&raw) {
            Ok(envelope) if envelope.version == DRAFT_VERSION => Ok(Some(envelope)),
            Ok(envelope) => {
                warn!(version = envelope.version, "Discarding draft with unsupported version");
                self.clear_draft()?;
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable draft");
                self.clear_draft()?;
                Ok(None)
            }
        }
    }

    pub fn clear_draft(&self) -> Result<(), DraftError> {
        self.remove_item(DRAFT_KEY)
    }
}
