//! Read interfaces onto the Photo Store and Config Store.
//!
//! The search engine only reads. `SqliteStore` also exposes the two writes
//! needed to seed a gallery and save provider settings from the CLI.

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("value for {key} is not valid JSON: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no photo store configured")]
    Unavailable,
}

/// A gallery photo being tested against the probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePhoto {
    pub id: String,
    /// URL, `data:` URL or filesystem path resolvable to image bytes.
    pub locator: String,
}

impl CandidatePhoto {
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
        }
    }
}

/// A candidate that matched the probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMatch {
    pub id: String,
    /// Best descriptor distance (local) or the API's score (remote).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn list_candidates(&self, event_id: &str) -> Result<Vec<CandidatePhoto>, StoreError>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
}

/// In-process store, used by tests and embedders that already hold the data.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<String, Vec<CandidatePhoto>>>,
    settings: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_event(&self, event_id: impl Into<String>, photos: Vec<CandidatePhoto>) {
        if let Ok(mut events) = self.events.write() {
            events.insert(event_id.into(), photos);
        }
    }

    pub fn set_setting(&self, key: impl Into<String>, value: serde_json::Value) {
        if let Ok(mut settings) = self.settings.write() {
            settings.insert(key.into(), value);
        }
    }
}

#[async_trait]
impl PhotoStore for MemoryStore {
    async fn list_candidates(&self, event_id: &str) -> Result<Vec<CandidatePhoto>, StoreError> {
        Ok(self
            .events
            .read()
            .ok()
            .and_then(|events| events.get(event_id).cloned())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .settings
            .read()
            .ok()
            .and_then(|settings| settings.get(key).cloned()))
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS photos (
    id         TEXT PRIMARY KEY,
    event_id   TEXT NOT NULL,
    src        TEXT NOT NULL,
    original   TEXT,
    created_at INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_photos_event ON photos(event_id);
";

/// SQLite-backed gallery and settings store.
///
/// Settings values are stored as JSON text; a value that is not valid JSON
/// is returned as a plain string.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn save_setting(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    rusqlite::params![key, text],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn add_photo(
        &self,
        event_id: &str,
        photo: &CandidatePhoto,
        created_at: i64,
    ) -> Result<(), StoreError> {
        let (event_id, id, src) = (event_id.to_string(), photo.id.clone(), photo.locator.clone());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO photos (id, event_id, src, created_at) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, event_id, src, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PhotoStore for SqliteStore {
    async fn list_candidates(&self, event_id: &str) -> Result<Vec<CandidatePhoto>, StoreError> {
        let event_id = event_id.to_string();
        let photos = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, src FROM photos WHERE event_id = ?1 ORDER BY created_at, id",
                )?;
                let rows = stmt
                    .query_map([event_id], |row| {
                        Ok(CandidatePhoto {
                            id: row.get(0)?,
                            locator: row.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(photos)
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let key = key.to_string();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
                    .optional()?)
            })
            .await?;

        Ok(raw.map(|text| {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        }))
    }
}
