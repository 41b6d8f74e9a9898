//! Relational persistence over `sqlx`/SQLite.
//!
//! One [`Database`] owns the pool and the schema; per-entity stores borrow
//! pool clones and expose typed operations. Timestamps are RFC3339 TEXT
//! (UTC), embeddings are little-endian f32 BLOBs ranked in-process. All
//! writes that must be atomic across tables go through explicit
//! transactions on the calling store.

mod blobs;
mod buffer;
mod events;
mod profiles;
mod project;

pub use blobs::BlobStore;
pub use buffer::{BufferEntry, BufferStatus, BufferStore, ClaimedBatch};
pub use events::{Event, EventData, EventStore, ProfileDelta};
pub use profiles::{ProfileAttributes, ProfileEntry, ProfileStore, truncate_profiles};
pub use project::ProjectConfigStore;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::{Result, StoreError};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) a database at `path` and ensure the schema.
    pub async fn connect(path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&format!("sqlite://{path}?mode=rwc"))
            .await
            .map_err(StoreError::Sqlx)?;
        Self::with_pool(pool).await
    }

    /// In-memory database, used by tests.
    pub async fn in_memory() -> Result<Self> {
        // A single connection keeps every handle on the same :memory: db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(StoreError::Sqlx)?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[must_use]
    pub fn blobs(&self) -> BlobStore {
        BlobStore::new(self.pool.clone())
    }

    #[must_use]
    pub fn buffer(&self) -> BufferStore {
        BufferStore::new(self.pool.clone())
    }

    #[must_use]
    pub fn project_configs(&self) -> ProjectConfigStore {
        ProjectConfigStore::new(self.pool.clone())
    }
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StoreError::Sqlx)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS blobs (
             id TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             project_id TEXT NOT NULL,
             blob_type TEXT NOT NULL,
             payload TEXT NOT NULL,
             created_at TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await
    .map_err(StoreError::Sqlx)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS buffer_entries (
             id TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             project_id TEXT NOT NULL,
             blob_id TEXT NOT NULL,
             blob_type TEXT NOT NULL,
             token_size INTEGER NOT NULL,
             status TEXT NOT NULL DEFAULT 'idle',
             created_at TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await
    .map_err(StoreError::Sqlx)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_buffer_user_type_status
             ON buffer_entries(user_id, project_id, blob_type, status, created_at)",
    )
    .execute(pool)
    .await
    .map_err(StoreError::Sqlx)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS profiles (
             id TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             project_id TEXT NOT NULL,
             content TEXT NOT NULL,
             topic TEXT NOT NULL,
             sub_topic TEXT NOT NULL,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await
    .map_err(StoreError::Sqlx)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_profiles_user
             ON profiles(user_id, project_id, updated_at)",
    )
    .execute(pool)
    .await
    .map_err(StoreError::Sqlx)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS events (
             id TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             project_id TEXT NOT NULL,
             event_data TEXT NOT NULL,
             embedding BLOB,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await
    .map_err(StoreError::Sqlx)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_events_user
             ON events(user_id, project_id, created_at)",
    )
    .execute(pool)
    .await
    .map_err(StoreError::Sqlx)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS project_configs (
             project_id TEXT PRIMARY KEY,
             profile_config TEXT NOT NULL,
             updated_at TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await
    .map_err(StoreError::Sqlx)?;

    Ok(())
}

// ─── Shared row helpers ─────────────────────────────────────────────────────

pub(crate) fn now_rfc3339() -> String {
    // Fixed precision so lexical ORDER BY matches chronological order.
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Transaction(format!("invalid stored timestamp '{raw}': {e}")))
}

// ─── Embedding BLOB codec ───────────────────────────────────────────────────

#[must_use]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[must_use]
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_schema_initializes() {
        let db = Database::in_memory().await.unwrap();
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
             ('blobs', 'buffer_entries', 'profiles', 'events', 'project_configs')",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(count.0, 5);
    }

    #[tokio::test]
    async fn connect_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memoloom.db");
        let db = Database::connect(path.to_str().unwrap()).await.unwrap();
        sqlx::query("INSERT INTO project_configs (project_id, profile_config, updated_at) VALUES ('p', '', ?)")
            .bind(now_rfc3339())
            .execute(db.pool())
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn embedding_codec_round_trips() {
        let vector = vec![0.5f32, -1.25, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&vector)), vector);
    }

    #[test]
    fn cosine_similarity_basics() {
        let a = [1.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[test]
    fn timestamp_round_trip() {
        let raw = now_rfc3339();
        assert!(parse_timestamp(&raw).is_ok());
        assert!(parse_timestamp("not a time").is_err());
    }
}
