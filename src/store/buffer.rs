//! Buffer entry persistence and the flush-batch state machine.
//!
//! Entries move `idle → processing → {done | failed}` and are never
//! deleted outside account removal. Claiming a batch (select + transition)
//! is a single transaction so two flushers cannot pick up the same idle
//! rows; finalization (status + ephemeral blob deletion) is another.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use uuid::Uuid;

use crate::blob::{Blob, BlobType};
use crate::error::{Result, StoreError};

use super::blobs::map_blob_row;
use super::{now_rfc3339, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    Idle,
    Processing,
    Done,
    Failed,
}

impl BufferStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    fn parse(value: &str) -> std::result::Result<Self, StoreError> {
        match value {
            "idle" => Ok(Self::Idle),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Transaction(format!(
                "unknown buffer status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub blob_id: String,
    pub blob_type: BlobType,
    pub token_size: usize,
    pub status: BufferStatus,
    pub created_at: DateTime<Utc>,
}

/// An idle batch transitioned to `processing`, with blob payloads joined
/// in. Entries and blobs are index-aligned, oldest first.
#[derive(Debug, Default)]
pub struct ClaimedBatch {
    pub entries: Vec<BufferEntry>,
    pub blobs: Vec<Blob>,
}

impl ClaimedBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct BufferStore {
    pool: SqlitePool,
}

impl BufferStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_entry(
        &self,
        user_id: &str,
        project_id: &str,
        blob_id: &str,
        blob_type: BlobType,
        token_size: usize,
    ) -> Result<BufferEntry> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_rfc3339();

        sqlx::query(
            "INSERT INTO buffer_entries
                 (id, user_id, project_id, blob_id, blob_type, token_size, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'idle', $7)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(project_id)
        .bind(blob_id)
        .bind(blob_type.to_string())
        .bind(i64::try_from(token_size).unwrap_or(i64::MAX))
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(BufferEntry {
            id,
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            blob_id: blob_id.to_string(),
            blob_type,
            token_size,
            status: BufferStatus::Idle,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    /// Creation time of the newest idle entry, the reference point for the
    /// idle trigger.
    pub async fn newest_idle_created_at(
        &self,
        user_id: &str,
        project_id: &str,
        blob_type: BlobType,
    ) -> Result<Option<DateTime<Utc>>> {
        let (newest,): (Option<String>,) = sqlx::query_as(
            "SELECT MAX(created_at) FROM buffer_entries
             WHERE user_id = $1 AND project_id = $2 AND blob_type = $3 AND status = 'idle'",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(blob_type.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        match newest {
            Some(raw) => Ok(Some(parse_timestamp(&raw)?)),
            None => Ok(None),
        }
    }

    /// Token-size sum over idle entries, the size-trigger measure.
    pub async fn idle_token_total(
        &self,
        user_id: &str,
        project_id: &str,
        blob_type: BlobType,
    ) -> Result<usize> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(token_size), 0) FROM buffer_entries
             WHERE user_id = $1 AND project_id = $2 AND blob_type = $3 AND status = 'idle'",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(blob_type.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(usize::try_from(total).unwrap_or(0))
    }

    /// Count of idle entries awaiting flush.
    pub async fn idle_count(
        &self,
        user_id: &str,
        project_id: &str,
        blob_type: BlobType,
    ) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM buffer_entries
             WHERE user_id = $1 AND project_id = $2 AND blob_type = $3 AND status = 'idle'",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(blob_type.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Select all idle entries (joined with their blobs, oldest first) and
    /// transition them to `processing` in one transaction. An empty result
    /// leaves no trace.
    pub async fn claim_idle_batch(
        &self,
        user_id: &str,
        project_id: &str,
        blob_type: BlobType,
    ) -> Result<ClaimedBatch> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Sqlx)?;

        let rows = sqlx::query(
            "SELECT e.id AS entry_id, e.blob_id, e.token_size, e.created_at AS entry_created_at,
                    b.id, b.payload, b.created_at
             FROM buffer_entries e
             JOIN blobs b ON b.id = e.blob_id
             WHERE e.user_id = $1 AND e.project_id = $2 AND e.blob_type = $3
               AND e.status = 'idle'
             ORDER BY e.created_at ASC",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(blob_type.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::Sqlx)?;

        if rows.is_empty() {
            tx.rollback().await.map_err(StoreError::Sqlx)?;
            return Ok(ClaimedBatch::default());
        }

        let mut entries = Vec::with_capacity(rows.len());
        let mut blobs = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(map_claimed_entry(row, user_id, project_id, blob_type)?);
            blobs.push(map_blob_row(row)?);
        }

        for entry in &entries {
            sqlx::query("UPDATE buffer_entries SET status = 'processing' WHERE id = $1")
                .bind(&entry.id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Sqlx)?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("claim idle batch: {e}")))?;

        let mut claimed_entries = entries;
        for entry in &mut claimed_entries {
            entry.status = BufferStatus::Processing;
        }
        Ok(ClaimedBatch {
            entries: claimed_entries,
            blobs,
        })
    }

    /// Finalize a processed batch: set the terminal status and delete the
    /// listed blob rows, atomically. A failure rolls the whole step back.
    pub async fn finalize(
        &self,
        entry_ids: &[String],
        status: BufferStatus,
        delete_blob_ids: &[String],
    ) -> Result<()> {
        debug_assert!(matches!(status, BufferStatus::Done | BufferStatus::Failed));
        let mut tx = self.pool.begin().await.map_err(StoreError::Sqlx)?;

        for entry_id in entry_ids {
            sqlx::query("UPDATE buffer_entries SET status = $1 WHERE id = $2")
                .bind(status.as_str())
                .bind(entry_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Sqlx)?;
        }
        for blob_id in delete_blob_ids {
            sqlx::query("DELETE FROM blobs WHERE id = $1")
                .bind(blob_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Sqlx)?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("finalize buffer batch: {e}")))?;
        Ok(())
    }

    /// Status of a single entry, used by tests and diagnostics.
    pub async fn entry_status(&self, entry_id: &str) -> Result<BufferStatus> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM buffer_entries WHERE id = $1")
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Sqlx)?;
        let (raw,) = row.ok_or_else(|| StoreError::not_found("buffer entry", entry_id))?;
        Ok(BufferStatus::parse(&raw)?)
    }
}

fn map_claimed_entry(
    row: &SqliteRow,
    user_id: &str,
    project_id: &str,
    blob_type: BlobType,
) -> Result<BufferEntry> {
    let token_size: i64 = row.try_get("token_size").map_err(StoreError::Sqlx)?;
    let created_raw: String = row.try_get("entry_created_at").map_err(StoreError::Sqlx)?;
    Ok(BufferEntry {
        id: row.try_get("entry_id").map_err(StoreError::Sqlx)?,
        user_id: user_id.to_string(),
        project_id: project_id.to_string(),
        blob_id: row.try_get("blob_id").map_err(StoreError::Sqlx)?,
        blob_type,
        token_size: usize::try_from(token_size).unwrap_or(0),
        status: BufferStatus::Idle,
        created_at: parse_timestamp(&created_raw)?,
    })
}
