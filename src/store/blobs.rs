//! Raw blob persistence.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use uuid::Uuid;

use crate::blob::{Blob, BlobPayload};
use crate::error::{Result, StoreError};

use super::{now_rfc3339, parse_timestamp};

pub struct BlobStore {
    pool: SqlitePool,
}

impl BlobStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a blob and return it as loaded for processing.
    pub async fn insert(
        &self,
        user_id: &str,
        project_id: &str,
        payload: &BlobPayload,
    ) -> Result<Blob> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_rfc3339();
        let payload_json =
            serde_json::to_string(payload).map_err(StoreError::Serialization)?;

        sqlx::query(
            "INSERT INTO blobs (id, user_id, project_id, blob_type, payload, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(project_id)
        .bind(payload.blob_type().to_string())
        .bind(&payload_json)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(Blob {
            id,
            payload: payload.clone(),
            created_at: parse_timestamp(&created_at)?,
        })
    }

    pub async fn get(&self, user_id: &str, project_id: &str, blob_id: &str) -> Result<Blob> {
        let row = sqlx::query(
            "SELECT id, payload, created_at FROM blobs
             WHERE id = $1 AND user_id = $2 AND project_id = $3",
        )
        .bind(blob_id)
        .bind(user_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?
        .ok_or_else(|| StoreError::not_found("blob", blob_id))?;

        map_blob_row(&row)
    }

    pub async fn delete(&self, user_id: &str, project_id: &str, blob_id: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM blobs WHERE id = $1 AND user_id = $2 AND project_id = $3",
        )
        .bind(blob_id)
        .bind(user_id)
        .bind(project_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("blob", blob_id).into());
        }
        Ok(())
    }
}

pub(crate) fn map_blob_row(row: &SqliteRow) -> Result<Blob> {
    let payload_raw: String = row.try_get("payload").map_err(StoreError::Sqlx)?;
    let created_raw: String = row.try_get("created_at").map_err(StoreError::Sqlx)?;
    let payload: BlobPayload =
        serde_json::from_str(&payload_raw).map_err(StoreError::Serialization)?;
    Ok(Blob {
        id: row.try_get("id").map_err(StoreError::Sqlx)?,
        payload,
        created_at: parse_timestamp(&created_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::ChatMessage;
    use crate::store::Database;

    #[tokio::test]
    async fn insert_get_delete_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let blobs = db.blobs();

        let payload = BlobPayload::Chat {
            messages: vec![ChatMessage::new("user", "hello")],
        };
        let inserted = blobs.insert("u1", "p1", &payload).await.unwrap();
        let loaded = blobs.get("u1", "p1", &inserted.id).await.unwrap();
        assert_eq!(loaded.payload, payload);

        blobs.delete("u1", "p1", &inserted.id).await.unwrap();
        assert!(blobs.get("u1", "p1", &inserted.id).await.is_err());
    }

    #[tokio::test]
    async fn get_is_scoped_to_user_and_project() {
        let db = Database::in_memory().await.unwrap();
        let blobs = db.blobs();
        let payload = BlobPayload::Doc {
            content: "doc".into(),
        };
        let inserted = blobs.insert("u1", "p1", &payload).await.unwrap();

        assert!(blobs.get("u2", "p1", &inserted.id).await.is_err());
        assert!(blobs.get("u1", "p2", &inserted.id).await.is_err());
    }
}
