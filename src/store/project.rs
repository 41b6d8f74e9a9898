//! Per-project profile configuration storage.
//!
//! Stored as the raw TOML document so the API can echo back exactly what
//! was uploaded; parsing happens on read and write so a stored document
//! is always loadable.

use sqlx::sqlite::SqlitePool;

use crate::config::ProfileConfig;
use crate::error::{Result, StoreError};

use super::now_rfc3339;

pub struct ProjectConfigStore {
    pool: SqlitePool,
}

impl ProjectConfigStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The project's profile config; a project without one gets defaults.
    pub async fn get(&self, project_id: &str) -> Result<ProfileConfig> {
        match self.get_raw(project_id).await? {
            Some(raw) => ProfileConfig::from_toml_str(&raw),
            None => Ok(ProfileConfig::default()),
        }
    }

    pub async fn get_raw(&self, project_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT profile_config FROM project_configs WHERE project_id = $1")
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Sqlx)?;
        Ok(row.map(|(raw,)| raw))
    }

    /// Validate and upsert the project's config document.
    pub async fn update(&self, project_id: &str, raw: &str) -> Result<()> {
        ProfileConfig::from_toml_str(raw)?;
        sqlx::query(
            "INSERT INTO project_configs (project_id, profile_config, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT(project_id) DO UPDATE
                 SET profile_config = excluded.profile_config,
                     updated_at = excluded.updated_at",
        )
        .bind(project_id)
        .bind(raw)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[tokio::test]
    async fn missing_config_yields_defaults() {
        let db = Database::in_memory().await.unwrap();
        let configs = db.project_configs();
        let config = configs.get("p1").await.unwrap();
        assert!(!config.profile_strict_mode);
        assert!(config.overwrite_user_profiles.is_none());
    }

    #[tokio::test]
    async fn update_round_trips_and_overwrites() {
        let db = Database::in_memory().await.unwrap();
        let configs = db.project_configs();

        configs
            .update("p1", "profile_strict_mode = true")
            .await
            .unwrap();
        assert!(configs.get("p1").await.unwrap().profile_strict_mode);

        configs
            .update("p1", "profile_strict_mode = false")
            .await
            .unwrap();
        assert!(!configs.get("p1").await.unwrap().profile_strict_mode);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_write() {
        let db = Database::in_memory().await.unwrap();
        let configs = db.project_configs();
        assert!(configs.update("p1", "language = [1, 2]").await.is_err());
        assert!(configs.get_raw("p1").await.unwrap().is_none());
    }
}
