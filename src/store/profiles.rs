//! Profile persistence with a read-through cache.
//!
//! The cache holds the serialized profile list per (project, user) and is
//! deleted, never rewritten, on every mutating path. At most one row per
//! (user, topic, sub_topic) is an invariant the merge pipeline upholds;
//! the table itself carries no unique key so historical data can be
//! repaired through the plain update/delete operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{KvCache, profile_cache_key};
use crate::error::{Result, StoreError};
use crate::tokens;

use super::{now_rfc3339, parse_timestamp};

/// The (topic, sub_topic) slot a profile row occupies. Values are expected
/// in unified key form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileAttributes {
    pub topic: String,
    pub sub_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub content: String,
    pub topic: String,
    pub sub_topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ProfileStore {
    pool: SqlitePool,
    cache: Arc<dyn KvCache>,
    cache_ttl: Duration,
}

impl ProfileStore {
    pub fn new(pool: SqlitePool, cache: Arc<dyn KvCache>, cache_ttl: Duration) -> Self {
        Self {
            pool,
            cache,
            cache_ttl,
        }
    }

    /// Newest-updated-first profile list. Cache hit short-circuits; a
    /// corrupt cache entry is dropped and the store read repopulates it.
    pub async fn get_user_profiles(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<Vec<ProfileEntry>> {
        let key = profile_cache_key(project_id, user_id);
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<Vec<ProfileEntry>>(&cached) {
                Ok(profiles) => return Ok(profiles),
                Err(e) => {
                    tracing::warn!(user_id, project_id, error = %e, "corrupt profile cache entry, dropping");
                    self.cache.delete(&key).await;
                }
            }
        }

        let rows = sqlx::query(
            "SELECT id, user_id, project_id, content, topic, sub_topic, created_at, updated_at
             FROM profiles
             WHERE user_id = $1 AND project_id = $2
             ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        let profiles = rows
            .iter()
            .map(map_profile_row)
            .collect::<Result<Vec<_>>>()?;

        if let Ok(serialized) = serde_json::to_string(&profiles) {
            self.cache.set(&key, serialized, self.cache_ttl).await;
        }
        Ok(profiles)
    }

    /// Insert new profile rows; returns their ids.
    pub async fn add_user_profiles(
        &self,
        user_id: &str,
        project_id: &str,
        contents: &[String],
        attributes: &[ProfileAttributes],
    ) -> Result<Vec<String>> {
        if contents.len() != attributes.len() {
            return Err(StoreError::Transaction(
                "profile contents/attributes length mismatch".into(),
            )
            .into());
        }
        let inserts: Vec<(String, ProfileAttributes)> = contents
            .iter()
            .zip(attributes.iter())
            .map(|(content, attrs)| (content.clone(), attrs.clone()))
            .collect();
        let (inserted, _) = self.apply_delta(user_id, project_id, &inserts, &[]).await?;
        Ok(inserted)
    }

    /// Update existing rows in place. Missing ids are logged and skipped;
    /// returns the ids actually updated.
    pub async fn update_user_profiles(
        &self,
        user_id: &str,
        project_id: &str,
        ids: &[String],
        contents: &[String],
    ) -> Result<Vec<String>> {
        if ids.len() != contents.len() {
            return Err(
                StoreError::Transaction("profile ids/contents length mismatch".into()).into(),
            );
        }
        let updates: Vec<(String, String)> = ids
            .iter()
            .cloned()
            .zip(contents.iter().cloned())
            .collect();
        let (_, updated) = self.apply_delta(user_id, project_id, &[], &updates).await?;
        Ok(updated)
    }

    /// Apply a merge delta atomically: inserts and updates in one
    /// transaction, then invalidate the cache key. Returns
    /// (inserted ids, updated ids); update targets that no longer exist
    /// are logged and skipped.
    pub async fn apply_delta(
        &self,
        user_id: &str,
        project_id: &str,
        inserts: &[(String, ProfileAttributes)],
        updates: &[(String, String)],
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Sqlx)?;
        let now = now_rfc3339();

        let mut inserted = Vec::with_capacity(inserts.len());
        for (content, attrs) in inserts {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO profiles
                     (id, user_id, project_id, content, topic, sub_topic, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $7)",
            )
            .bind(&id)
            .bind(user_id)
            .bind(project_id)
            .bind(content)
            .bind(&attrs.topic)
            .bind(&attrs.sub_topic)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Sqlx)?;
            inserted.push(id);
        }

        let mut updated = Vec::with_capacity(updates.len());
        for (id, content) in updates {
            let result = sqlx::query(
                "UPDATE profiles SET content = $1, updated_at = $2
                 WHERE id = $3 AND user_id = $4 AND project_id = $5",
            )
            .bind(content)
            .bind(&now)
            .bind(id)
            .bind(user_id)
            .bind(project_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Sqlx)?;
            if result.rows_affected() == 0 {
                tracing::warn!(user_id, profile_id = %id, "profile vanished before update, skipping");
            } else {
                updated.push(id.clone());
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("apply profile delta: {e}")))?;

        self.cache
            .delete(&profile_cache_key(project_id, user_id))
            .await;
        Ok((inserted, updated))
    }

    pub async fn delete_user_profile(
        &self,
        user_id: &str,
        project_id: &str,
        profile_id: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM profiles WHERE id = $1 AND user_id = $2 AND project_id = $3",
        )
        .bind(profile_id)
        .bind(user_id)
        .bind(project_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("profile", profile_id).into());
        }
        self.cache
            .delete(&profile_cache_key(project_id, user_id))
            .await;
        Ok(())
    }

    /// Batch delete; missing ids are skipped silently.
    pub async fn delete_user_profiles(
        &self,
        user_id: &str,
        project_id: &str,
        profile_ids: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Sqlx)?;
        for profile_id in profile_ids {
            sqlx::query("DELETE FROM profiles WHERE id = $1 AND user_id = $2 AND project_id = $3")
                .bind(profile_id)
                .bind(user_id)
                .bind(project_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Sqlx)?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("delete profiles: {e}")))?;
        self.cache
            .delete(&profile_cache_key(project_id, user_id))
            .await;
        Ok(())
    }
}

fn map_profile_row(row: &SqliteRow) -> Result<ProfileEntry> {
    let created_raw: String = row.try_get("created_at").map_err(StoreError::Sqlx)?;
    let updated_raw: String = row.try_get("updated_at").map_err(StoreError::Sqlx)?;
    Ok(ProfileEntry {
        id: row.try_get("id").map_err(StoreError::Sqlx)?,
        user_id: row.try_get("user_id").map_err(StoreError::Sqlx)?,
        project_id: row.try_get("project_id").map_err(StoreError::Sqlx)?,
        content: row.try_get("content").map_err(StoreError::Sqlx)?,
        topic: row.try_get("topic").map_err(StoreError::Sqlx)?,
        sub_topic: row.try_get("sub_topic").map_err(StoreError::Sqlx)?,
        created_at: parse_timestamp(&created_raw)?,
        updated_at: parse_timestamp(&updated_raw)?,
    })
}

/// Rank and cut a profile list for context assembly: newest-updated first,
/// preferred topics stably hoisted to the front, then an optional top-k
/// cut, then a token-budget cut. The row that crosses the budget is the
/// last one kept.
#[must_use]
pub fn truncate_profiles(
    profiles: &[ProfileEntry],
    prefer_topics: Option<&[String]>,
    topk: Option<usize>,
    max_token_size: Option<usize>,
) -> Vec<ProfileEntry> {
    let mut ranked: Vec<ProfileEntry> = profiles.to_vec();
    ranked.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    if let Some(prefer) = prefer_topics {
        let rank = |p: &ProfileEntry| {
            prefer
                .iter()
                .position(|t| t == &p.topic)
                .unwrap_or(prefer.len())
        };
        ranked.sort_by_key(rank);
    }

    if let Some(k) = topk {
        ranked.truncate(k);
    }

    if let Some(budget) = max_token_size {
        let mut total = 0usize;
        let mut cut = ranked.len();
        for (i, profile) in ranked.iter().enumerate() {
            total += tokens::count_tokens(&profile.content);
            if total > budget {
                cut = i + 1;
                break;
            }
        }
        ranked.truncate(cut);
    }

    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::store::Database;

    fn attrs(topic: &str, sub_topic: &str) -> ProfileAttributes {
        ProfileAttributes {
            topic: topic.into(),
            sub_topic: sub_topic.into(),
        }
    }

    async fn store_with_cache() -> (Database, ProfileStore, Arc<InMemoryCache>) {
        let db = Database::in_memory().await.unwrap();
        let cache = InMemoryCache::new();
        let store = ProfileStore::new(
            db.pool().clone(),
            cache.clone(),
            Duration::from_secs(60),
        );
        (db, store, cache)
    }

    #[tokio::test]
    async fn add_then_get_round_trips_through_cache() {
        let (_db, store, cache) = store_with_cache().await;
        store
            .add_user_profiles(
                "u1",
                "p1",
                &["User is 40".into()],
                &[attrs("basic_info", "age")],
            )
            .await
            .unwrap();

        // First read populates the cache.
        let first = store.get_user_profiles("u1", "p1").await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(cache.get(&profile_cache_key("p1", "u1")).await.is_some());

        let second = store.get_user_profiles("u1", "p1").await.unwrap();
        assert_eq!(second[0].content, "User is 40");
    }

    #[tokio::test]
    async fn every_write_path_invalidates_cache() {
        let (_db, store, cache) = store_with_cache().await;
        let key = profile_cache_key("p1", "u1");

        let ids = store
            .add_user_profiles("u1", "p1", &["v1".into()], &[attrs("work", "goal")])
            .await
            .unwrap();
        store.get_user_profiles("u1", "p1").await.unwrap();
        assert!(cache.get(&key).await.is_some());

        store
            .update_user_profiles("u1", "p1", &ids, &["v2".into()])
            .await
            .unwrap();
        assert!(cache.get(&key).await.is_none());

        store.get_user_profiles("u1", "p1").await.unwrap();
        assert!(cache.get(&key).await.is_some());
        store
            .delete_user_profile("u1", "p1", &ids[0])
            .await
            .unwrap();
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_cache_entry_falls_through_to_store() {
        let (_db, store, cache) = store_with_cache().await;
        store
            .add_user_profiles("u1", "p1", &["v".into()], &[attrs("work", "goal")])
            .await
            .unwrap();
        cache
            .set(
                &profile_cache_key("p1", "u1"),
                "{not json".into(),
                Duration::from_secs(60),
            )
            .await;

        let profiles = store.get_user_profiles("u1", "p1").await.unwrap();
        assert_eq!(profiles.len(), 1);
    }

    #[tokio::test]
    async fn update_skips_missing_ids() {
        let (_db, store, _cache) = store_with_cache().await;
        let updated = store
            .update_user_profiles("u1", "p1", &["ghost".into()], &["v".into()])
            .await
            .unwrap();
        assert!(updated.is_empty());
    }

    #[tokio::test]
    async fn delete_missing_profile_is_not_found() {
        let (_db, store, _cache) = store_with_cache().await;
        let err = store
            .delete_user_profile("u1", "p1", "ghost")
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NotFound);
    }

    fn entry(topic: &str, content: &str, updated_secs: i64) -> ProfileEntry {
        use chrono::TimeZone;
        let at = Utc.timestamp_opt(updated_secs, 0).unwrap();
        ProfileEntry {
            id: Uuid::new_v4().to_string(),
            user_id: "u1".into(),
            project_id: "p1".into(),
            content: content.into(),
            topic: topic.into(),
            sub_topic: "s".into(),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn truncate_orders_and_prefers_topics() {
        let profiles = vec![
            entry("interest", "old interest", 10),
            entry("work", "newer work", 20),
            entry("basic_info", "newest info", 30),
        ];
        let out = truncate_profiles(&profiles, Some(&["work".into()]), None, None);
        assert_eq!(out[0].content, "newer work");
        // remaining rows keep newest-first order
        assert_eq!(out[1].content, "newest info");
        assert_eq!(out[2].content, "old interest");
    }

    #[test]
    fn truncate_topk_and_token_budget() {
        let profiles = vec![
            entry("a", "one two three four five", 30),
            entry("b", "one two three four five", 20),
            entry("c", "one two three four five", 10),
        ];
        assert_eq!(truncate_profiles(&profiles, None, Some(2), None).len(), 2);

        // Tiny budget keeps the overflowing first row and stops there.
        let cut = truncate_profiles(&profiles, None, None, Some(1));
        assert_eq!(cut.len(), 1);
    }
}
