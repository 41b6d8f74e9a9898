//! Event log persistence with in-process similarity search.
//!
//! Events are append-only change records; the explicit update/delete
//! operations exist for API-driven editing only, the pipeline never
//! rewrites history. Embeddings are optional: a zero-dimension provider
//! disables similarity search and stores NULL.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::llm::{EmbeddingPhase, EmbeddingProvider};
use crate::tokens;

use super::{cosine_similarity, decode_embedding, encode_embedding, now_rfc3339, parse_timestamp};

/// One line of the profile change applied by a flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDelta {
    pub content: String,
    pub topic: String,
    pub sub_topic: String,
}

/// What a flush recorded: the applied profile delta, optionally augmented
/// with a summarized event tip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub profile_delta: Vec<ProfileDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_tip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_tags: Option<Vec<String>>,
}

impl EventData {
    /// Prompt/embedding rendering: date header plus either the tip or the
    /// delta lines.
    #[must_use]
    pub fn render(&self, created_at: DateTime<Utc>) -> String {
        let header = created_at.format("%Y-%m-%d").to_string();
        let body = match &self.event_tip {
            Some(tip) => {
                let tags = self
                    .event_tags
                    .as_ref()
                    .filter(|tags| !tags.is_empty())
                    .map(|tags| format!("\ntags: {}", tags.join(", ")))
                    .unwrap_or_default();
                format!("{tip}{tags}")
            }
            None => self
                .profile_delta
                .iter()
                .map(|d| format!("- {}::{}: {}", d.topic, d.sub_topic, d.content))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        format!("[{header}]\n{body}")
    }

    fn validate(&self) -> std::result::Result<(), StoreError> {
        if self.profile_delta.is_empty() && self.event_tip.is_none() {
            return Err(StoreError::Invalid(
                "event data needs a profile delta or an event tip".into(),
            ));
        }
        for delta in &self.profile_delta {
            if delta.topic.is_empty() || delta.sub_topic.is_empty() {
                return Err(StoreError::Invalid(
                    "profile delta entries need topic and sub_topic".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub event_data: EventData,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn render(&self) -> String {
        self.event_data.render(self.created_at)
    }
}

pub struct EventStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    embed_max_tokens: usize,
}

impl EventStore {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
        embed_max_tokens: usize,
    ) -> Self {
        Self {
            pool,
            embedder,
            embed_max_tokens,
        }
    }

    /// Embed input is cut to the provider's token ceiling; an oversized
    /// rendering embeds its head rather than failing the call.
    async fn embed_rendering(&self, rendering: &str) -> Result<Option<Vec<u8>>> {
        if self.embedder.dimensions() == 0 {
            return Ok(None);
        }
        let bounded = tokens::truncate_tokens(rendering, self.embed_max_tokens);
        let vector = self
            .embedder
            .embed_one(&bounded, EmbeddingPhase::Document)
            .await?;
        Ok(Some(encode_embedding(&vector)))
    }

    /// Validate, embed and insert one event. Embedding failure is a typed
    /// provider error; nothing is inserted in that case.
    pub async fn append_user_event(
        &self,
        user_id: &str,
        project_id: &str,
        event_data: &EventData,
    ) -> Result<String> {
        event_data.validate()?;

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let rendering = event_data.render(parse_timestamp(&now)?);
        let embedding = self.embed_rendering(&rendering).await?;
        let data_json = serde_json::to_string(event_data).map_err(StoreError::Serialization)?;

        sqlx::query(
            "INSERT INTO events
                 (id, user_id, project_id, event_data, embedding, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(project_id)
        .bind(&data_json)
        .bind(embedding)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(id)
    }

    /// Newest-first events, optionally restricted to tip-bearing ones and
    /// cut to a strict token budget (the overflowing event is excluded).
    pub async fn get_user_events(
        &self,
        user_id: &str,
        project_id: &str,
        topk: usize,
        max_token_size: Option<usize>,
        need_summary: bool,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT id, user_id, project_id, event_data, embedding, created_at, updated_at
             FROM events
             WHERE user_id = $1 AND project_id = $2
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        let mut events = Vec::new();
        let mut spent = 0usize;
        for row in &rows {
            if events.len() >= topk {
                break;
            }
            let event = map_event_row(row)?;
            if need_summary && event.event_data.event_tip.is_none() {
                continue;
            }
            if let Some(budget) = max_token_size {
                let cost = tokens::count_tokens(&event.render());
                if spent + cost > budget {
                    break;
                }
                spent += cost;
            }
            events.push(event);
        }
        Ok(events)
    }

    /// Cosine-rank events against a query within a recency window.
    pub async fn search_user_events(
        &self,
        user_id: &str,
        project_id: &str,
        query: &str,
        topk: usize,
        similarity_threshold: f32,
        time_range_in_days: i64,
    ) -> Result<Vec<(Event, f32)>> {
        if self.embedder.dimensions() == 0 {
            tracing::warn!(user_id, "similarity search disabled: no embedding provider");
            return Ok(Vec::new());
        }

        let query = tokens::truncate_tokens(query, self.embed_max_tokens);
        let query_vector = self
            .embedder
            .embed_one(&query, EmbeddingPhase::Query)
            .await?;
        let since = (Utc::now() - ChronoDuration::days(time_range_in_days))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

        let rows = sqlx::query(
            "SELECT id, user_id, project_id, event_data, embedding, created_at, updated_at
             FROM events
             WHERE user_id = $1 AND project_id = $2 AND created_at >= $3
               AND embedding IS NOT NULL",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(&since)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        let mut scored = Vec::new();
        for row in &rows {
            let event = map_event_row(row)?;
            let Some(embedding) = &event.embedding else {
                continue;
            };
            let score = cosine_similarity(&query_vector, embedding);
            if score >= similarity_threshold {
                scored.push((event, score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(topk);
        Ok(scored)
    }

    pub async fn update_user_event(
        &self,
        user_id: &str,
        project_id: &str,
        event_id: &str,
        event_data: &EventData,
    ) -> Result<()> {
        event_data.validate()?;
        let now = now_rfc3339();
        let rendering = event_data.render(parse_timestamp(&now)?);
        let embedding = self.embed_rendering(&rendering).await?;
        let data_json = serde_json::to_string(event_data).map_err(StoreError::Serialization)?;

        let result = sqlx::query(
            "UPDATE events SET event_data = $1, embedding = $2, updated_at = $3
             WHERE id = $4 AND user_id = $5 AND project_id = $6",
        )
        .bind(&data_json)
        .bind(embedding)
        .bind(&now)
        .bind(event_id)
        .bind(user_id)
        .bind(project_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("event", event_id).into());
        }
        Ok(())
    }

    pub async fn delete_user_event(
        &self,
        user_id: &str,
        project_id: &str,
        event_id: &str,
    ) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM events WHERE id = $1 AND user_id = $2 AND project_id = $3")
                .bind(event_id)
                .bind(user_id)
                .bind(project_id)
                .execute(&self.pool)
                .await
                .map_err(StoreError::Sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("event", event_id).into());
        }
        Ok(())
    }
}

fn map_event_row(row: &SqliteRow) -> Result<Event> {
    let data_raw: String = row.try_get("event_data").map_err(StoreError::Sqlx)?;
    let embedding_raw: Option<Vec<u8>> = row.try_get("embedding").map_err(StoreError::Sqlx)?;
    let created_raw: String = row.try_get("created_at").map_err(StoreError::Sqlx)?;
    let updated_raw: String = row.try_get("updated_at").map_err(StoreError::Sqlx)?;

    Ok(Event {
        id: row.try_get("id").map_err(StoreError::Sqlx)?,
        user_id: row.try_get("user_id").map_err(StoreError::Sqlx)?,
        project_id: row.try_get("project_id").map_err(StoreError::Sqlx)?,
        event_data: serde_json::from_str(&data_raw).map_err(StoreError::Serialization)?,
        embedding: embedding_raw.map(|bytes| decode_embedding(&bytes)),
        created_at: parse_timestamp(&created_raw)?,
        updated_at: parse_timestamp(&updated_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{DeterministicEmbedding, NoopEmbedding};
    use crate::store::Database;

    fn delta(topic: &str, content: &str) -> ProfileDelta {
        ProfileDelta {
            content: content.into(),
            topic: topic.into(),
            sub_topic: "s".into(),
        }
    }

    async fn store(embedder: Arc<dyn EmbeddingProvider>) -> (Database, EventStore) {
        let db = Database::in_memory().await.unwrap();
        let events = EventStore::new(db.pool().clone(), embedder, 8192);
        (db, events)
    }

    #[tokio::test]
    async fn append_and_get_newest_first() {
        let (_db, events) = store(Arc::new(NoopEmbedding)).await;
        for content in ["first", "second"] {
            events
                .append_user_event(
                    "u1",
                    "p1",
                    &EventData {
                        profile_delta: vec![delta("work", content)],
                        ..EventData::default()
                    },
                )
                .await
                .unwrap();
        }

        let loaded = events
            .get_user_events("u1", "p1", 10, None, false)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].event_data.profile_delta[0].content, "second");
    }

    #[tokio::test]
    async fn empty_event_data_is_rejected() {
        let (_db, events) = store(Arc::new(NoopEmbedding)).await;
        let err = events
            .append_user_event("u1", "p1", &EventData::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn need_summary_filters_delta_only_events() {
        let (_db, events) = store(Arc::new(NoopEmbedding)).await;
        events
            .append_user_event(
                "u1",
                "p1",
                &EventData {
                    profile_delta: vec![delta("work", "no tip")],
                    ..EventData::default()
                },
            )
            .await
            .unwrap();
        events
            .append_user_event(
                "u1",
                "p1",
                &EventData {
                    event_tip: Some("user changed jobs".into()),
                    ..EventData::default()
                },
            )
            .await
            .unwrap();

        let summarized = events
            .get_user_events("u1", "p1", 10, None, true)
            .await
            .unwrap();
        assert_eq!(summarized.len(), 1);
        assert_eq!(
            summarized[0].event_data.event_tip.as_deref(),
            Some("user changed jobs")
        );
    }

    #[tokio::test]
    async fn token_budget_excludes_overflowing_event() {
        let (_db, events) = store(Arc::new(NoopEmbedding)).await;
        for i in 0..3 {
            events
                .append_user_event(
                    "u1",
                    "p1",
                    &EventData {
                        profile_delta: vec![delta("work", &format!("event number {i}"))],
                        ..EventData::default()
                    },
                )
                .await
                .unwrap();
        }

        let all = events
            .get_user_events("u1", "p1", 10, None, false)
            .await
            .unwrap();
        let first_cost = tokens::count_tokens(&all[0].render());

        // Budget covers exactly one event; the next one would overflow and
        // is excluded.
        let cut = events
            .get_user_events("u1", "p1", 10, Some(first_cost), false)
            .await
            .unwrap();
        assert_eq!(cut.len(), 1);
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let embedder = Arc::new(DeterministicEmbedding::new(16));
        let (_db, events) = store(embedder).await;
        for content in ["likes climbing mountains", "prefers tea over coffee"] {
            events
                .append_user_event(
                    "u1",
                    "p1",
                    &EventData {
                        profile_delta: vec![delta("interest", content)],
                        ..EventData::default()
                    },
                )
                .await
                .unwrap();
        }

        let hits = events
            .search_user_events("u1", "p1", "anything", 10, -1.0, 30)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].1 >= hits[1].1);
    }

    #[tokio::test]
    async fn embed_input_is_cut_to_the_token_ceiling() {
        let db = Database::in_memory().await.unwrap();
        let events = EventStore::new(
            db.pool().clone(),
            Arc::new(DeterministicEmbedding::new(16)),
            8,
        );

        // Same head, tails diverge past the ceiling: the stored vectors
        // must match because only the bounded head is embedded.
        let head = "shared prefix text";
        for tail in ["first long tail ".repeat(50), "second long tail ".repeat(50)] {
            events
                .append_user_event(
                    "u1",
                    "p1",
                    &EventData {
                        event_tip: Some(format!("{head} {tail}")),
                        ..EventData::default()
                    },
                )
                .await
                .unwrap();
        }

        let loaded = events
            .get_user_events("u1", "p1", 10, None, false)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].embedding, loaded[1].embedding);
        assert!(loaded[0].embedding.is_some());
    }

    #[tokio::test]
    async fn search_is_disabled_without_embedder() {
        let (_db, events) = store(Arc::new(NoopEmbedding)).await;
        events
            .append_user_event(
                "u1",
                "p1",
                &EventData {
                    profile_delta: vec![delta("work", "x")],
                    ..EventData::default()
                },
            )
            .await
            .unwrap();
        let hits = events
            .search_user_events("u1", "p1", "x", 10, 0.0, 30)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn update_and_delete_round_trip() {
        let (_db, events) = store(Arc::new(NoopEmbedding)).await;
        let id = events
            .append_user_event(
                "u1",
                "p1",
                &EventData {
                    profile_delta: vec![delta("work", "before")],
                    ..EventData::default()
                },
            )
            .await
            .unwrap();

        events
            .update_user_event(
                "u1",
                "p1",
                &id,
                &EventData {
                    profile_delta: vec![delta("work", "after")],
                    ..EventData::default()
                },
            )
            .await
            .unwrap();
        let loaded = events
            .get_user_events("u1", "p1", 1, None, false)
            .await
            .unwrap();
        assert_eq!(loaded[0].event_data.profile_delta[0].content, "after");

        events.delete_user_event("u1", "p1", &id).await.unwrap();
        assert!(events.delete_user_event("u1", "p1", &id).await.is_err());
    }

    #[test]
    fn render_prefers_tip_over_delta() {
        use chrono::TimeZone;
        let at = Utc.timestamp_opt(0, 0).unwrap();
        let data = EventData {
            profile_delta: vec![delta("work", "hidden")],
            event_tip: Some("user started a new job".into()),
            event_tags: Some(vec!["work".into()]),
        };
        let rendered = data.render(at);
        assert!(rendered.starts_with("[1970-01-01]"));
        assert!(rendered.contains("user started a new job"));
        assert!(rendered.contains("tags: work"));
        assert!(!rendered.contains("hidden"));
    }
}
