//! Facade wiring every component together.
//!
//! [`Memoloom`] is what an embedding application (or an HTTP layer) talks
//! to: blob ingestion with buffering, explicit flush, profile and event
//! reads/edits, and context assembly. Construction picks concrete
//! providers from configuration; [`Memoloom::with_components`] lets tests
//! and alternate deployments inject their own.

use std::sync::Arc;
use std::time::Instant;

use crate::blob::{Blob, BlobPayload, BlobType};
use crate::cache::{InMemoryCache, KvCache};
use crate::config::{Config, ProfileConfig};
use crate::context::{ContextBuilder, ContextOptions};
use crate::error::Result;
use crate::lock::{InMemoryLockService, LockService};
use crate::llm::{
    CompletionProvider, EmbeddingProvider, create_completion_provider, create_embedding_provider,
};
use crate::pipeline::{BufferManager, ExtractionEngine, FlushResult, MergeEngine};
use crate::store::{
    BlobStore, Database, Event, EventData, EventStore, ProfileAttributes, ProfileEntry,
    ProfileStore, ProjectConfigStore,
};
use crate::telemetry::{
    INSERT_BLOB_REQUEST, INSERT_BLOB_SUCCESS_REQUEST, NoopTelemetry, Telemetry,
};

pub struct Memoloom {
    blobs: BlobStore,
    buffer: BufferManager,
    profiles: Arc<ProfileStore>,
    events: Arc<EventStore>,
    project_configs: Arc<ProjectConfigStore>,
    context: ContextBuilder,
    telemetry: Arc<dyn Telemetry>,
}

impl Memoloom {
    /// Open a database at `path` and wire providers from `config`.
    pub async fn open(config: Config, path: &str) -> Result<Self> {
        let db = Database::connect(path).await?;
        let completion = create_completion_provider(&config.llm);
        let embedder = create_embedding_provider(&config.embedding);
        Self::with_components(
            config,
            db,
            completion,
            embedder,
            InMemoryCache::new(),
            InMemoryLockService::new(),
            Arc::new(NoopTelemetry),
        )
    }

    /// Wire a service from explicit parts.
    #[allow(clippy::needless_pass_by_value)]
    pub fn with_components(
        config: Config,
        db: Database,
        completion: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<dyn KvCache>,
        locks: Arc<dyn LockService>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let profiles = Arc::new(ProfileStore::new(
            db.pool().clone(),
            cache,
            config.cache_user_profiles_ttl(),
        ));
        let events = Arc::new(EventStore::new(
            db.pool().clone(),
            embedder,
            config.embedding.max_token_size,
        ));
        let project_configs = Arc::new(db.project_configs());

        let extraction = ExtractionEngine::new(
            config.clone(),
            completion.clone(),
            profiles.clone(),
            project_configs.clone(),
        );
        let merge = MergeEngine::new(
            config.clone(),
            completion,
            profiles.clone(),
            events.clone(),
        );
        let buffer = BufferManager::new(config, db.buffer(), locks, extraction, merge);

        Ok(Self {
            blobs: db.blobs(),
            buffer,
            profiles: profiles.clone(),
            events: events.clone(),
            project_configs,
            context: ContextBuilder::new(profiles, events),
            telemetry,
        })
    }

    // ── Ingestion ────────────────────────────────────────────────

    /// Store a blob and admit it into the buffer. Returns the blob id and
    /// whatever flushes the admission triggered.
    pub async fn insert_blob(
        &self,
        user_id: &str,
        project_id: &str,
        payload: BlobPayload,
    ) -> Result<(String, Vec<FlushResult>)> {
        self.telemetry.incr_counter(INSERT_BLOB_REQUEST);
        let started = Instant::now();

        let blob = self.blobs.insert(user_id, project_id, &payload).await?;
        let flushes = self.buffer.admit(user_id, project_id, &blob).await?;

        self.telemetry.incr_counter(INSERT_BLOB_SUCCESS_REQUEST);
        self.telemetry
            .record_latency(INSERT_BLOB_REQUEST, started.elapsed());
        Ok((blob.id, flushes))
    }

    pub async fn get_blob(
        &self,
        user_id: &str,
        project_id: &str,
        blob_id: &str,
    ) -> Result<Blob> {
        self.blobs.get(user_id, project_id, blob_id).await
    }

    /// Flush all idle entries of one type for a user, now.
    pub async fn flush(
        &self,
        user_id: &str,
        project_id: &str,
        blob_type: BlobType,
    ) -> Result<FlushResult> {
        self.buffer.flush(user_id, project_id, blob_type).await
    }

    /// Idle buffer entries awaiting flush.
    pub async fn buffer_capacity(
        &self,
        user_id: &str,
        project_id: &str,
        blob_type: BlobType,
    ) -> Result<usize> {
        self.buffer.capacity(user_id, project_id, blob_type).await
    }

    // ── Profiles ─────────────────────────────────────────────────

    pub async fn get_user_profiles(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<Vec<ProfileEntry>> {
        self.profiles.get_user_profiles(user_id, project_id).await
    }

    pub async fn add_user_profiles(
        &self,
        user_id: &str,
        project_id: &str,
        contents: &[String],
        attributes: &[ProfileAttributes],
    ) -> Result<Vec<String>> {
        self.profiles
            .add_user_profiles(user_id, project_id, contents, attributes)
            .await
    }

    pub async fn update_user_profiles(
        &self,
        user_id: &str,
        project_id: &str,
        ids: &[String],
        contents: &[String],
    ) -> Result<Vec<String>> {
        self.profiles
            .update_user_profiles(user_id, project_id, ids, contents)
            .await
    }

    pub async fn delete_user_profile(
        &self,
        user_id: &str,
        project_id: &str,
        profile_id: &str,
    ) -> Result<()> {
        self.profiles
            .delete_user_profile(user_id, project_id, profile_id)
            .await
    }

    // ── Events ───────────────────────────────────────────────────

    pub async fn get_user_events(
        &self,
        user_id: &str,
        project_id: &str,
        topk: usize,
        max_token_size: Option<usize>,
        need_summary: bool,
    ) -> Result<Vec<Event>> {
        self.events
            .get_user_events(user_id, project_id, topk, max_token_size, need_summary)
            .await
    }

    pub async fn search_user_events(
        &self,
        user_id: &str,
        project_id: &str,
        query: &str,
        topk: usize,
        similarity_threshold: f32,
        time_range_in_days: i64,
    ) -> Result<Vec<(Event, f32)>> {
        self.events
            .search_user_events(
                user_id,
                project_id,
                query,
                topk,
                similarity_threshold,
                time_range_in_days,
            )
            .await
    }

    pub async fn update_user_event(
        &self,
        user_id: &str,
        project_id: &str,
        event_id: &str,
        event_data: &EventData,
    ) -> Result<()> {
        self.events
            .update_user_event(user_id, project_id, event_id, event_data)
            .await
    }

    pub async fn delete_user_event(
        &self,
        user_id: &str,
        project_id: &str,
        event_id: &str,
    ) -> Result<()> {
        self.events
            .delete_user_event(user_id, project_id, event_id)
            .await
    }

    // ── Context / project config ─────────────────────────────────

    pub async fn get_user_context(
        &self,
        user_id: &str,
        project_id: &str,
        opts: &ContextOptions,
    ) -> Result<String> {
        self.context
            .get_user_context(user_id, project_id, opts)
            .await
    }

    pub async fn get_project_profile_config(&self, project_id: &str) -> Result<ProfileConfig> {
        self.project_configs.get(project_id).await
    }

    pub async fn update_project_profile_config(
        &self,
        project_id: &str,
        raw_toml: &str,
    ) -> Result<()> {
        self.project_configs.update(project_id, raw_toml).await
    }
}
