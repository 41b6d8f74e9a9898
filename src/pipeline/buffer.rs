//! Buffer admission triggers and the locked flush path.

use chrono::Utc;
use std::sync::Arc;

use crate::blob::{Blob, BlobType};
use crate::config::Config;
use crate::error::{BufferError, Result};
use crate::lock::{LockService, lock_key};
use crate::store::{BufferStatus, BufferStore, ClaimedBatch};

use super::extract::ExtractionEngine;
use super::merge::MergeEngine;
use super::FlushResult;

/// Lock scope covering the whole flush critical section.
const FLUSH_LOCK_SCOPE: &str = "insert_blob";

pub struct BufferManager {
    config: Arc<Config>,
    buffer: BufferStore,
    locks: Arc<dyn LockService>,
    extraction: ExtractionEngine,
    merge: MergeEngine,
}

impl BufferManager {
    pub fn new(
        config: Arc<Config>,
        buffer: BufferStore,
        locks: Arc<dyn LockService>,
        extraction: ExtractionEngine,
        merge: MergeEngine,
    ) -> Self {
        Self {
            config,
            buffer,
            locks,
            extraction,
            merge,
        }
    }

    /// Admit a stored blob into the buffer, running the flush triggers.
    ///
    /// The idle trigger is checked before the new entry lands (a stale
    /// buffer flushes without the new blob, which then starts a fresh
    /// window); the size trigger is checked after. Two admissions racing
    /// past the same threshold can both see it crossed and both reach
    /// flush, where the lock serializes them and the loser finds an empty
    /// buffer. Accepted tradeoff, not worth a second lock on the hot path.
    pub async fn admit(
        &self,
        user_id: &str,
        project_id: &str,
        blob: &Blob,
    ) -> Result<Vec<FlushResult>> {
        let blob_type = blob.blob_type();
        let mut results = Vec::new();

        if self.is_flushable(blob_type) {
            if let Some(newest_idle) = self
                .buffer
                .newest_idle_created_at(user_id, project_id, blob_type)
                .await?
            {
                let age = Utc::now().signed_duration_since(newest_idle);
                if age.num_seconds() >= 0
                    && age.to_std().unwrap_or_default() > self.config.buffer_flush_interval()
                {
                    tracing::info!(user_id, %blob_type, "idle trigger: flushing stale buffer");
                    results.push(self.flush(user_id, project_id, blob_type).await?);
                }
            }
        }

        let token_size = blob.payload.token_size(blob.created_at);
        self.buffer
            .insert_entry(user_id, project_id, &blob.id, blob_type, token_size)
            .await?;

        if self.is_flushable(blob_type) {
            let idle_tokens = self
                .buffer
                .idle_token_total(user_id, project_id, blob_type)
                .await?;
            if idle_tokens > self.config.max_chat_blob_buffer_token_size {
                tracing::info!(
                    user_id,
                    %blob_type,
                    idle_tokens,
                    "size trigger: flushing full buffer"
                );
                results.push(self.flush(user_id, project_id, blob_type).await?);
            }
        }

        Ok(results)
    }

    /// Flush all idle entries of one type for a user, under the per-user
    /// lock. Covers select, transition, extract, merge and finalize.
    pub async fn flush(
        &self,
        user_id: &str,
        project_id: &str,
        blob_type: BlobType,
    ) -> Result<FlushResult> {
        if !self.is_flushable(blob_type) {
            return Err(BufferError::UnsupportedBlobType(blob_type.to_string()).into());
        }

        let key = lock_key(project_id, FLUSH_LOCK_SCOPE, user_id);
        let lease = self
            .locks
            .acquire(
                &key,
                self.config.lock.blocking_timeout(),
                self.config.lock.hold_timeout(),
            )
            .await?;

        let result = self.flush_locked(user_id, project_id, blob_type).await;

        if let Err(e) = self.locks.release(&lease).await {
            tracing::warn!(key, error = %e, "lock release failed");
        }
        result
    }

    async fn flush_locked(
        &self,
        user_id: &str,
        project_id: &str,
        blob_type: BlobType,
    ) -> Result<FlushResult> {
        let batch = self
            .buffer
            .claim_idle_batch(user_id, project_id, blob_type)
            .await?;
        if batch.is_empty() {
            return Ok(FlushResult::NothingToDo);
        }
        let entry_ids: Vec<String> = batch.entries.iter().map(|e| e.id.clone()).collect();

        match self.process_batch(user_id, project_id, &batch).await {
            Ok((delta_len, event_id)) => {
                let delete_blob_ids: Vec<String> = if self.is_ephemeral(blob_type) {
                    batch.blobs.iter().map(|b| b.id.clone()).collect()
                } else {
                    Vec::new()
                };
                if let Err(e) = self
                    .buffer
                    .finalize(&entry_ids, BufferStatus::Done, &delete_blob_ids)
                    .await
                {
                    tracing::error!(user_id, error = %e, "flush finalize failed");
                    return Err(e);
                }
                Ok(FlushResult::Flushed {
                    entries: entry_ids.len(),
                    delta: delta_len,
                    event_id,
                })
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "flush processing failed, marking batch failed");
                if let Err(finalize_err) = self
                    .buffer
                    .finalize(&entry_ids, BufferStatus::Failed, &[])
                    .await
                {
                    tracing::error!(user_id, error = %finalize_err, "failed-batch finalize also failed");
                }
                Err(e)
            }
        }
    }

    async fn process_batch(
        &self,
        user_id: &str,
        project_id: &str,
        batch: &ClaimedBatch,
    ) -> Result<(usize, Option<String>)> {
        let extraction = self
            .extraction
            .extract(user_id, project_id, &batch.blobs)
            .await?;

        // The tip degrades to a delta-only event on failure, it never
        // fails the flush.
        let event_tip = if self.config.enable_event_summary {
            match self
                .extraction
                .entry_summary(&batch.blobs, &extraction.config)
                .await
            {
                Ok(tip) if !tip.is_empty() => Some(tip),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "event summary failed, recording delta only");
                    None
                }
            }
        } else {
            None
        };

        let (delta, event_id) = self
            .merge
            .apply(user_id, project_id, extraction, event_tip)
            .await?;
        Ok((delta.len(), event_id))
    }

    /// Idle entries awaiting flush.
    pub async fn capacity(
        &self,
        user_id: &str,
        project_id: &str,
        blob_type: BlobType,
    ) -> Result<usize> {
        self.buffer.idle_count(user_id, project_id, blob_type).await
    }

    /// Only chat batches have an extraction modality today; other types
    /// accumulate until one exists.
    fn is_flushable(&self, blob_type: BlobType) -> bool {
        blob_type == BlobType::Chat
    }

    fn is_ephemeral(&self, blob_type: BlobType) -> bool {
        blob_type == BlobType::Chat && !self.config.persistent_chat_blobs
    }
}
