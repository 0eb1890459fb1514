//! Lifecycle of the remote vector index owned by each knowledge source.
//!
//! Highlights:
//!
//! - `ensure_index` is a get-or-create that trusts a persisted handle without a network round
//!   trip. Creation is serialized per source in-process and guarded by a compare-and-set in the
//!   metadata store, so two writers never leave two indexes attached to one source.
//! - `attach_files` submits at most `batch_size` files per provider call and waits for each
//!   batch to finish before moving on; the source's `index_updated_at` moves only after every
//!   batch completed.
//! - `detach_file` and `delete_index` are best-effort and report failure as `false`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::{Config, MAX_ATTACH_BATCH_SIZE};
use crate::knowledge::{KnowledgeSource, profile_for};
use crate::provider::{
    BatchState, ExpirationPolicy, FileBatch, IndexStatus, IndexingProvider, ProviderError,
};
use crate::store::{IndexClaim, MetadataStore, StoreError};

const MAX_INDEX_NAME_CHARS: usize = 256;

/// Errors raised by [`VectorIndexManager`].
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indexing provider call failed.
    #[error("Indexing provider failed: {0}")]
    Provider(#[from] ProviderError),
    /// Metadata store call failed.
    #[error("Metadata store failed: {0}")]
    Store(#[from] StoreError),
    /// Source does not exist.
    #[error("Knowledge source {0} not found")]
    SourceNotFound(Uuid),
}

/// Tunables for index management.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Expiration applied to newly created indexes.
    pub expiration_days: u32,
    /// Files per attach batch, at most [`MAX_ATTACH_BATCH_SIZE`].
    pub batch_size: usize,
    /// Delay between batch status polls.
    pub poll_interval: Duration,
    /// Optional deadline per batch; `None` polls until the provider finishes.
    pub poll_timeout: Option<Duration>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            expiration_days: 30,
            batch_size: MAX_ATTACH_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            poll_timeout: None,
        }
    }
}

impl IndexSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            expiration_days: config.index_expiration_days,
            batch_size: config.attach_batch_size,
            poll_interval: Duration::from_millis(config.attach_poll_interval_ms),
            poll_timeout: config.attach_poll_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Owns get-or-create, attach, detach and expiration of per-source indexes.
pub struct VectorIndexManager {
    provider: Arc<dyn IndexingProvider>,
    store: Arc<dyn MetadataStore>,
    settings: IndexSettings,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl VectorIndexManager {
    /// Build a manager over a provider and the metadata store.
    pub fn new(
        provider: Arc<dyn IndexingProvider>,
        store: Arc<dyn MetadataStore>,
        settings: IndexSettings,
    ) -> Self {
        Self {
            provider,
            store,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return the source's index, creating and persisting one if it has none.
    pub async fn ensure_index(&self, source_id: Uuid) -> Result<String, IndexError> {
        let source = self.load_source(source_id).await?;
        if let Some(index_id) = source.index_id {
            return Ok(index_id);
        }

        let lock = self.source_lock(source_id);
        let created = {
            let _guard = lock.lock().await;
            self.create_index_locked(source_id).await
        };
        self.release_lock(source_id, lock);
        created
    }

    async fn create_index_locked(&self, source_id: Uuid) -> Result<String, IndexError> {
        // Re-read under the lock: a concurrent caller may have created it meanwhile.
        let source = self.load_source(source_id).await?;
        if let Some(index_id) = source.index_id {
            return Ok(index_id);
        }

        let name = index_name(&source);
        let expiration = ExpirationPolicy {
            days: self.settings.expiration_days,
        };
        let created = self.provider.create_index(&name, expiration).await?;

        match self.store.claim_index_id(source_id, &created).await {
            Ok(IndexClaim::Claimed) => {
                tracing::info!(
                    source_id = %source_id,
                    index_id = %created,
                    expiration_days = expiration.days,
                    "Vector index created"
                );
                Ok(created)
            }
            Ok(IndexClaim::Existing(existing)) => {
                tracing::warn!(
                    source_id = %source_id,
                    index_id = %existing,
                    discarded = %created,
                    "Another writer created the index first; discarding ours"
                );
                self.delete_index(&created).await;
                Ok(existing)
            }
            Err(error) => {
                self.delete_index(&created).await;
                Err(error.into())
            }
        }
    }

    /// Attach files to an index in bounded batches, waiting for each batch to complete.
    pub async fn attach_files(
        &self,
        source_id: Uuid,
        index_id: &str,
        file_ids: &[String],
        content_tag: &str,
    ) -> Result<(), IndexError> {
        if file_ids.is_empty() {
            return Ok(());
        }

        let profile = profile_for(content_tag);
        let batch_size = self.settings.batch_size.clamp(1, MAX_ATTACH_BATCH_SIZE);
        let batches = file_ids.len().div_ceil(batch_size);
        for (position, chunk) in file_ids.chunks(batch_size).enumerate() {
            let batch = self
                .provider
                .attach_files_batch(index_id, chunk, profile)
                .await?;
            tracing::debug!(
                index_id,
                batch_id = %batch.id,
                batch = position + 1,
                batches,
                files = chunk.len(),
                "Attach batch submitted"
            );
            self.wait_for_batch(index_id, batch).await?;
        }

        self.store
            .touch_index_updated_at(source_id, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(
            source_id = %source_id,
            index_id,
            files = file_ids.len(),
            batches,
            content_tag,
            "Files attached"
        );
        Ok(())
    }

    /// Remove a file from an index. Never fails; returns whether the detach succeeded.
    pub async fn detach_file(&self, index_id: &str, file_id: &str) -> bool {
        match self.provider.detach_file(index_id, file_id).await {
            Ok(()) => {
                tracing::debug!(index_id, file_id, "File detached");
                true
            }
            Err(error) => {
                tracing::warn!(index_id, file_id, error = %error, "File detach failed");
                false
            }
        }
    }

    /// Replace the expiration policy of an index.
    pub async fn refresh_expiration(&self, index_id: &str, days: u32) -> Result<(), IndexError> {
        self.provider
            .update_expiration(index_id, ExpirationPolicy { days })
            .await?;
        tracing::info!(index_id, days, "Index expiration refreshed");
        Ok(())
    }

    /// Fetch the provider-side status of an index.
    pub async fn status(&self, index_id: &str) -> Result<IndexStatus, IndexError> {
        Ok(self.provider.retrieve_index(index_id).await?)
    }

    /// Delete a whole index. Never fails; returns whether the delete succeeded.
    pub async fn delete_index(&self, index_id: &str) -> bool {
        match self.provider.delete_index(index_id).await {
            Ok(()) => {
                tracing::info!(index_id, "Vector index deleted");
                true
            }
            Err(error) => {
                tracing::warn!(index_id, error = %error, "Vector index delete failed");
                false
            }
        }
    }

    async fn load_source(&self, source_id: Uuid) -> Result<KnowledgeSource, IndexError> {
        self.store
            .get_source(source_id)
            .await?
            .ok_or(IndexError::SourceNotFound(source_id))
    }

    fn source_lock(&self, source_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(source_id).or_default().clone()
    }

    /// Drop the source's lock entry once no other caller is waiting on it.
    fn release_lock(&self, source_id: Uuid, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&source_id);
        }
    }

    async fn wait_for_batch(&self, index_id: &str, mut batch: FileBatch) -> Result<(), IndexError> {
        let started = Instant::now();
        loop {
            if batch.status.is_terminal() {
                if batch.status == BatchState::Completed {
                    return Ok(());
                }
                tracing::error!(
                    index_id,
                    batch_id = %batch.id,
                    state = ?batch.status,
                    failed = batch.file_counts.failed,
                    "Attach batch did not complete"
                );
                return Err(ProviderError::BatchFailed {
                    batch_id: batch.id,
                    state: batch.status,
                }
                .into());
            }

            if let Some(limit) = self.settings.poll_timeout
                && started.elapsed() >= limit
            {
                return Err(ProviderError::PollTimeout {
                    batch_id: batch.id,
                    waited: started.elapsed(),
                }
                .into());
            }

            tokio::time::sleep(self.settings.poll_interval).await;
            batch = self.provider.batch_status(index_id, &batch.id).await?;
        }
    }
}

fn index_name(source: &KnowledgeSource) -> String {
    let trimmed = source.name.trim();
    if trimmed.is_empty() {
        return format!("knowledge-{}", source.id);
    }
    trimmed.chars().take(MAX_INDEX_NAME_CHARS).collect()
}
