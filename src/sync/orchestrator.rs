//! Per-mutation sync pipeline: formatter → upload → attach → metadata → agents.
//!
//! Every content mutation runs the same ordered chain:
//!
//! 1. ensure the source's index exists;
//! 2. retire the item's previous file (catalogs always, any item on update);
//! 3. format the canonical document;
//! 4. upload it (fatal on failure);
//! 5. attach it to the index (failure recorded, flow continues);
//! 6. persist the new file handle and bump `index_updated_at`;
//! 7. push the recomputed index set to every dependent agent (failure recorded).
//!
//! Payloads are validated before step 1, so rejected input never reaches the provider.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use super::types::{
    AgentPropagation, AgentRegistration, DeletionOutcome, RemoteCleanup, SourceDeletionOutcome,
    SyncError, SyncOutcome,
};
use crate::agents::{AgentRuntime, AgentSyncError, AgentSynchronizer};
use crate::index::{IndexSettings, VectorIndexManager};
use crate::knowledge::{
    Agent, ContentItem, ContentPayload, KnowledgeSource, ValidationError, format,
};
use crate::metrics::{MetricsSnapshot, SyncMetrics};
use crate::provider::{IndexStatus, IndexingProvider, RemoteFileStore};
use crate::store::MetadataStore;

/// Drives content mutations through the sync chain.
pub struct KnowledgeSyncOrchestrator {
    store: Arc<dyn MetadataStore>,
    files: RemoteFileStore,
    indexes: VectorIndexManager,
    agents: AgentSynchronizer,
    metrics: SyncMetrics,
}

impl KnowledgeSyncOrchestrator {
    /// Wire the orchestrator to its collaborators.
    pub fn new(
        provider: Arc<dyn IndexingProvider>,
        runtime: Arc<dyn AgentRuntime>,
        store: Arc<dyn MetadataStore>,
        settings: IndexSettings,
    ) -> Self {
        Self {
            files: RemoteFileStore::new(provider.clone()),
            indexes: VectorIndexManager::new(provider, store.clone(), settings),
            agents: AgentSynchronizer::new(store.clone(), runtime),
            store,
            metrics: SyncMetrics::new(),
        }
    }

    /// Metadata store shared with the migration runner.
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Index manager shared with the migration runner.
    pub fn indexes(&self) -> &VectorIndexManager {
        &self.indexes
    }

    /// Sync activity counters.
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Snapshot of the sync activity counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Register a knowledge source. Its index is created lazily on first sync.
    pub async fn create_source(&self, name: &str) -> Result<KnowledgeSource, SyncError> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name").into());
        }
        let source = KnowledgeSource::new(name.trim());
        self.store.insert_source(&source).await?;
        tracing::info!(source_id = %source.id, name = %source.name, "Knowledge source created");
        Ok(source)
    }

    /// Persist a new content item and sync it.
    pub async fn on_content_created(
        &self,
        source_id: Uuid,
        payload: ContentPayload,
    ) -> Result<SyncOutcome, SyncError> {
        payload.validate()?;
        self.load_source(source_id).await?;

        let item = ContentItem::new(source_id, payload);
        self.store.upsert_content_item(&item).await?;
        tracing::debug!(
            source_id = %source_id,
            item_id = %item.id,
            kind = item.payload.kind().as_str(),
            "Content item created"
        );

        let replace = item.payload.keeps_single_file();
        self.sync_item(&item, replace, true).await
    }

    /// Replace an item's payload and re-sync it, retiring its previous file.
    pub async fn on_content_updated(
        &self,
        source_id: Uuid,
        item_id: Uuid,
        payload: ContentPayload,
    ) -> Result<SyncOutcome, SyncError> {
        payload.validate()?;
        let mut item = self.load_item(source_id, item_id).await?;
        item.payload = payload;
        self.store.upsert_content_item(&item).await?;

        self.sync_item(&item, true, true).await
    }

    /// Remove an item, cleaning up its remote file on a best-effort basis.
    pub async fn on_content_deleted(
        &self,
        source_id: Uuid,
        item_id: Uuid,
    ) -> Result<DeletionOutcome, SyncError> {
        let source = self.load_source(source_id).await?;
        let item = self.load_item(source_id, item_id).await?;

        let cleanup = match item.external_file_id.as_deref() {
            Some(file_id) => Some(self.retire_file(source.index_id.as_deref(), file_id).await),
            None => None,
        };

        self.store.delete_content_item(item_id).await?;
        self.store
            .touch_index_updated_at(source_id, OffsetDateTime::now_utc())
            .await?;
        self.metrics.record_item_deleted();
        tracing::info!(
            source_id = %source_id,
            item_id = %item_id,
            clean = cleanup.as_ref().is_none_or(RemoteCleanup::is_clean),
            "Content item deleted"
        );

        let agents = self.propagate(source_id).await;
        Ok(DeletionOutcome {
            item_id,
            source_id,
            cleanup,
            agents,
        })
    }

    /// Delete a source with its items and index, then recompute the agents that searched it.
    pub async fn on_source_deleted(
        &self,
        source_id: Uuid,
    ) -> Result<SourceDeletionOutcome, SyncError> {
        let source = self.load_source(source_id).await?;
        let dependents = self.store.agents_for_source(source_id).await?;
        let items = self.store.list_content_items(source_id).await?;

        let mut files_deleted = 0;
        let mut orphaned_files = Vec::new();
        for file_id in items.iter().filter_map(|item| item.external_file_id.as_deref()) {
            if self.files.delete_best_effort(file_id).await {
                files_deleted += 1;
            } else {
                self.metrics.record_cleanup_failure();
                orphaned_files.push(file_id.to_string());
            }
        }

        let index_deleted = match source.index_id.as_deref() {
            Some(index_id) => {
                let deleted = self.indexes.delete_index(index_id).await;
                if !deleted {
                    self.metrics.record_cleanup_failure();
                }
                Some(deleted)
            }
            None => None,
        };

        self.store.delete_source(source_id).await?;
        self.metrics.record_source_deleted();
        tracing::info!(
            source_id = %source_id,
            files_deleted,
            orphaned = orphaned_files.len(),
            agents = dependents.len(),
            "Knowledge source deleted"
        );

        let agents = AgentPropagation::from(self.agents.sync_all(dependents).await);
        self.note_propagation(source_id, &agents);
        Ok(SourceDeletionOutcome {
            source_id,
            index_deleted,
            files_deleted,
            orphaned_files,
            agents,
        })
    }

    /// Re-push the index sets of every agent using `source_id`.
    pub async fn resync_agents(&self, source_id: Uuid) -> Result<AgentPropagation, SyncError> {
        self.load_source(source_id).await?;
        Ok(self.propagate(source_id).await)
    }

    /// Store an agent, associate it with sources and push its index set.
    pub async fn register_agent(
        &self,
        name: &str,
        remote_id: Option<String>,
        source_ids: &[Uuid],
    ) -> Result<AgentRegistration, SyncError> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name").into());
        }
        for source_id in source_ids {
            self.load_source(*source_id).await?;
        }

        let agent = Agent::new(name.trim(), remote_id.filter(|id| !id.trim().is_empty()));
        self.store.upsert_agent(&agent).await?;
        for source_id in source_ids {
            self.store.link_agent_source(agent.id, *source_id).await?;
        }
        tracing::info!(
            agent_id = %agent.id,
            sources = source_ids.len(),
            "Agent registered"
        );

        let agents = self.sync_agent(agent.id).await?;
        Ok(AgentRegistration { agent, agents })
    }

    /// Re-push the index set of a single agent.
    pub async fn sync_agent(&self, agent_id: Uuid) -> Result<AgentPropagation, SyncError> {
        let result = self.agents.sync_agent(agent_id).await;
        if let Err(AgentSyncError::AgentNotFound(id)) = result {
            return Err(SyncError::AgentNotFound(id));
        }
        let propagation = AgentPropagation::from(result);
        if !propagation.is_complete() {
            self.metrics
                .record_agent_sync_failures(propagation.failure_count());
        }
        Ok(propagation)
    }

    /// Provider-side status of a source's index, if it has one.
    pub async fn index_status(&self, source_id: Uuid) -> Result<Option<IndexStatus>, SyncError> {
        let source = self.load_source(source_id).await?;
        match source.index_id {
            Some(index_id) => Ok(Some(self.indexes.status(&index_id).await?)),
            None => Ok(None),
        }
    }

    /// Replace the expiration policy of a source's index. Returns `false` if it has none yet.
    pub async fn refresh_expiration(&self, source_id: Uuid, days: u32) -> Result<bool, SyncError> {
        let source = self.load_source(source_id).await?;
        match source.index_id {
            Some(index_id) => {
                self.indexes.refresh_expiration(&index_id, days).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run the chain for an already persisted item without touching agents.
    pub(crate) async fn sync_stored_item(
        &self,
        item: &ContentItem,
    ) -> Result<SyncOutcome, SyncError> {
        self.sync_item(item, item.payload.keeps_single_file(), false)
            .await
    }

    /// Push recomputed index sets to the agents of a source, recording failures.
    pub(crate) async fn propagate(&self, source_id: Uuid) -> AgentPropagation {
        let propagation = AgentPropagation::from(self.agents.sync_agents_for(source_id).await);
        self.note_propagation(source_id, &propagation);
        propagation
    }

    /// Retire a file that never made it into the index and clear the item's handle, so the next
    /// migration run uploads the item again.
    pub(crate) async fn release_unindexed_file(
        &self,
        item_id: Uuid,
        index_id: &str,
        file_id: &str,
    ) -> Result<RemoteCleanup, SyncError> {
        let cleanup = self.retire_file(Some(index_id), file_id).await;
        self.store.set_external_file_id(item_id, None).await?;
        Ok(cleanup)
    }

    async fn sync_item(
        &self,
        item: &ContentItem,
        replace_previous: bool,
        propagate: bool,
    ) -> Result<SyncOutcome, SyncError> {
        let source_id = item.source_id;
        let index_id = self.indexes.ensure_index(source_id).await?;

        let replaced = if replace_previous {
            self.retire_previous_file(item.id, &index_id).await?
        } else {
            None
        };

        let document = format(&item.payload);
        let file_id = self
            .files
            .upload(document, &item.remote_filename())
            .await
            .map_err(SyncError::Upload)?;

        let tag = item.payload.chunking_tag();
        let attach_error = match self
            .indexes
            .attach_files(source_id, &index_id, std::slice::from_ref(&file_id), tag)
            .await
        {
            Ok(()) => None,
            Err(error) => {
                tracing::warn!(
                    source_id = %source_id,
                    item_id = %item.id,
                    index_id = %index_id,
                    file_id = %file_id,
                    error = %error,
                    "Attach failed; file persisted and left for a later resync"
                );
                self.metrics.record_attach_failure();
                Some(error.to_string())
            }
        };

        self.store
            .set_external_file_id(item.id, Some(&file_id))
            .await?;
        self.store
            .touch_index_updated_at(source_id, OffsetDateTime::now_utc())
            .await?;
        self.metrics.record_item_synced(replaced.is_some());
        tracing::info!(
            source_id = %source_id,
            item_id = %item.id,
            index_id = %index_id,
            file_id = %file_id,
            replaced = replaced.is_some(),
            "Content item synced"
        );

        let agents = if propagate {
            self.propagate(source_id).await
        } else {
            AgentPropagation::default()
        };

        Ok(SyncOutcome {
            item_id: item.id,
            source_id,
            index_id,
            file_id,
            replaced,
            attach_error,
            agents,
        })
    }

    /// Detach and delete the item's persisted file, then clear the handle.
    ///
    /// The handle is read back from the store; a failed read aborts the sync rather than
    /// risking a second live file for the item.
    async fn retire_previous_file(
        &self,
        item_id: Uuid,
        index_id: &str,
    ) -> Result<Option<RemoteCleanup>, SyncError> {
        let previous = self
            .store
            .get_content_item(item_id)
            .await?
            .and_then(|item| item.external_file_id);
        let Some(previous) = previous else {
            return Ok(None);
        };

        let cleanup = self.retire_file(Some(index_id), &previous).await;
        self.store.set_external_file_id(item_id, None).await?;
        Ok(Some(cleanup))
    }

    async fn retire_file(&self, index_id: Option<&str>, file_id: &str) -> RemoteCleanup {
        let detached = match index_id {
            Some(index_id) => self.indexes.detach_file(index_id, file_id).await,
            None => true,
        };
        let deleted = self.files.delete_best_effort(file_id).await;
        let cleanup = RemoteCleanup {
            file_id: file_id.to_string(),
            detached,
            deleted,
        };
        if !cleanup.is_clean() {
            self.metrics.record_cleanup_failure();
        }
        cleanup
    }

    fn note_propagation(&self, source_id: Uuid, propagation: &AgentPropagation) {
        if propagation.is_complete() {
            return;
        }
        self.metrics
            .record_agent_sync_failures(propagation.failure_count());
        tracing::warn!(
            source_id = %source_id,
            failures = propagation.failure_count(),
            "Agent propagation incomplete; a later resync converges"
        );
    }

    async fn load_source(&self, source_id: Uuid) -> Result<KnowledgeSource, SyncError> {
        self.store
            .get_source(source_id)
            .await?
            .ok_or(SyncError::SourceNotFound(source_id))
    }

    async fn load_item(&self, source_id: Uuid, item_id: Uuid) -> Result<ContentItem, SyncError> {
        match self.store.get_content_item(item_id).await? {
            Some(item) if item.source_id == source_id => Ok(item),
            _ => Err(SyncError::ItemNotFound(item_id)),
        }
    }
}
