//! Sync service shared by the HTTP surface and the CLI.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::migration::MigrationRunner;
use super::orchestrator::KnowledgeSyncOrchestrator;
use super::types::{
    AgentPropagation, AgentRegistration, DeletionOutcome, MigrationReport, SourceDeletionOutcome,
    SyncError, SyncOutcome,
};
use crate::agents::{AgentRuntime, HttpAgentRuntime};
use crate::config::get_config;
use crate::index::IndexSettings;
use crate::knowledge::{ContentPayload, KnowledgeSource};
use crate::metrics::MetricsSnapshot;
use crate::provider::{IndexStatus, IndexingProvider, ProviderClient};
use crate::store::{MetadataStore, SqliteStore};

/// Owns the orchestrator and the migration runner for the lifetime of the process.
///
/// Construct it once near process start and share it through an `Arc`.
pub struct SyncService {
    orchestrator: Arc<KnowledgeSyncOrchestrator>,
    migrations: MigrationRunner,
}

/// Abstraction over the sync pipeline used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Register a knowledge source.
    async fn create_source(&self, name: &str) -> Result<KnowledgeSource, SyncError>;

    /// Delete a source, its items and its index.
    async fn delete_source(&self, source_id: Uuid) -> Result<SourceDeletionOutcome, SyncError>;

    /// Create and sync a content item.
    async fn create_item(
        &self,
        source_id: Uuid,
        payload: ContentPayload,
    ) -> Result<SyncOutcome, SyncError>;

    /// Replace and re-sync a content item.
    async fn update_item(
        &self,
        source_id: Uuid,
        item_id: Uuid,
        payload: ContentPayload,
    ) -> Result<SyncOutcome, SyncError>;

    /// Delete a content item.
    async fn delete_item(
        &self,
        source_id: Uuid,
        item_id: Uuid,
    ) -> Result<DeletionOutcome, SyncError>;

    /// Re-push the index sets of a source's agents.
    async fn sync_agents(&self, source_id: Uuid) -> Result<AgentPropagation, SyncError>;

    /// Register an agent with its sources.
    async fn register_agent(
        &self,
        name: &str,
        remote_id: Option<String>,
        source_ids: &[Uuid],
    ) -> Result<AgentRegistration, SyncError>;

    /// Provider-side status of a source's index.
    async fn index_status(&self, source_id: Uuid) -> Result<Option<IndexStatus>, SyncError>;

    /// Replace the expiration policy of a source's index.
    async fn refresh_expiration(&self, source_id: Uuid, days: u32) -> Result<bool, SyncError>;

    /// Run the bulk migration.
    async fn run_migration(&self) -> Result<MigrationReport, SyncError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl SyncService {
    /// Build the service from explicit collaborators.
    pub fn with_parts(
        provider: Arc<dyn IndexingProvider>,
        runtime: Arc<dyn AgentRuntime>,
        store: Arc<dyn MetadataStore>,
        settings: IndexSettings,
        migration_concurrency: usize,
    ) -> Self {
        let orchestrator = Arc::new(KnowledgeSyncOrchestrator::new(
            provider, runtime, store, settings,
        ));
        let migrations = MigrationRunner::new(orchestrator.clone(), migration_concurrency);
        Self {
            orchestrator,
            migrations,
        }
    }

    /// Build the service from the global configuration: SQLite metadata and HTTP clients.
    pub async fn from_config() -> anyhow::Result<Self> {
        let config = get_config();
        tracing::info!(database = %config.database_url, "Opening metadata store");
        let store = SqliteStore::connect(&config.database_url).await?;
        let provider = ProviderClient::new()?;
        let runtime = HttpAgentRuntime::new()?;
        tracing::info!(
            provider = %config.provider_url,
            runtime = %config.agent_runtime_url,
            "Sync service initialized"
        );
        Ok(Self::with_parts(
            Arc::new(provider),
            Arc::new(runtime),
            Arc::new(store),
            IndexSettings::from_config(config),
            config.migration_concurrency,
        ))
    }
}

#[async_trait]
impl SyncApi for SyncService {
    async fn create_source(&self, name: &str) -> Result<KnowledgeSource, SyncError> {
        self.orchestrator.create_source(name).await
    }

    async fn delete_source(&self, source_id: Uuid) -> Result<SourceDeletionOutcome, SyncError> {
        self.orchestrator.on_source_deleted(source_id).await
    }

    async fn create_item(
        &self,
        source_id: Uuid,
        payload: ContentPayload,
    ) -> Result<SyncOutcome, SyncError> {
        self.orchestrator.on_content_created(source_id, payload).await
    }

    async fn update_item(
        &self,
        source_id: Uuid,
        item_id: Uuid,
        payload: ContentPayload,
    ) -> Result<SyncOutcome, SyncError> {
        self.orchestrator
            .on_content_updated(source_id, item_id, payload)
            .await
    }

    async fn delete_item(
        &self,
        source_id: Uuid,
        item_id: Uuid,
    ) -> Result<DeletionOutcome, SyncError> {
        self.orchestrator
            .on_content_deleted(source_id, item_id)
            .await
    }

    async fn sync_agents(&self, source_id: Uuid) -> Result<AgentPropagation, SyncError> {
        self.orchestrator.resync_agents(source_id).await
    }

    async fn register_agent(
        &self,
        name: &str,
        remote_id: Option<String>,
        source_ids: &[Uuid],
    ) -> Result<AgentRegistration, SyncError> {
        self.orchestrator
            .register_agent(name, remote_id, source_ids)
            .await
    }

    async fn index_status(&self, source_id: Uuid) -> Result<Option<IndexStatus>, SyncError> {
        self.orchestrator.index_status(source_id).await
    }

    async fn refresh_expiration(&self, source_id: Uuid, days: u32) -> Result<bool, SyncError> {
        self.orchestrator.refresh_expiration(source_id, days).await
    }

    async fn run_migration(&self) -> Result<MigrationReport, SyncError> {
        self.migrations.run().await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.orchestrator.metrics_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{TextContent, TextFormat};
    use crate::store::InMemoryStore;
    use crate::testing::{FakeProvider, FakeRuntime};
    use std::time::Duration;

    #[tokio::test]
    async fn service_drives_the_pipeline_through_the_trait() {
        let provider = Arc::new(FakeProvider::default());
        let service: Arc<dyn SyncApi> = Arc::new(SyncService::with_parts(
            provider.clone(),
            Arc::new(FakeRuntime::default()),
            Arc::new(InMemoryStore::new()),
            IndexSettings {
                poll_interval: Duration::from_millis(1),
                ..IndexSettings::default()
            },
            1,
        ));

        let source = service.create_source("Help center").await.expect("source");
        let outcome = service
            .create_item(
                source.id,
                ContentPayload::Text(TextContent {
                    title: "Shipping".into(),
                    body: "Two to four days.".into(),
                    format: TextFormat::Plain,
                }),
            )
            .await
            .expect("item");
        assert_eq!(provider.attached(&outcome.index_id), vec![outcome.file_id.clone()]);

        let deleted = service.delete_source(source.id).await.expect("delete");
        assert_eq!(deleted.index_deleted, Some(true));
        assert!(!provider.file_exists(&outcome.file_id));

        let metrics = service.metrics_snapshot();
        assert_eq!(metrics.items_synced, 1);
        assert_eq!(metrics.sources_deleted, 1);
    }
}
