//! Idempotent bulk backfill of indexes, files and agent index sets.
//!
//! Each source is handled independently and failures stop at the source boundary, so a run
//! over a partially migrated corpus only does the work that is still missing.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::{StreamExt, stream};
use uuid::Uuid;

use super::orchestrator::KnowledgeSyncOrchestrator;
use super::types::{MigrationReport, SourceFailure, SyncError};
use crate::knowledge::{ContentItem, KnowledgeSource};

#[derive(Debug, Default)]
struct SourceMigration {
    skipped: bool,
    index_created: bool,
    items_synced: usize,
    legacy_files_attached: usize,
    agent_sync_failures: u64,
}

/// Walks every knowledge source and brings it up to date.
#[derive(Clone)]
pub struct MigrationRunner {
    orchestrator: Arc<KnowledgeSyncOrchestrator>,
    concurrency: usize,
}

impl MigrationRunner {
    /// Build a runner processing at most `concurrency` sources at a time.
    pub fn new(orchestrator: Arc<KnowledgeSyncOrchestrator>, concurrency: usize) -> Self {
        Self {
            orchestrator,
            concurrency: concurrency.max(1),
        }
    }

    /// Migrate all sources. Only listing the sources can fail; per-source errors are reported.
    pub async fn run(&self) -> Result<MigrationReport, SyncError> {
        let sources = self.orchestrator.store().list_sources().await?;
        tracing::info!(
            sources = sources.len(),
            concurrency = self.concurrency,
            "Migration started"
        );

        let results: Vec<(Uuid, Result<SourceMigration, SyncError>)> = stream::iter(sources)
            .map(|source| async move {
                let source_id = source.id;
                (source_id, self.migrate_source(source).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = MigrationReport {
            sources_total: results.len(),
            ..MigrationReport::default()
        };
        for (source_id, result) in results {
            match result {
                Ok(migration) if migration.skipped => report.sources_skipped += 1,
                Ok(migration) => {
                    report.sources_migrated += 1;
                    report.indexes_created += usize::from(migration.index_created);
                    report.items_synced += migration.items_synced;
                    report.legacy_files_attached += migration.legacy_files_attached;
                    report.agent_sync_failures += migration.agent_sync_failures;
                }
                Err(error) => {
                    tracing::error!(source_id = %source_id, error = %error, "Source migration failed");
                    report.failures.push(SourceFailure {
                        source_id,
                        error: error.to_string(),
                    });
                }
            }
        }
        report.failures.sort_by_key(|failure| failure.source_id);

        self.orchestrator.metrics().record_migration();
        tracing::info!(
            migrated = report.sources_migrated,
            skipped = report.sources_skipped,
            failed = report.failures.len(),
            indexes_created = report.indexes_created,
            items_synced = report.items_synced,
            legacy_files_attached = report.legacy_files_attached,
            "Migration finished"
        );
        Ok(report)
    }

    async fn migrate_source(&self, source: KnowledgeSource) -> Result<SourceMigration, SyncError> {
        let store = self.orchestrator.store();
        let items = store.list_content_items(source.id).await?;
        let mut migration = SourceMigration::default();

        let (legacy, missing): (Vec<ContentItem>, Vec<ContentItem>) = items
            .into_iter()
            .partition(|item| item.external_file_id.is_some());

        if source.index_id.is_none() {
            if legacy.is_empty() && missing.is_empty() {
                tracing::debug!(source_id = %source.id, "Source has no content; skipping");
                migration.skipped = true;
                return Ok(migration);
            }
            migration.index_created = true;
            migration.legacy_files_attached = self.attach_legacy_files(&source, &legacy).await?;
        }

        for item in &missing {
            self.orchestrator.sync_stored_item(item).await?;
            migration.items_synced += 1;
        }

        let propagation = self.orchestrator.propagate(source.id).await;
        migration.agent_sync_failures = propagation.failure_count();
        tracing::info!(
            source_id = %source.id,
            index_created = migration.index_created,
            items_synced = migration.items_synced,
            legacy_files_attached = migration.legacy_files_attached,
            "Source migrated"
        );
        Ok(migration)
    }

    /// Attach files uploaded before the source had an index, without uploading them again.
    ///
    /// When a batch fails, the files of that group and of every group not yet attached are
    /// retired and their items lose their handles. The index is already claimed at that point,
    /// so the next run treats those items as missing and syncs them from scratch.
    async fn attach_legacy_files(
        &self,
        source: &KnowledgeSource,
        legacy: &[ContentItem],
    ) -> Result<usize, SyncError> {
        let indexes = self.orchestrator.indexes();
        let index_id = indexes.ensure_index(source.id).await?;

        let mut by_tag: BTreeMap<&'static str, Vec<(Uuid, String)>> = BTreeMap::new();
        for item in legacy {
            if let Some(file_id) = &item.external_file_id {
                by_tag
                    .entry(item.payload.chunking_tag())
                    .or_default()
                    .push((item.id, file_id.clone()));
            }
        }

        let mut attached = 0;
        let mut groups = by_tag.into_iter();
        while let Some((tag, files)) = groups.next() {
            let file_ids: Vec<String> = files.iter().map(|(_, file_id)| file_id.clone()).collect();
            if let Err(error) = indexes
                .attach_files(source.id, &index_id, &file_ids, tag)
                .await
            {
                let pending = files
                    .into_iter()
                    .chain(groups.by_ref().flat_map(|(_, files)| files));
                for (item_id, file_id) in pending {
                    self.orchestrator
                        .release_unindexed_file(item_id, &index_id, &file_id)
                        .await?;
                }
                tracing::warn!(
                    source_id = %source.id,
                    index_id = %index_id,
                    content_tag = tag,
                    "Legacy attach failed; unattached items will be re-synced"
                );
                return Err(error.into());
            }
            attached += file_ids.len();
        }
        Ok(attached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSettings;
    use crate::knowledge::{
        Agent, ContentPayload, QaContent, TextContent, TextFormat, WebsiteContent,
    };
    use crate::store::{InMemoryStore, MetadataStore};
    use crate::testing::{FakeProvider, FakeRuntime};
    use std::time::Duration;

    struct Harness {
        provider: Arc<FakeProvider>,
        runtime: Arc<FakeRuntime>,
        store: Arc<InMemoryStore>,
        runner: MigrationRunner,
    }

    fn harness(concurrency: usize) -> Harness {
        let provider = Arc::new(FakeProvider::default());
        let runtime = Arc::new(FakeRuntime::default());
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Arc::new(KnowledgeSyncOrchestrator::new(
            provider.clone(),
            runtime.clone(),
            store.clone(),
            IndexSettings {
                poll_interval: Duration::from_millis(1),
                ..IndexSettings::default()
            },
        ));
        Harness {
            provider,
            runtime,
            store,
            runner: MigrationRunner::new(orchestrator, concurrency),
        }
    }

    fn text(body: &str) -> ContentPayload {
        ContentPayload::Text(TextContent {
            title: "Note".into(),
            body: body.into(),
            format: TextFormat::Plain,
        })
    }

    async fn seed_source(store: &InMemoryStore, name: &str, payloads: Vec<ContentPayload>) -> Uuid {
        let source = KnowledgeSource::new(name);
        store.insert_source(&source).await.expect("source");
        for payload in payloads {
            store
                .upsert_content_item(&ContentItem::new(source.id, payload))
                .await
                .expect("item");
        }
        source.id
    }

    #[tokio::test]
    async fn backfills_indexes_files_and_agents() {
        let h = harness(2);
        let s1 = seed_source(&h.store, "S1", vec![text("One"), text("Two")]).await;
        let s2 = seed_source(
            &h.store,
            "S2",
            vec![ContentPayload::Website(WebsiteContent {
                url: "https://example.com".into(),
                title: None,
                content: "Welcome".into(),
            })],
        )
        .await;
        seed_source(&h.store, "Empty", Vec::new()).await;
        let agent = Agent::new("A1", Some("asst_a1".into()));
        h.store.upsert_agent(&agent).await.expect("agent");
        h.store.link_agent_source(agent.id, s1).await.expect("link");
        h.store.link_agent_source(agent.id, s2).await.expect("link");

        let report = h.runner.run().await.expect("run");

        assert_eq!(report.sources_total, 3);
        assert_eq!(report.sources_migrated, 2);
        assert_eq!(report.sources_skipped, 1);
        assert_eq!(report.indexes_created, 2);
        assert_eq!(report.items_synced, 3);
        assert!(report.failures.is_empty());
        assert_eq!(h.provider.indexes_created(), 2);

        let mut expected = Vec::new();
        for source_id in [s1, s2] {
            let source = h.store.get_source(source_id).await.expect("get").expect("source");
            expected.push(source.index_id.expect("index"));
        }
        expected.sort();
        assert_eq!(h.runtime.index_set("asst_a1"), Some(expected));
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let h = harness(1);
        let source_id = seed_source(&h.store, "S1", vec![text("One"), text("Two")]).await;

        h.runner.run().await.expect("first");
        let index_id = h
            .store
            .get_source(source_id)
            .await
            .expect("get")
            .expect("source")
            .index_id
            .expect("index");
        let attached = h.provider.attached(&index_id);
        let uploads = h.provider.uploads();

        let report = h.runner.run().await.expect("second");

        assert_eq!(report.indexes_created, 0);
        assert_eq!(report.items_synced, 0);
        assert_eq!(h.provider.indexes_created(), 1);
        assert_eq!(h.provider.uploads(), uploads);
        assert_eq!(h.provider.attached(&index_id), attached);
    }

    #[tokio::test]
    async fn legacy_files_are_attached_without_reupload() {
        let h = harness(1);
        let source = KnowledgeSource::new("Legacy");
        h.store.insert_source(&source).await.expect("source");
        let mut legacy = ContentItem::new(
            source.id,
            ContentPayload::Qa(QaContent {
                question: "Open on Sunday?".into(),
                answer: "No.".into(),
            }),
        );
        legacy.external_file_id = Some("file_legacy".into());
        h.store.upsert_content_item(&legacy).await.expect("legacy");
        h.store
            .upsert_content_item(&ContentItem::new(source.id, text("Fresh")))
            .await
            .expect("fresh");

        let report = h.runner.run().await.expect("run");

        assert_eq!(report.legacy_files_attached, 1);
        assert_eq!(report.items_synced, 1);
        assert_eq!(h.provider.uploads(), 1);
        let index_id = h
            .store
            .get_source(source.id)
            .await
            .expect("get")
            .expect("source")
            .index_id
            .expect("index");
        assert!(h.provider.attached(&index_id).contains(&"file_legacy".to_string()));
        assert_eq!(h.provider.attached(&index_id).len(), 2);
    }

    #[tokio::test]
    async fn failed_legacy_attach_is_retried_by_the_next_run() {
        let h = harness(1);
        let source = KnowledgeSource::new("Legacy");
        h.store.insert_source(&source).await.expect("source");
        let mut qa = ContentItem::new(
            source.id,
            ContentPayload::Qa(QaContent {
                question: "Open on Sunday?".into(),
                answer: "No.".into(),
            }),
        );
        qa.external_file_id = Some("file_legacy_qa".into());
        let mut note = ContentItem::new(source.id, text("Old note"));
        note.external_file_id = Some("file_legacy_note".into());
        h.store.upsert_content_item(&qa).await.expect("qa");
        h.store.upsert_content_item(&note).await.expect("note");
        h.provider.fail_attaches(true);

        let report = h.runner.run().await.expect("first");

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_id, source.id);
        for item_id in [qa.id, note.id] {
            let item = h
                .store
                .get_content_item(item_id)
                .await
                .expect("read")
                .expect("item");
            assert_eq!(item.external_file_id, None);
        }

        h.provider.fail_attaches(false);
        let report = h.runner.run().await.expect("second");

        assert!(report.failures.is_empty());
        assert_eq!(report.indexes_created, 0);
        assert_eq!(report.items_synced, 2);
        let index_id = h
            .store
            .get_source(source.id)
            .await
            .expect("get")
            .expect("source")
            .index_id
            .expect("index");
        let attached = h.provider.attached(&index_id);
        assert_eq!(attached.len(), 2);
        for item_id in [qa.id, note.id] {
            let item = h
                .store
                .get_content_item(item_id)
                .await
                .expect("read")
                .expect("item");
            let file_id = item.external_file_id.expect("file");
            assert!(attached.contains(&file_id));
        }
        assert_eq!(h.provider.indexes_created(), 1);
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_the_run() {
        let h = harness(1);
        let good = seed_source(&h.store, "Good", vec![text("One")]).await;
        h.runner.run().await.expect("seed index");
        let bad = seed_source(&h.store, "Bad", vec![text("Two")]).await;
        let extra = ContentItem::new(good, text("Later"));
        h.store.upsert_content_item(&extra).await.expect("extra");
        h.provider.fail_uploads(true);

        let report = h.runner.run().await.expect("run");

        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().any(|failure| failure.source_id == bad));
        h.provider.fail_uploads(false);

        let report = h.runner.run().await.expect("retry");
        assert!(report.failures.is_empty());
        assert_eq!(report.items_synced, 2);
        let item = h
            .store
            .get_content_item(extra.id)
            .await
            .expect("read")
            .expect("item");
        assert!(item.external_file_id.is_some());
    }
}
