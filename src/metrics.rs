use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing sync activity.
#[derive(Default)]
pub struct SyncMetrics {
    items_synced: AtomicU64,
    items_deleted: AtomicU64,
    files_uploaded: AtomicU64,
    files_replaced: AtomicU64,
    cleanup_failures: AtomicU64,
    attach_failures: AtomicU64,
    agent_sync_failures: AtomicU64,
    sources_deleted: AtomicU64,
    migrations_run: AtomicU64,
}

impl SyncMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a content item whose current file was uploaded and persisted.
    pub fn record_item_synced(&self, replaced_previous: bool) {
        self.items_synced.fetch_add(1, Ordering::Relaxed);
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
        if replaced_previous {
            self.files_replaced.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a removed content item.
    pub fn record_item_deleted(&self) {
        self.items_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a best-effort detach or delete that failed.
    pub fn record_cleanup_failure(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an attach that did not complete.
    pub fn record_attach_failure(&self) {
        self.attach_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record agents whose index set could not be replaced.
    pub fn record_agent_sync_failures(&self, count: u64) {
        self.agent_sync_failures.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a removed knowledge source.
    pub fn record_source_deleted(&self) {
        self.sources_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed migration run.
    pub fn record_migration(&self) {
        self.migrations_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_synced: self.items_synced.load(Ordering::Relaxed),
            items_deleted: self.items_deleted.load(Ordering::Relaxed),
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            files_replaced: self.files_replaced.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
            attach_failures: self.attach_failures.load(Ordering::Relaxed),
            agent_sync_failures: self.agent_sync_failures.load(Ordering::Relaxed),
            sources_deleted: self.sources_deleted.load(Ordering::Relaxed),
            migrations_run: self.migrations_run.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of sync counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Content items synced since startup.
    pub items_synced: u64,
    /// Content items deleted since startup.
    pub items_deleted: u64,
    /// Files uploaded to the indexing provider.
    pub files_uploaded: u64,
    /// Uploads that replaced a previous file of the same item.
    pub files_replaced: u64,
    /// Remote detach/delete calls that failed and left an orphan behind.
    pub cleanup_failures: u64,
    /// Attach batches that failed or timed out.
    pub attach_failures: u64,
    /// Agents whose runtime index set could not be updated.
    pub agent_sync_failures: u64,
    /// Knowledge sources deleted since startup.
    pub sources_deleted: u64,
    /// Migration runs completed since startup.
    pub migrations_run: u64,
}
