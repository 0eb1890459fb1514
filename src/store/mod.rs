//! Metadata store abstraction.
//!
//! The [`MetadataStore`] trait covers every read and write the sync pipeline performs against
//! the relational metadata: knowledge sources, content items, agents and the agent/source
//! association. Every method is a single-row (or single-statement) atomic operation; the
//! pipeline never needs a multi-row transaction.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`claim_index_id`](MetadataStore::claim_index_id) | Compare-and-set of a source's index handle |
//! | [`touch_index_updated_at`](MetadataStore::touch_index_updated_at) | Record that an index changed |
//! | [`set_external_file_id`](MetadataStore::set_external_file_id) | Point an item at its current remote file |
//! | [`agents_for_source`](MetadataStore::agents_for_source) | Re-derive the agents depending on a source |
//! | [`sources_for_agent`](MetadataStore::sources_for_agent) | Re-derive the sources an agent searches |

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::knowledge::{Agent, ContentItem, KnowledgeSource};
use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors raised by metadata store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Stored payload could not be (de)serialized.
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Row referenced by an update does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of row that was missing.
        entity: &'static str,
        /// Identifier that was looked up.
        id: Uuid,
    },
    /// Stored value could not be decoded.
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

/// Result of a compare-and-set on a source's index handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexClaim {
    /// The handle was stored; the caller's index is now the source's index.
    Claimed,
    /// Another writer got there first; this is the source's index.
    Existing(String),
}

/// Persistence operations consumed by the sync pipeline.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new knowledge source.
    async fn insert_source(&self, source: &KnowledgeSource) -> Result<(), StoreError>;

    /// Fetch a source by id.
    async fn get_source(&self, id: Uuid) -> Result<Option<KnowledgeSource>, StoreError>;

    /// List every source, ordered by name.
    async fn list_sources(&self) -> Result<Vec<KnowledgeSource>, StoreError>;

    /// Store `index_id` on the source only if it has none yet.
    async fn claim_index_id(
        &self,
        source_id: Uuid,
        index_id: &str,
    ) -> Result<IndexClaim, StoreError>;

    /// Set the source's `index_updated_at`.
    async fn touch_index_updated_at(
        &self,
        source_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Delete a source together with its content items and agent associations.
    ///
    /// Returns `false` when the source did not exist.
    async fn delete_source(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Insert or fully replace a content item.
    async fn upsert_content_item(&self, item: &ContentItem) -> Result<(), StoreError>;

    /// Fetch a content item by id.
    async fn get_content_item(&self, id: Uuid) -> Result<Option<ContentItem>, StoreError>;

    /// List the items of a source.
    async fn list_content_items(&self, source_id: Uuid) -> Result<Vec<ContentItem>, StoreError>;

    /// Point an item at a remote file, or clear the pointer.
    async fn set_external_file_id(
        &self,
        item_id: Uuid,
        file_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Delete a content item. Returns `false` when it did not exist.
    async fn delete_content_item(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Insert or replace an agent.
    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    /// Fetch an agent by id.
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, StoreError>;

    /// Associate an agent with a source. Linking twice is a no-op.
    async fn link_agent_source(&self, agent_id: Uuid, source_id: Uuid) -> Result<(), StoreError>;

    /// Agents associated with a source.
    async fn agents_for_source(&self, source_id: Uuid) -> Result<Vec<Agent>, StoreError>;

    /// Sources associated with an agent.
    async fn sources_for_agent(&self, agent_id: Uuid) -> Result<Vec<KnowledgeSource>, StoreError>;
}
