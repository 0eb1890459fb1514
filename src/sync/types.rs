//! Error and outcome types for the sync pipeline.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::agents::{AgentFailure, AgentSyncError, AgentSyncReport};
use crate::index::IndexError;
use crate::knowledge::{Agent, ValidationError};
use crate::provider::ProviderError;
use crate::store::StoreError;

/// Errors that abort a sync step.
///
/// Best-effort failures (remote cleanup, attach, agent propagation) never show up here; they
/// are recorded on the returned outcome instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Payload was rejected before any remote call.
    #[error("Invalid content: {0}")]
    InvalidContent(#[from] ValidationError),
    /// Knowledge source does not exist.
    #[error("Knowledge source {0} not found")]
    SourceNotFound(Uuid),
    /// Content item does not exist under the given source.
    #[error("Content item {0} not found")]
    ItemNotFound(Uuid),
    /// Agent does not exist.
    #[error("Agent {0} not found")]
    AgentNotFound(Uuid),
    /// The source's index could not be created or attached to.
    #[error("Vector index unavailable: {0}")]
    Index(ProviderError),
    /// Canonical document upload failed.
    #[error("Upload failed: {0}")]
    Upload(ProviderError),
    /// Metadata store failed.
    #[error("Metadata store failed: {0}")]
    Store(#[from] StoreError),
}

impl From<IndexError> for SyncError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::Provider(inner) => Self::Index(inner),
            IndexError::Store(inner) => Self::Store(inner),
            IndexError::SourceNotFound(id) => Self::SourceNotFound(id),
        }
    }
}

/// Result of retiring an item's previous remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCleanup {
    /// File that was retired.
    pub file_id: String,
    /// Whether the file was detached from the source's index.
    pub detached: bool,
    /// Whether the file itself was deleted.
    pub deleted: bool,
}

impl RemoteCleanup {
    /// `true` when both remote calls succeeded.
    pub fn is_clean(&self) -> bool {
        self.detached && self.deleted
    }
}

/// How far an index change propagated to dependent agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentPropagation {
    /// Agents whose index set was replaced.
    pub updated: Vec<Uuid>,
    /// Agents not provisioned on the runtime.
    pub skipped: Vec<Uuid>,
    /// Agents that failed to update.
    pub failures: Vec<AgentFailure>,
    /// Set when dependent agents could not even be enumerated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentPropagation {
    /// `true` when every dependent agent converged.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.error.is_none()
    }

    /// Number of agents (or enumeration errors) that did not converge.
    pub fn failure_count(&self) -> u64 {
        self.failures.len() as u64 + u64::from(self.error.is_some())
    }
}

impl From<Result<AgentSyncReport, AgentSyncError>> for AgentPropagation {
    fn from(result: Result<AgentSyncReport, AgentSyncError>) -> Self {
        match result {
            Ok(report) => Self {
                updated: report.updated,
                skipped: report.skipped,
                ..Self::default()
            },
            Err(AgentSyncError::Incomplete { failures, report }) => Self {
                updated: report.updated,
                skipped: report.skipped,
                failures,
                error: None,
            },
            Err(other) => Self {
                error: Some(other.to_string()),
                ..Self::default()
            },
        }
    }
}

/// Result of syncing one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Item that was synced.
    pub item_id: Uuid,
    /// Owning source.
    pub source_id: Uuid,
    /// Index the item now lives in.
    pub index_id: String,
    /// New current remote file of the item.
    pub file_id: String,
    /// Previous file retired before the upload, if there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<RemoteCleanup>,
    /// Attach error; the file is persisted but not yet searchable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attach_error: Option<String>,
    /// Agent propagation result.
    pub agents: AgentPropagation,
}

/// Result of deleting one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionOutcome {
    /// Deleted item.
    pub item_id: Uuid,
    /// Owning source.
    pub source_id: Uuid,
    /// Remote cleanup of the item's file, if it had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<RemoteCleanup>,
    /// Agent propagation result.
    pub agents: AgentPropagation,
}

/// Result of deleting a whole knowledge source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDeletionOutcome {
    /// Deleted source.
    pub source_id: Uuid,
    /// `None` when the source never had an index, otherwise whether the delete succeeded.
    pub index_deleted: Option<bool>,
    /// Item files deleted from the provider.
    pub files_deleted: usize,
    /// Item files whose delete failed.
    pub orphaned_files: Vec<String>,
    /// Propagation to the agents that used to search this source.
    pub agents: AgentPropagation,
}

/// Result of registering an agent and its source associations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRegistration {
    /// Stored agent.
    pub agent: Agent,
    /// Propagation of the agent's index set.
    pub agents: AgentPropagation,
}

/// A source the migration could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    /// Failing source.
    pub source_id: Uuid,
    /// Rendered error.
    pub error: String,
}

/// Summary of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Sources visited.
    pub sources_total: usize,
    /// Sources that completed without error.
    pub sources_migrated: usize,
    /// Sources without content and without an index.
    pub sources_skipped: usize,
    /// Indexes created during the run.
    pub indexes_created: usize,
    /// Items uploaded during the run.
    pub items_synced: usize,
    /// Previously uploaded files attached without re-upload.
    pub legacy_files_attached: usize,
    /// Agent updates that failed.
    pub agent_sync_failures: u64,
    /// Sources that failed; a later run retries them.
    pub failures: Vec<SourceFailure>,
}
