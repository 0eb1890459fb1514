//! Sync pipeline: per-mutation orchestration, bulk migration and the service facade.

mod migration;
mod orchestrator;
mod service;
pub mod types;

pub use migration::MigrationRunner;
pub use orchestrator::KnowledgeSyncOrchestrator;
pub use service::{SyncApi, SyncService};
pub use types::{
    AgentPropagation, AgentRegistration, DeletionOutcome, MigrationReport, RemoteCleanup,
    SourceDeletionOutcome, SourceFailure, SyncError, SyncOutcome,
};
