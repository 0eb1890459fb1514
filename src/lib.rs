#![deny(missing_docs)]

//! Core library for the Knowledge Sync service.

/// Agent runtime client and index-set propagation.
pub mod agents;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Per-source vector index lifecycle.
pub mod index;
/// Content model, canonical document formatting and chunking profiles.
pub mod knowledge;
/// Structured logging and tracing setup.
pub mod logging;
/// Sync activity metrics.
pub mod metrics;
/// Indexing provider client and remote file handling.
pub mod provider;
/// Relational metadata store.
pub mod store;
/// Content sync orchestration and bulk migration.
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;
