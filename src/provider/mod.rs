//! Indexing provider integration: remote files and vector indexes.

pub mod client;
pub mod files;
pub mod types;

pub use client::ProviderClient;
pub use files::RemoteFileStore;
pub use types::{BatchState, ExpirationPolicy, FileBatch, FileCounts, IndexStatus, ProviderError};

use crate::knowledge::ChunkingProfile;
use async_trait::async_trait;

/// Operations consumed from the remote indexing provider.
///
/// The provider has no in-place update for files: content changes are expressed as
/// upload + attach of a new file and detach + delete of the old one.
#[async_trait]
pub trait IndexingProvider: Send + Sync {
    /// Create a vector index and return its handle.
    async fn create_index(
        &self,
        name: &str,
        expiration: ExpirationPolicy,
    ) -> Result<String, ProviderError>;

    /// Start attaching files to an index; returns a pollable batch.
    async fn attach_files_batch(
        &self,
        index_id: &str,
        file_ids: &[String],
        profile: ChunkingProfile,
    ) -> Result<FileBatch, ProviderError>;

    /// Poll a previously started batch.
    async fn batch_status(&self, index_id: &str, batch_id: &str)
    -> Result<FileBatch, ProviderError>;

    /// Remove a file from an index without deleting the file itself.
    async fn detach_file(&self, index_id: &str, file_id: &str) -> Result<(), ProviderError>;

    /// Upload a document blob and return its file handle.
    async fn upload_file(&self, bytes: Vec<u8>, filename: &str) -> Result<String, ProviderError>;

    /// Delete an uploaded file.
    async fn delete_file(&self, file_id: &str) -> Result<(), ProviderError>;

    /// Fetch the status of an index.
    async fn retrieve_index(&self, index_id: &str) -> Result<IndexStatus, ProviderError>;

    /// Replace the expiration policy of an index.
    async fn update_expiration(
        &self,
        index_id: &str,
        expiration: ExpirationPolicy,
    ) -> Result<(), ProviderError>;

    /// Delete an index.
    async fn delete_index(&self, index_id: &str) -> Result<(), ProviderError>;
}
