//! Upload/delete wrapper around the provider's file API.

use crate::provider::{IndexingProvider, ProviderError};
use std::sync::Arc;

/// Stores canonical documents as remote files.
///
/// Upload failures must abort the caller's sync. Delete failures are reported but callers are
/// expected to carry on; [`RemoteFileStore::delete_best_effort`] bakes that policy in.
#[derive(Clone)]
pub struct RemoteFileStore {
    provider: Arc<dyn IndexingProvider>,
}

impl RemoteFileStore {
    /// Wrap a provider.
    pub fn new(provider: Arc<dyn IndexingProvider>) -> Self {
        Self { provider }
    }

    /// Upload a document and return its remote file handle.
    pub async fn upload(&self, blob: String, filename: &str) -> Result<String, ProviderError> {
        let size = blob.len();
        match self.provider.upload_file(blob.into_bytes(), filename).await {
            Ok(file_id) => {
                tracing::debug!(file_id = %file_id, filename, size, "Remote file stored");
                Ok(file_id)
            }
            Err(error) => {
                tracing::error!(filename, error = %error, "Remote file upload failed");
                Err(error)
            }
        }
    }

    /// Delete a remote file.
    pub async fn delete(&self, file_id: &str) -> Result<(), ProviderError> {
        self.provider.delete_file(file_id).await
    }

    /// Delete a remote file, logging instead of failing. Returns whether the delete succeeded.
    pub async fn delete_best_effort(&self, file_id: &str) -> bool {
        match self.delete(file_id).await {
            Ok(()) => {
                tracing::debug!(file_id, "Remote file deleted");
                true
            }
            Err(error) => {
                tracing::warn!(file_id, error = %error, "Remote file delete failed; leaving orphan");
                false
            }
        }
    }
}
