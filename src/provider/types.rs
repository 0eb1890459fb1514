//! Shared types used by the indexing provider client and its callers.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned while interacting with the indexing provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid provider URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response (includes request timeouts).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider responded with an unexpected status code.
    #[error("Unexpected provider response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// An attach batch reached a terminal state other than `completed`.
    #[error("File batch {batch_id} ended as {state:?}")]
    BatchFailed {
        /// Provider identifier of the batch.
        batch_id: String,
        /// Terminal state reported for the batch.
        state: BatchState,
    },
    /// An attach batch did not finish within the configured deadline.
    #[error("File batch {batch_id} still running after {waited:?}")]
    PollTimeout {
        /// Provider identifier of the batch.
        batch_id: String,
        /// Time spent polling before giving up.
        waited: Duration,
    },
}

/// How long the provider keeps an idle index around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    /// Days since the index was last active.
    pub days: u32,
}

impl ExpirationPolicy {
    pub(crate) fn to_wire(self) -> ExpiresAfter {
        ExpiresAfter {
            anchor: "last_active_at",
            days: self.days,
        }
    }
}

/// Processing state of an attach batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Files are still being chunked and embedded.
    InProgress,
    /// Every file was processed.
    Completed,
    /// Processing failed.
    Failed,
    /// The batch was cancelled.
    Cancelled,
}

impl BatchState {
    /// Whether polling can stop.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Per-state file counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCounts {
    /// Files still processing.
    #[serde(default)]
    pub in_progress: u64,
    /// Files processed successfully.
    #[serde(default)]
    pub completed: u64,
    /// Files that failed to process.
    #[serde(default)]
    pub failed: u64,
    /// Files cancelled before processing.
    #[serde(default)]
    pub cancelled: u64,
    /// Total files tracked.
    #[serde(default)]
    pub total: u64,
}

/// Pollable attach operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBatch {
    /// Provider identifier of the batch.
    pub id: String,
    /// Current state.
    pub status: BatchState,
    /// Per-state counters.
    #[serde(default)]
    pub file_counts: FileCounts,
}

/// Status snapshot of a remote index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    /// Index handle.
    pub id: String,
    /// Provider-reported status (`in_progress`, `completed`, `expired`).
    pub status: String,
    /// Files attached to the index, by processing state.
    #[serde(default)]
    pub file_counts: FileCounts,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExpiresAfter {
    pub(crate) anchor: &'static str,
    pub(crate) days: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateIndexRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) expires_after: ExpiresAfter,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateBatchRequest<'a> {
    pub(crate) file_ids: &'a [String],
    pub(crate) chunking_strategy: ChunkingStrategy,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChunkingStrategy {
    #[serde(rename = "type")]
    pub(crate) kind: &'static str,
    #[serde(rename = "static")]
    pub(crate) fixed: StaticChunking,
}

#[derive(Debug, Serialize)]
pub(crate) struct StaticChunking {
    pub(crate) max_chunk_size_tokens: u32,
    pub(crate) chunk_overlap_tokens: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateIndexRequest {
    pub(crate) expires_after: ExpiresAfter,
}

#[derive(Deserialize)]
pub(crate) struct IdResponse {
    pub(crate) id: String,
}
