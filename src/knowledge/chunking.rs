//! Chunking profiles handed to the indexing provider when files are attached.
//!
//! Chunking itself happens remotely; this module only decides the token budget per content
//! type:
//!
//! - `qa`: question and answer must stay together, so chunks are larger with more overlap.
//! - `website`: scraped pages are dense, so chunks are smaller.
//! - `pdf`: the largest overlap, to carry context across page boundaries.
//! - anything else (including `catalog`) uses the `text` profile.

use serde::Serialize;

/// Token budget applied when the provider splits a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkingProfile {
    /// Upper bound on tokens per chunk.
    pub max_chunk_tokens: u32,
    /// Tokens shared between adjacent chunks.
    pub overlap_tokens: u32,
}

const TEXT: ChunkingProfile = ChunkingProfile {
    max_chunk_tokens: 800,
    overlap_tokens: 400,
};
const QA: ChunkingProfile = ChunkingProfile {
    max_chunk_tokens: 1200,
    overlap_tokens: 600,
};
const PDF: ChunkingProfile = ChunkingProfile {
    max_chunk_tokens: 1600,
    overlap_tokens: 800,
};
const WEBSITE: ChunkingProfile = ChunkingProfile {
    max_chunk_tokens: 600,
    overlap_tokens: 300,
};

/// Select the chunking profile for a content-type tag.
///
/// Matching is case-insensitive; unknown tags fall back to the `text` profile.
pub fn profile_for(tag: &str) -> ChunkingProfile {
    match tag.trim().to_ascii_lowercase().as_str() {
        "qa" => QA,
        "pdf" => PDF,
        "website" => WEBSITE,
        "text" => TEXT,
        other => {
            tracing::trace!(tag = other, "Unknown content tag; using text chunking profile");
            TEXT
        }
    }
}
