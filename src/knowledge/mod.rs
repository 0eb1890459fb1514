//! Knowledge domain: entities, chunking profiles and canonical document rendering.

pub mod chunking;
pub mod formatter;
pub mod types;

pub use chunking::{ChunkingProfile, profile_for};
pub use formatter::format;
pub use types::{
    Agent, CatalogContent, ContentItem, ContentKind, ContentPayload, KnowledgeSource, Product,
    QaContent, TextContent, TextFormat, ValidationError, WebsiteContent,
};
