//! Entities shared by the sync pipeline: knowledge sources, content items and agents.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Tenant-owned collection of content items backed by at most one remote vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSource {
    /// Stable identifier of the source.
    pub id: Uuid,
    /// Display name, also used to name the remote index.
    pub name: String,
    /// Remote index handle; set once on first sync and never replaced.
    pub index_id: Option<String>,
    /// Last time the remote index content changed.
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub index_updated_at: Option<OffsetDateTime>,
}

impl KnowledgeSource {
    /// Build a fresh source with no remote index yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            index_id: None,
            index_updated_at: None,
        }
    }
}

/// One user-authored unit of knowledge belonging to a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable identifier of the item.
    pub id: Uuid,
    /// Owning knowledge source.
    pub source_id: Uuid,
    /// Typed content.
    pub payload: ContentPayload,
    /// Remote file currently representing this item, if it has been synced.
    pub external_file_id: Option<String>,
}

impl ContentItem {
    /// Build a new, not yet synced item.
    pub fn new(source_id: Uuid, payload: ContentPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            payload,
            external_file_id: None,
        }
    }

    /// Filename used when uploading this item's canonical document.
    pub fn remote_filename(&self) -> String {
        format!("{}-{}.md", self.payload.kind().as_str(), self.id)
    }
}

/// Tagged union over the supported content types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPayload {
    /// Free text, optionally extracted from a PDF.
    Text(TextContent),
    /// Single question/answer pair.
    Qa(QaContent),
    /// Product catalog; re-synced in place whenever it changes.
    Catalog(CatalogContent),
    /// Scraped web page.
    Website(WebsiteContent),
}

/// Discriminant of [`ContentPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// [`ContentPayload::Text`]
    Text,
    /// [`ContentPayload::Qa`]
    Qa,
    /// [`ContentPayload::Catalog`]
    Catalog,
    /// [`ContentPayload::Website`]
    Website,
}

impl ContentKind {
    /// Lowercase tag used in filenames and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Qa => "qa",
            Self::Catalog => "catalog",
            Self::Website => "website",
        }
    }
}

/// Free text content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// Heading rendered above the body.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Where the text came from.
    #[serde(default)]
    pub format: TextFormat,
}

/// Origin of a text body; selects the chunking profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    /// Typed or pasted text.
    #[default]
    Plain,
    /// Text extracted from an uploaded PDF.
    Pdf,
}

/// Question/answer pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaContent {
    /// Question as a customer would ask it.
    pub question: String,
    /// Answer to give.
    pub answer: String,
}

/// Product catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogContent {
    /// Catalog display name.
    pub name: String,
    /// Products listed in the catalog; may be empty.
    #[serde(default)]
    pub products: Vec<Product>,
}

/// Single catalog entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Unit price.
    #[serde(default)]
    pub price: Option<f64>,
    /// ISO currency code for `price`.
    #[serde(default)]
    pub currency: Option<String>,
    /// Product page.
    #[serde(default)]
    pub url: Option<String>,
    /// Raw image URL.
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Scraped web page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsiteContent {
    /// Page URL.
    pub url: String,
    /// Page title, when one was scraped.
    #[serde(default)]
    pub title: Option<String>,
    /// Extracted page text.
    pub content: String,
}

/// Payload rejected before any remote side effect.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A required field was empty or whitespace.
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),
    /// A catalog product was malformed.
    #[error("product #{index} is invalid: {reason}")]
    InvalidProduct {
        /// Zero-based position in the catalog.
        index: usize,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl ContentPayload {
    /// Discriminant of this payload.
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Text(_) => ContentKind::Text,
            Self::Qa(_) => ContentKind::Qa,
            Self::Catalog(_) => ContentKind::Catalog,
            Self::Website(_) => ContentKind::Website,
        }
    }

    /// Tag handed to the chunking profile selector.
    pub fn chunking_tag(&self) -> &'static str {
        match self {
            Self::Text(TextContent {
                format: TextFormat::Pdf,
                ..
            }) => "pdf",
            other => other.kind().as_str(),
        }
    }

    /// Whether a sync must retire the item's previous remote file before uploading a new one.
    pub fn keeps_single_file(&self) -> bool {
        matches!(self, Self::Catalog(_))
    }

    /// Reject payloads the formatter cannot render meaningfully.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Text(text) => require(&text.body, "body"),
            Self::Qa(qa) => {
                require(&qa.question, "question")?;
                require(&qa.answer, "answer")
            }
            Self::Website(site) => {
                require(&site.url, "url")?;
                require(&site.content, "content")
            }
            Self::Catalog(catalog) => {
                require(&catalog.name, "name")?;
                for (index, product) in catalog.products.iter().enumerate() {
                    if product.name.trim().is_empty() {
                        return Err(ValidationError::InvalidProduct {
                            index,
                            reason: "name must not be empty",
                        });
                    }
                    if product.price.is_some_and(|price| !price.is_finite() || price < 0.0) {
                        return Err(ValidationError::InvalidProduct {
                            index,
                            reason: "price must be a non-negative number",
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}

/// Conversational assistant that searches the indexes of its knowledge sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable identifier of the agent.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Identifier on the agent runtime; `None` until the agent is provisioned there.
    pub remote_id: Option<String>,
}

impl Agent {
    /// Build a new agent record.
    pub fn new(name: impl Into<String>, remote_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            remote_id,
        }
    }
}
