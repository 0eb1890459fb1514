//! Canonical document rendering for every content type.
//!
//! The retrieval step runs entirely on the provider, so the voice instructions travel inside
//! each document: every rendering starts with [`VOICE_INSTRUCTIONS`].

use std::fmt::Write as _;

use super::types::{
    CatalogContent, ContentPayload, Product, QaContent, TextContent, WebsiteContent,
};

/// Instruction block prepended to every canonical document.
pub const VOICE_INSTRUCTIONS: &str = "\
## Response instructions
You represent the business that owns this knowledge. Always answer in the first person \
plural (\"we\", \"our\", \"us\"). Never refer to the business in the third person and never \
mention that this information comes from a document or knowledge base.
";

const EMPTY_CATALOG_GUIDANCE: &str = "\
Our catalog is being updated and no products are listed right now. If a customer asks about \
products or prices, tell them we are refreshing our catalog and offer to help with anything \
else or to follow up once it is available.
";

const IMAGE_INSTRUCTION: &str = "Share this image URL only the first time this product comes up \
in a conversation. Do not repeat it unless the customer asks to see the image again.";

/// Render a validated payload into its canonical document.
///
/// Callers must run [`ContentPayload::validate`] first; blank fields are rendered as-is.
pub fn format(payload: &ContentPayload) -> String {
    let mut document = String::from(VOICE_INSTRUCTIONS);
    document.push('\n');
    match payload {
        ContentPayload::Text(text) => render_text(&mut document, text),
        ContentPayload::Qa(qa) => render_qa(&mut document, qa),
        ContentPayload::Catalog(catalog) => render_catalog(&mut document, catalog),
        ContentPayload::Website(site) => render_website(&mut document, site),
    }
    document
}

fn render_text(out: &mut String, text: &TextContent) {
    let title = text.title.trim();
    let _ = writeln!(
        out,
        "# {}\n",
        if title.is_empty() { "Information" } else { title }
    );
    let _ = writeln!(out, "{}", text.body.trim());
}

fn render_qa(out: &mut String, qa: &QaContent) {
    let _ = writeln!(out, "# Frequently asked question\n");
    let _ = writeln!(out, "**Question:** {}\n", qa.question.trim());
    let _ = writeln!(out, "**Answer:** {}", qa.answer.trim());
}

fn render_website(out: &mut String, site: &WebsiteContent) {
    let url = site.url.trim();
    let heading = site
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or(url);
    let _ = writeln!(out, "# {heading}\n");
    let _ = writeln!(out, "Source: {url}\n");
    let _ = writeln!(out, "{}", site.content.trim());
}

fn render_catalog(out: &mut String, catalog: &CatalogContent) {
    let _ = writeln!(out, "# Product catalog: {}\n", catalog.name.trim());
    if catalog.products.is_empty() {
        out.push_str(EMPTY_CATALOG_GUIDANCE);
        return;
    }

    let _ = writeln!(
        out,
        "We currently offer {} product{}.\n",
        catalog.products.len(),
        if catalog.products.len() == 1 { "" } else { "s" }
    );
    for product in &catalog.products {
        render_product(out, product);
    }
}

fn render_product(out: &mut String, product: &Product) {
    let _ = writeln!(out, "## {}\n", product.name.trim());
    if let Some(description) = non_blank(product.description.as_deref()) {
        let _ = writeln!(out, "{description}\n");
    }
    if let Some(price) = product.price {
        match non_blank(product.currency.as_deref()) {
            Some(currency) => {
                let _ = writeln!(out, "- Price: {price:.2} {currency}");
            }
            None => {
                let _ = writeln!(out, "- Price: {price:.2}");
            }
        }
    }
    if let Some(url) = non_blank(product.url.as_deref()) {
        let _ = writeln!(out, "- Product page: {url}");
    }
    if let Some(image) = non_blank(product.image_url.as_deref()) {
        let _ = writeln!(out, "- Image: {image}");
        let _ = writeln!(out, "- Image instructions: {IMAGE_INSTRUCTION}");
    }
    out.push('\n');
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}
