// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Content extraction: raw payload to domain objects.
//!
//! The engine hands successful payloads to an [`Extractor`] and knows
//! nothing about how it works. Three variants exist: article, product and
//! generic. All of them parse markup with `scraper`, never execute scripts,
//! and treat the document as untrusted.

pub mod article;
pub mod generic;
pub mod product;

pub use article::{Article, ArticleExtractor};
pub use generic::{GenericExtractor, GenericPage};
pub use product::{Product, ProductExtractor};

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Which extractor to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Article,
    Product,
    #[default]
    Generic,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Article => "article",
            ContentKind::Product => "product",
            ContentKind::Generic => "generic",
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "article" => Ok(ContentKind::Article),
            "product" => Ok(ContentKind::Product),
            "generic" => Ok(ContentKind::Generic),
            other => Err(ExtractError::UnknownKind(other.to_string())),
        }
    }
}

/// Output of an extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StructuredContent {
    Article(Article),
    Product(Product),
    Generic(GenericPage),
}

impl StructuredContent {
    pub fn kind(&self) -> ContentKind {
        match self {
            StructuredContent::Article(_) => ContentKind::Article,
            StructuredContent::Product(_) => ContentKind::Product,
            StructuredContent::Generic(_) => ContentKind::Generic,
        }
    }
}

/// Why extraction produced nothing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("cannot extract from content type `{0}`")]
    UnsupportedContentType(String),
    #[error("payload is empty")]
    Empty,
    #[error("no {0} found in document")]
    NotFound(&'static str),
    #[error("unknown content kind `{0}`")]
    UnknownKind(String),
}

/// A link found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub url: String,
}

/// An image found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Turns a raw payload into structured content.
pub trait Extractor: Send + Sync {
    fn kind(&self) -> ContentKind;

    /// Extract from a parsed document. `base` resolves relative links.
    fn extract_document(&self, doc: &Html, base: Option<&Url>) -> Result<StructuredContent, ExtractError>;

    /// Extract from raw bytes as delivered by the engine.
    fn extract(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
        base: Option<&Url>,
    ) -> Result<StructuredContent, ExtractError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(ExtractError::Empty);
        }
        if let Some(ct) = content_type {
            let ct = ct.to_ascii_lowercase();
            if !(ct.contains("html") || ct.contains("xml") || ct.starts_with("text/")) {
                return Err(ExtractError::UnsupportedContentType(ct));
            }
        }
        let html = String::from_utf8_lossy(payload);
        let doc = Html::parse_document(&html);
        self.extract_document(&doc, base)
    }
}

/// The extractor for `kind`.
pub fn extractor_for(kind: ContentKind) -> &'static dyn Extractor {
    match kind {
        ContentKind::Article => &ArticleExtractor,
        ContentKind::Product => &ProductExtractor,
        ContentKind::Generic => &GenericExtractor,
    }
}

/// `Extract(rawPayload, contentType, kind)`.
pub fn extract(
    payload: &[u8],
    content_type: Option<&str>,
    kind: ContentKind,
    base: Option<&Url>,
) -> Result<StructuredContent, ExtractError> {
    extractor_for(kind).extract(payload, content_type, base)
}

// ── Shared helpers ──────────────────────────────────────────────────────────

/// Elements whose text is page chrome rather than content.
const BOILERPLATE_TAGS: &[&str] = &[
    "nav", "footer", "header", "aside", "script", "style", "noscript", "iframe", "form",
];
const BOILERPLATE_CLASSES: &[&str] = &[
    "sidebar",
    "menu",
    "navigation",
    "related-posts",
    "comments",
    "share-buttons",
    "social-share",
    "ad",
    "advertisement",
    "sponsored",
    "cookie-notice",
    "popup",
    "modal",
];

pub(crate) fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Whitespace-normalized text of an element.
pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First non-empty text match for any of `selectors`, in order. A
/// `content` attribute wins over inner text.
pub(crate) fn first_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    for css in selectors {
        let Some(sel) = selector(css) else {
            continue;
        };
        for el in doc.select(&sel) {
            let value = el
                .value()
                .attr("content")
                .map(|c| c.trim().to_string())
                .unwrap_or_else(|| text_of(el));
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// `content` of `<meta {attr}="{key}">`.
pub(crate) fn meta(doc: &Html, attr: &str, key: &str) -> Option<String> {
    let sel = selector(&format!(r#"meta[{attr}="{key}"]"#))?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

/// Every JSON-LD object in the document, with `@graph` and top-level arrays
/// flattened. Malformed blocks are skipped.
pub(crate) fn jsonld_objects(doc: &Html) -> Vec<Value> {
    let Some(sel) = selector(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        let raw = el.inner_html();
        let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
            continue;
        };
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        for item in items {
            match item.get("@graph").and_then(|g| g.as_array()) {
                Some(graph) => out.extend(graph.iter().cloned()),
                None => out.push(item),
            }
        }
    }
    out
}

/// Whether a JSON-LD object's `@type` (string or array) is one of `types`.
pub(crate) fn jsonld_is(value: &Value, types: &[&str]) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => types.contains(&t.as_str()),
        Some(Value::Array(ts)) => ts
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| types.contains(&t)),
        _ => false,
    }
}

/// A string field, or the `name` of an object field.
pub(crate) fn jsonld_str(value: &Value, key: &str) -> Option<String> {
    let field = value.get(key)?;
    let field = match field {
        Value::Array(items) => items.first()?,
        other => other,
    };
    field
        .as_str()
        .or_else(|| field.get("name").and_then(|n| n.as_str()))
        .or_else(|| field.get("url").and_then(|n| n.as_str()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A number that may be encoded as a JSON number or a string.
pub(crate) fn jsonld_f64(value: &Value, key: &str) -> Option<f64> {
    let field = value.get(key)?;
    field
        .as_f64()
        .or_else(|| field.as_str().and_then(|s| s.trim().parse().ok()))
}

pub(crate) fn resolve(base: Option<&Url>, href: &str) -> String {
    match base {
        Some(base) => base
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string()),
        None => href.to_string(),
    }
}

/// Whether `el` sits inside navigation, ads or other chrome.
pub(crate) fn in_boilerplate(el: ElementRef<'_>) -> bool {
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|node| {
            let v = node.value();
            BOILERPLATE_TAGS.contains(&v.name())
                || v.classes().any(|c| BOILERPLATE_CLASSES.contains(&c.to_ascii_lowercase().as_str()))
        })
}

/// Content links under `root`, skipping anchors and script links.
pub(crate) fn links_in(root: ElementRef<'_>, base: Option<&Url>, limit: usize) -> Vec<Link> {
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };
    root.select(&sel)
        .filter(|a| !in_boilerplate(*a))
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                return None;
            }
            let text = text_of(a);
            if text.is_empty() {
                return None;
            }
            Some(Link {
                text: text.chars().take(100).collect(),
                url: resolve(base, href),
            })
        })
        .take(limit)
        .collect()
}

/// Images under `root`, with alt text and figure captions.
pub(crate) fn images_in(root: ElementRef<'_>, base: Option<&Url>, limit: usize) -> Vec<Image> {
    let (Some(img_sel), Some(caption_sel)) = (selector("img[src]"), selector("figcaption")) else {
        return Vec::new();
    };
    root.select(&img_sel)
        .filter(|img| !in_boilerplate(*img))
        .filter_map(|img| {
            let src = img.value().attr("src")?.trim();
            if src.is_empty() || src.starts_with("data:") {
                return None;
            }
            let caption = img
                .parent()
                .and_then(ElementRef::wrap)
                .filter(|p| p.value().name() == "figure")
                .and_then(|fig| fig.select(&caption_sel).next())
                .map(text_of)
                .filter(|c| !c.is_empty());
            Some(Image {
                src: resolve(base, src),
                alt: img
                    .value()
                    .attr("alt")
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string),
                caption,
            })
        })
        .take(limit)
        .collect()
}

/// Document title: OpenGraph, then Twitter card, then `<title>`, then `<h1>`.
pub(crate) fn page_title(doc: &Html) -> Option<String> {
    meta(doc, "property", "og:title")
        .or_else(|| meta(doc, "name", "twitter:title"))
        .or_else(|| first_text(doc, &["title", "h1"]))
}

pub(crate) fn page_description(doc: &Html) -> Option<String> {
    meta(doc, "name", "description")
        .or_else(|| meta(doc, "property", "og:description"))
        .or_else(|| meta(doc, "name", "twitter:description"))
}
