// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Article extraction: headline, byline, body text and media.

use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    first_text, images_in, in_boilerplate, jsonld_is, jsonld_objects, jsonld_str, links_in, meta,
    page_description, page_title, selector, text_of, ContentKind, ExtractError, Extractor, Image,
    Link, StructuredContent,
};

/// Candidate containers for the article body, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "[role=\"main\"]",
    "main",
    ".post-content",
    ".entry-content",
    ".article-content",
    ".article-body",
    ".content",
    "#content",
];

const AUTHOR_SELECTORS: &[&str] = &[
    "[rel=\"author\"]",
    ".author-name",
    ".byline",
    ".author",
    "[itemprop=\"author\"]",
];

const DATE_SELECTORS: &[&str] = &["time[datetime]", "[itemprop=\"datePublished\"]", ".published", ".post-date"];

/// Blocks shorter than this are treated as chrome, not prose.
const MIN_BLOCK_CHARS: usize = 20;
const EXCERPT_CHARS: usize = 300;
const MAX_IMAGES: usize = 10;
const MAX_LINKS: usize = 20;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Article {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published: Option<String>,
    pub description: Option<String>,
    pub content: String,
    pub excerpt: String,
    pub word_count: usize,
    pub images: Vec<Image>,
    pub links: Vec<Link>,
    pub tags: Vec<String>,
}

pub struct ArticleExtractor;

impl Extractor for ArticleExtractor {
    fn kind(&self) -> ContentKind {
        ContentKind::Article
    }

    fn extract_document(&self, doc: &Html, base: Option<&Url>) -> Result<StructuredContent, ExtractError> {
        let root = content_root(doc).ok_or(ExtractError::NotFound("article body"))?;
        let content = body_text(root);
        if content.is_empty() {
            return Err(ExtractError::NotFound("article body"));
        }

        let ld = jsonld_objects(doc)
            .into_iter()
            .find(|v| jsonld_is(v, &["Article", "NewsArticle", "BlogPosting", "Report"]));

        let title = ld
            .as_ref()
            .and_then(|v| jsonld_str(v, "headline"))
            .or_else(|| page_title(doc));
        let author = ld
            .as_ref()
            .and_then(|v| jsonld_str(v, "author"))
            .or_else(|| meta(doc, "name", "author"))
            .or_else(|| meta(doc, "property", "article:author"))
            .or_else(|| first_text(doc, AUTHOR_SELECTORS));
        let published = ld
            .as_ref()
            .and_then(|v| jsonld_str(v, "datePublished"))
            .or_else(|| meta(doc, "property", "article:published_time"))
            .or_else(|| published_attr(doc))
            .or_else(|| first_text(doc, DATE_SELECTORS));

        Ok(StructuredContent::Article(Article {
            title,
            author,
            published,
            description: page_description(doc),
            excerpt: excerpt(&content),
            word_count: content.split_whitespace().count(),
            content,
            images: images_in(root, base, MAX_IMAGES),
            links: links_in(root, base, MAX_LINKS),
            tags: tags(doc),
        }))
    }
}

/// The first content container holding real prose, or `<body>`.
fn content_root(doc: &Html) -> Option<ElementRef<'_>> {
    for css in CONTENT_SELECTORS {
        let Some(sel) = selector(css) else {
            continue;
        };
        if let Some(el) = doc
            .select(&sel)
            .find(|el| !in_boilerplate(*el) && text_of(*el).len() > MIN_BLOCK_CHARS)
        {
            return Some(el);
        }
    }
    let body = selector("body")?;
    doc.select(&body).next()
}

/// Paragraph, heading and list text joined by blank lines.
fn body_text(root: ElementRef<'_>) -> String {
    let Some(sel) = selector("p, h1, h2, h3, h4, h5, h6, li, blockquote") else {
        return String::new();
    };
    root.select(&sel)
        .filter(|el| !in_boilerplate(*el))
        .map(text_of)
        .filter(|t| t.len() > MIN_BLOCK_CHARS)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn published_attr(doc: &Html) -> Option<String> {
    let sel = selector("time[datetime]")?;
    doc.select(&sel)
        .filter_map(|t| t.value().attr("datetime"))
        .map(str::trim)
        .find(|d| !d.is_empty())
        .map(str::to_string)
}

fn excerpt(content: &str) -> String {
    if content.chars().count() <= EXCERPT_CHARS {
        return content.to_string();
    }
    let cut: String = content.chars().take(EXCERPT_CHARS).collect();
    let cut = match cut.rfind(' ') {
        Some(idx) => &cut[..idx],
        None => cut.as_str(),
    };
    format!("{}...", cut.trim_end())
}

/// `article:tag` and `keywords` metadata plus `rel=tag` links, deduplicated.
fn tags(doc: &Html) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |tag: &str| {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            out.push(tag.to_string());
        }
    };

    if let Some(sel) = selector(r#"meta[property="article:tag"]"#) {
        for el in doc.select(&sel) {
            if let Some(c) = el.value().attr("content") {
                push(c);
            }
        }
    }
    if let Some(keywords) = meta(doc, "name", "keywords") {
        keywords.split(',').for_each(&mut push);
    }
    if let Some(sel) = selector(r#"a[rel="tag"], .tags a"#) {
        for el in doc.select(&sel) {
            push(&text_of(el));
        }
    }
    out
}
