// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generic page extraction: outline, text, links, metadata, forms and tables.

use std::collections::BTreeMap;

use scraper::Html;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    images_in, in_boilerplate, links_in, page_description, page_title, selector, text_of, ContentKind,
    ExtractError, Extractor, Image, Link, StructuredContent,
};

const MAX_PARAGRAPHS: usize = 50;
const MAX_LINKS: usize = 100;
const MAX_IMAGES: usize = 50;
const MAX_TABLES: usize = 10;

/// Meta names copied into [`GenericPage::metadata`] besides `og:*` and `twitter:*`.
const META_NAMES: &[&str] = &["keywords", "author", "robots", "viewport"];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenericPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub headings: Vec<Heading>,
    pub paragraphs: Vec<String>,
    pub word_count: usize,
    pub links: Vec<Link>,
    pub internal_links: usize,
    pub external_links: usize,
    pub images: Vec<Image>,
    pub metadata: BTreeMap<String, String>,
    pub forms: Vec<Form>,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub action: Option<String>,
    pub method: String,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub kind: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub struct GenericExtractor;

impl Extractor for GenericExtractor {
    fn kind(&self) -> ContentKind {
        ContentKind::Generic
    }

    fn extract_document(&self, doc: &Html, base: Option<&Url>) -> Result<StructuredContent, ExtractError> {
        let root = doc.root_element();
        let paragraphs = paragraphs(doc);
        let links = links_in(root, base, MAX_LINKS);
        let host = base.and_then(Url::host_str);
        let internal_links = links
            .iter()
            .filter(|l| Url::parse(&l.url).ok().as_ref().and_then(Url::host_str) == host)
            .count();

        let page = GenericPage {
            title: page_title(doc),
            description: page_description(doc),
            headings: headings(doc),
            word_count: paragraphs.iter().map(|p| p.split_whitespace().count()).sum(),
            paragraphs,
            internal_links,
            external_links: links.len() - internal_links,
            links,
            images: images_in(root, base, MAX_IMAGES),
            metadata: metadata(doc),
            forms: forms(doc),
            tables: tables(doc),
        };

        if page.title.is_none() && page.headings.is_empty() && page.paragraphs.is_empty() {
            return Err(ExtractError::NotFound("content"));
        }
        Ok(StructuredContent::Generic(page))
    }
}

fn headings(doc: &Html) -> Vec<Heading> {
    let Some(sel) = selector("h1, h2, h3, h4, h5, h6") else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter_map(|h| {
            let level = h.value().name().strip_prefix('h')?.parse().ok()?;
            let text = text_of(h);
            (!text.is_empty()).then_some(Heading { level, text })
        })
        .collect()
}

fn paragraphs(doc: &Html) -> Vec<String> {
    let Some(sel) = selector("p") else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter(|p| !in_boilerplate(*p))
        .map(text_of)
        .filter(|t| !t.is_empty())
        .take(MAX_PARAGRAPHS)
        .collect()
}

fn metadata(doc: &Html) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(sel) = selector("meta[content]") {
        for m in doc.select(&sel) {
            let v = m.value();
            let key = v.attr("property").or_else(|| v.attr("name")).unwrap_or_default();
            let wanted = key.starts_with("og:") || key.starts_with("twitter:") || META_NAMES.contains(&key);
            if wanted {
                if let Some(content) = v.attr("content") {
                    out.entry(key.to_string()).or_insert_with(|| content.trim().to_string());
                }
            }
        }
    }
    if let Some(sel) = selector(r#"link[rel="canonical"][href]"#) {
        if let Some(href) = doc.select(&sel).find_map(|l| l.value().attr("href")) {
            out.insert("canonical_url".to_string(), href.to_string());
        }
    }
    out
}

fn forms(doc: &Html) -> Vec<Form> {
    let (Some(form_sel), Some(field_sel)) = (selector("form"), selector("input, select, textarea")) else {
        return Vec::new();
    };
    doc.select(&form_sel)
        .map(|form| {
            let fields = form
                .select(&field_sel)
                .filter_map(|field| {
                    let v = field.value();
                    let name = v.attr("name").or_else(|| v.attr("id"))?;
                    let kind = match v.name() {
                        "input" => v.attr("type").unwrap_or("text"),
                        other => other,
                    };
                    Some(FormField {
                        name: name.to_string(),
                        kind: kind.to_ascii_lowercase(),
                        required: v.attr("required").is_some(),
                    })
                })
                .collect();
            Form {
                action: form.value().attr("action").map(str::to_string),
                method: form.value().attr("method").unwrap_or("get").to_ascii_uppercase(),
                fields,
            }
        })
        .collect()
}

fn tables(doc: &Html) -> Vec<Table> {
    let (Some(table_sel), Some(th), Some(tr), Some(td)) =
        (selector("table"), selector("th"), selector("tr"), selector("td"))
    else {
        return Vec::new();
    };
    doc.select(&table_sel)
        .map(|table| Table {
            headers: table.select(&th).map(text_of).collect(),
            rows: table
                .select(&tr)
                .map(|row| row.select(&td).map(text_of).collect::<Vec<_>>())
                .filter(|cells| !cells.is_empty())
                .collect(),
        })
        .filter(|t| !t.headers.is_empty() || !t.rows.is_empty())
        .take(MAX_TABLES)
        .collect()
}
