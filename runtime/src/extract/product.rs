// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Product extraction.
//!
//! Schema.org JSON-LD is authoritative when present; microdata, meta tags and
//! common storefront class names fill whatever it leaves empty.

use std::sync::OnceLock;

use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{
    first_text, jsonld_f64, jsonld_is, jsonld_objects, jsonld_str, meta, resolve, selector, text_of,
    ContentKind, ExtractError, Extractor, Image, StructuredContent,
};

const NAME_SELECTORS: &[&str] = &[
    "[itemprop=\"name\"]",
    "#productTitle",
    ".product-title",
    ".product-name",
    "h1",
];

const PRICE_SELECTORS: &[&str] = &[
    "[itemprop=\"price\"]",
    ".price",
    ".product-price",
    ".current-price",
    ".sale-price",
    "#priceblock_ourprice",
    "#priceblock_dealprice",
];

const ORIGINAL_PRICE_SELECTORS: &[&str] = &[".original-price", ".was-price", ".list-price", ".compare-price"];

const AVAILABILITY_SELECTORS: &[&str] = &[
    "[itemprop=\"availability\"]",
    ".availability",
    ".stock",
    ".product-availability",
    "#availability",
];

const IN_STOCK: &[&str] = &["instock", "in stock", "available", "add to cart", "buy now"];
const OUT_OF_STOCK: &[&str] = &["outofstock", "out of stock", "unavailable", "sold out"];
const PREORDER: &[&str] = &["preorder", "pre-order"];

const MAX_IMAGES: usize = 10;
const MAX_DESCRIPTION_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub price: Price,
    pub availability: Availability,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub sku: Option<String>,
    pub images: Vec<Image>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub specifications: Vec<Spec>,
    pub breadcrumbs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Price {
    /// Price as displayed, e.g. `$1,299.00`.
    pub current: Option<String>,
    pub amount: Option<f64>,
    pub original: Option<String>,
    pub currency: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    PreOrder,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Availability {
    pub status: StockStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub name: String,
    pub value: String,
}

pub struct ProductExtractor;

impl Extractor for ProductExtractor {
    fn kind(&self) -> ContentKind {
        ContentKind::Product
    }

    fn extract_document(&self, doc: &Html, base: Option<&Url>) -> Result<StructuredContent, ExtractError> {
        let ld = jsonld_objects(doc)
            .into_iter()
            .find(|v| jsonld_is(v, &["Product", "ProductGroup"]));

        let mut product = match &ld {
            Some(value) => from_jsonld(value, base),
            None => Product::default(),
        };
        fill_from_markup(&mut product, doc, base);

        if product.name.is_empty() && product.price.current.is_none() {
            return Err(ExtractError::NotFound("product"));
        }
        Ok(StructuredContent::Product(product))
    }
}

fn from_jsonld(value: &Value, base: Option<&Url>) -> Product {
    let offer = match value.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        Some(other) => Some(other),
        None => None,
    };

    let mut price = Price::default();
    let mut availability = Availability::default();
    if let Some(offer) = offer {
        price.amount = jsonld_f64(offer, "price").or_else(|| jsonld_f64(offer, "lowPrice"));
        price.currency = jsonld_str(offer, "priceCurrency");
        price.current = offer
            .get("price")
            .or_else(|| offer.get("lowPrice"))
            .map(|p| match p {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        if let Some(raw) = jsonld_str(offer, "availability") {
            availability.status = classify_stock(&raw);
            availability.message = Some(raw);
        }
    }

    let images = match value.get("image") {
        Some(Value::Array(items)) => items.iter().filter_map(image_value).collect(),
        Some(item) => image_value(item).into_iter().collect(),
        None => Vec::new(),
    }
    .into_iter()
    .map(|src| Image {
        src: resolve(base, &src),
        alt: None,
        caption: None,
    })
    .take(MAX_IMAGES)
    .collect();

    let rating = value.get("aggregateRating");
    Product {
        name: jsonld_str(value, "name").unwrap_or_default(),
        price,
        availability,
        description: jsonld_str(value, "description").map(truncate_description),
        brand: jsonld_str(value, "brand"),
        sku: jsonld_str(value, "sku").or_else(|| jsonld_str(value, "mpn")),
        images,
        rating: rating.and_then(|r| jsonld_f64(r, "ratingValue")),
        review_count: rating
            .and_then(|r| jsonld_f64(r, "reviewCount").or_else(|| jsonld_f64(r, "ratingCount")))
            .map(|n| n as u64),
        specifications: Vec::new(),
        breadcrumbs: Vec::new(),
    }
}

fn image_value(value: &Value) -> Option<String> {
    value
        .as_str()
        .or_else(|| value.get("url").and_then(|u| u.as_str()))
        .map(str::to_string)
}

fn fill_from_markup(product: &mut Product, doc: &Html, base: Option<&Url>) {
    if product.name.is_empty() {
        product.name = first_text(doc, NAME_SELECTORS)
            .or_else(|| meta(doc, "property", "og:title"))
            .unwrap_or_default();
    }

    let price = &mut product.price;
    if price.current.is_none() {
        price.current = first_text(doc, PRICE_SELECTORS)
            .or_else(|| meta(doc, "property", "product:price:amount"))
            .or_else(|| meta(doc, "property", "og:price:amount"));
    }
    if price.currency.is_none() {
        price.currency = first_text(doc, &["[itemprop=\"priceCurrency\"]"])
            .or_else(|| meta(doc, "property", "product:price:currency"))
            .or_else(|| meta(doc, "property", "og:price:currency"));
    }
    if price.original.is_none() {
        price.original = first_text(doc, ORIGINAL_PRICE_SELECTORS);
    }
    if let Some(current) = price.current.as_deref() {
        if price.amount.is_none() {
            price.amount = parse_amount(current);
        }
        if price.symbol.is_none() {
            price.symbol = currency_symbol(current);
        }
    }

    if product.availability.status == StockStatus::Unknown {
        if let Some(text) = first_text(doc, AVAILABILITY_SELECTORS).or_else(|| availability_href(doc)) {
            product.availability.status = classify_stock(&text);
            product.availability.message = Some(text);
        }
    }

    if product.description.is_none() {
        product.description = first_text(doc, &["[itemprop=\"description\"]", "#productDescription", ".product-description"])
            .or_else(|| meta(doc, "name", "description"))
            .or_else(|| meta(doc, "property", "og:description"))
            .map(truncate_description);
    }
    if product.brand.is_none() {
        product.brand = first_text(doc, &["[itemprop=\"brand\"]", ".brand"]);
    }
    if product.sku.is_none() {
        product.sku = first_text(doc, &["[itemprop=\"sku\"]", ".sku"]);
    }
    if product.images.is_empty() {
        product.images = markup_images(doc, base);
    }
    if product.rating.is_none() {
        product.rating = first_text(doc, &["[itemprop=\"ratingValue\"]", ".rating"]).and_then(|t| parse_amount(&t));
    }
    if product.review_count.is_none() {
        product.review_count = first_text(doc, &["[itemprop=\"reviewCount\"]", ".review-count", ".reviews-count"])
            .and_then(|t| parse_amount(&t))
            .map(|n| n as u64);
    }
    product.specifications = specifications(doc);
    product.breadcrumbs = breadcrumbs(doc);
}

/// `<link itemprop="availability" href="https://schema.org/InStock">`.
fn availability_href(doc: &Html) -> Option<String> {
    let sel = selector("link[itemprop=\"availability\"]")?;
    doc.select(&sel)
        .filter_map(|l| l.value().attr("href"))
        .next()
        .map(str::to_string)
}

fn classify_stock(text: &str) -> StockStatus {
    let lower = text.to_ascii_lowercase();
    // Out-of-stock first: "unavailable" contains "available".
    if OUT_OF_STOCK.iter().any(|k| lower.contains(k)) {
        StockStatus::OutOfStock
    } else if PREORDER.iter().any(|k| lower.contains(k)) {
        StockStatus::PreOrder
    } else if IN_STOCK.iter().any(|k| lower.contains(k)) {
        StockStatus::InStock
    } else {
        StockStatus::Unknown
    }
}

fn amount_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").ok())
        .as_ref()
}

/// First decimal number in `text`, ignoring thousands separators.
fn parse_amount(text: &str) -> Option<f64> {
    let m = amount_pattern()?.find(text)?;
    m.as_str().replace(',', "").parse().ok()
}

fn currency_symbol(text: &str) -> Option<String> {
    text.chars()
        .find(|c| matches!(c, '$' | '£' | '€' | '¥' | '₹' | '₩' | '₽'))
        .map(String::from)
}

fn truncate_description(text: String) -> String {
    if text.chars().count() <= MAX_DESCRIPTION_CHARS {
        text
    } else {
        text.chars().take(MAX_DESCRIPTION_CHARS).collect()
    }
}

/// `og:image` plus images whose alt or class mark them as product shots.
fn markup_images(doc: &Html, base: Option<&Url>) -> Vec<Image> {
    let mut images: Vec<Image> = Vec::new();
    if let Some(src) = meta(doc, "property", "og:image") {
        images.push(Image {
            src: resolve(base, &src),
            alt: None,
            caption: None,
        });
    }
    if let Some(sel) = selector("img[src]") {
        for img in doc.select(&sel) {
            let v = img.value();
            let alt = v.attr("alt").unwrap_or_default();
            let hint = format!("{} {}", alt, v.attr("class").unwrap_or_default()).to_ascii_lowercase();
            let is_product = v.attr("itemprop") == Some("image")
                || ["product", "item", "main", "zoom"].iter().any(|k| hint.contains(k));
            if !is_product {
                continue;
            }
            let src = resolve(base, v.attr("src").unwrap_or_default());
            if images.iter().any(|i| i.src == src) {
                continue;
            }
            images.push(Image {
                src,
                alt: Some(alt.trim().to_string()).filter(|a| !a.is_empty()),
                caption: None,
            });
        }
    }
    images.truncate(MAX_IMAGES);
    images
}

/// Name/value rows from spec tables and definition lists.
fn specifications(doc: &Html) -> Vec<Spec> {
    let mut specs = Vec::new();
    let (Some(rows), Some(cells)) = (
        selector(".specifications tr, .specs tr, .product-specs tr, #productDetails tr, table.specs tr"),
        selector("th, td"),
    ) else {
        return specs;
    };
    for row in doc.select(&rows) {
        let parts: Vec<String> = row.select(&cells).map(text_of).collect();
        if let [name, value] = parts.as_slice() {
            if !name.is_empty() && !value.is_empty() {
                specs.push(Spec {
                    name: name.trim_end_matches(':').to_string(),
                    value: value.clone(),
                });
            }
        }
    }

    if let (Some(dts), Some(dds)) = (
        selector(".specifications dt, .specs dt"),
        selector(".specifications dd, .specs dd"),
    ) {
        for (dt, dd) in doc.select(&dts).zip(doc.select(&dds)) {
            let (name, value) = (text_of(dt), text_of(dd));
            if !name.is_empty() && !value.is_empty() {
                specs.push(Spec {
                    name: name.trim_end_matches(':').to_string(),
                    value,
                });
            }
        }
    }
    specs
}

fn breadcrumbs(doc: &Html) -> Vec<String> {
    let Some(sel) = selector(
        "[itemtype*=\"BreadcrumbList\"] [itemprop=\"name\"], nav[aria-label=\"breadcrumb\"] li, .breadcrumb li, .breadcrumbs a",
    ) else {
        return Vec::new();
    };
    doc.select(&sel)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> Product {
        let base = Url::parse("https://shop.example/p/lamp").unwrap();
        match ProductExtractor.extract(html.as_bytes(), Some("text/html"), Some(&base)).unwrap() {
            StructuredContent::Product(p) => p,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_jsonld_product() {
        let html = r#"<html><head><script type="application/ld+json">
            {"@context":"https://schema.org","@type":"Product","name":"Desk Lamp","sku":"DL-1",
             "brand":{"@type":"Brand","name":"Lumen"},"image":["/img/lamp.jpg"],
             "description":"A bright lamp.",
             "offers":{"@type":"Offer","price":"49.99","priceCurrency":"USD","availability":"https://schema.org/InStock"},
             "aggregateRating":{"ratingValue":"4.5","reviewCount":"120"}}
            </script></head><body><h1>Ignored Heading</h1></body></html>"#;
        let p = extract(html);
        assert_eq!(p.name, "Desk Lamp");
        assert_eq!(p.brand.as_deref(), Some("Lumen"));
        assert_eq!(p.sku.as_deref(), Some("DL-1"));
        assert_eq!(p.price.amount, Some(49.99));
        assert_eq!(p.price.currency.as_deref(), Some("USD"));
        assert_eq!(p.availability.status, StockStatus::InStock);
        assert_eq!(p.rating, Some(4.5));
        assert_eq!(p.review_count, Some(120));
        assert_eq!(p.images[0].src, "https://shop.example/img/lamp.jpg");
    }

    #[test]
    fn test_markup_product() {
        let html = r#"<html><head><meta name="description" content="Sturdy oak table."></head><body>
            <ul class="breadcrumb"><li>Home</li><li>Furniture</li><li>Tables</li></ul>
            <h1 class="product-title">Oak Table</h1>
            <span class="price">$1,299.00</span>
            <span class="was-price">$1,499.00</span>
            <div class="availability">Sold out</div>
            <img class="product-main" src="/img/table.jpg" alt="Oak table">
            <img src="/img/logo.png" alt="logo">
            <table class="specs"><tr><th>Material:</th><td>Oak</td></tr><tr><th>Seats</th><td>6</td></tr></table>
            </body></html>"#;
        let p = extract(html);
        assert_eq!(p.name, "Oak Table");
        assert_eq!(p.price.current.as_deref(), Some("$1,299.00"));
        assert_eq!(p.price.amount, Some(1299.0));
        assert_eq!(p.price.symbol.as_deref(), Some("$"));
        assert_eq!(p.price.original.as_deref(), Some("$1,499.00"));
        assert_eq!(p.availability.status, StockStatus::OutOfStock);
        assert_eq!(p.description.as_deref(), Some("Sturdy oak table."));
        assert_eq!(p.images.len(), 1);
        assert_eq!(p.images[0].src, "https://shop.example/img/table.jpg");
        assert_eq!(
            p.specifications,
            vec![
                Spec { name: "Material".into(), value: "Oak".into() },
                Spec { name: "Seats".into(), value: "6".into() },
            ]
        );
        assert_eq!(p.breadcrumbs, vec!["Home", "Furniture", "Tables"]);
    }

    #[test]
    fn test_stock_classification() {
        assert_eq!(classify_stock("Currently unavailable"), StockStatus::OutOfStock);
        assert_eq!(classify_stock("https://schema.org/PreOrder"), StockStatus::PreOrder);
        assert_eq!(classify_stock("Add to Cart"), StockStatus::InStock);
        assert_eq!(classify_stock("Ships soon"), StockStatus::Unknown);
    }

    #[test]
    fn test_page_without_product_is_not_found() {
        let err = ProductExtractor
            .extract(b"<html><body><p>nothing to buy</p></body></html>", Some("text/html"), None)
            .unwrap_err();
        assert_eq!(err, ExtractError::NotFound("product"));
    }
}
