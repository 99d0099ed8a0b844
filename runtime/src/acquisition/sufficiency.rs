// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fetch-tier sufficiency heuristic.
//!
//! Decides whether a lightweight response is usable as-is or whether the
//! page needs script execution. Insufficiency is routing input, not an error.

use serde::{Deserialize, Serialize};

/// Markers of client-rendered application shells.
const FRAMEWORK_INDICATORS: &[&str] = &[
    "id=\"__next\"",
    "id=\"__nuxt\"",
    "data-reactroot",
    "ng-app",
    "ng-version",
    "nuxt-root",
    "id=\"___gatsby\"",
    "id=\"root\"></div>",
    "id=\"app\"></div>",
];

/// Phrases pages show when they refuse to work without JavaScript.
const SCRIPT_REQUIRED_MESSAGES: &[&str] = &[
    "enable javascript",
    "javascript must be enabled",
    "please enable javascript",
    "this site requires javascript",
    "you need to enable javascript",
];

/// A framework shell with less visible text than this is treated as empty.
const SHELL_MIN_VISIBLE_TEXT: usize = 500;

/// Verdict on a fetch-tier response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Sufficiency {
    Sufficient,
    Insufficient { reason: InsufficientReason },
}

impl Sufficiency {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, Sufficiency::Sufficient)
    }
}

/// Why a fetch-tier response cannot stand on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InsufficientReason {
    /// Non-success HTTP status.
    Status { code: u16 },
    /// Payload below the minimum byte threshold.
    TooSmall { bytes: usize, min_bytes: usize },
    /// HTML without a `<body>` element.
    MissingStructure,
    /// The page says it needs JavaScript.
    ScriptRequired,
    /// Client-rendered shell with almost no text.
    FrameworkShell,
}

impl InsufficientReason {
    pub fn label(&self) -> String {
        match self {
            InsufficientReason::Status { code } => format!("status_{code}"),
            InsufficientReason::TooSmall { .. } => "too_small".to_string(),
            InsufficientReason::MissingStructure => "missing_structure".to_string(),
            InsufficientReason::ScriptRequired => "script_required".to_string(),
            InsufficientReason::FrameworkShell => "framework_shell".to_string(),
        }
    }
}

/// Media types a browser would hand back unchanged.
const STATIC_MEDIA: &[&str] = &[
    "application/json",
    "application/ld+json",
    "application/pdf",
    "application/octet-stream",
    "application/zip",
    "image/",
    "audio/",
    "video/",
    "font/",
];

/// Classify a fetched response.
///
/// Media a browser cannot change (JSON, images, documents) only needs a
/// success status and a non-empty body. Everything else, including a
/// response without a content type, must clear `min_bytes`; only HTML is
/// probed further for structure.
pub fn assess(status: u16, content_type: Option<&str>, body: &[u8], min_bytes: usize) -> Sufficiency {
    if !(200..300).contains(&status) {
        return insufficient(InsufficientReason::Status { code: status });
    }

    let min_bytes = if is_static_media(content_type) { 1 } else { min_bytes };
    if body.len() < min_bytes {
        return insufficient(InsufficientReason::TooSmall {
            bytes: body.len(),
            min_bytes,
        });
    }
    if !is_html(content_type, body) {
        return Sufficiency::Sufficient;
    }

    let lower = String::from_utf8_lossy(body).to_ascii_lowercase();
    if !lower.contains("<body") {
        return insufficient(InsufficientReason::MissingStructure);
    }

    let visible = visible_text_len(&lower);
    if SCRIPT_REQUIRED_MESSAGES.iter().any(|m| lower.contains(m)) && visible < SHELL_MIN_VISIBLE_TEXT * 2 {
        return insufficient(InsufficientReason::ScriptRequired);
    }
    if FRAMEWORK_INDICATORS.iter().any(|m| lower.contains(m)) && visible < SHELL_MIN_VISIBLE_TEXT {
        return insufficient(InsufficientReason::FrameworkShell);
    }

    Sufficiency::Sufficient
}

fn insufficient(reason: InsufficientReason) -> Sufficiency {
    Sufficiency::Insufficient { reason }
}

fn is_static_media(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let ct = ct.trim().to_ascii_lowercase();
    STATIC_MEDIA.iter().any(|m| ct.starts_with(m))
}

/// HTML if the header says so, or (with no header) the body looks like markup.
fn is_html(content_type: Option<&str>, body: &[u8]) -> bool {
    match content_type {
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("html") || ct.contains("xhtml")
        }
        None => {
            let head = &body[..body.len().min(512)];
            let head = String::from_utf8_lossy(head).to_ascii_lowercase();
            head.contains("<html") || head.contains("<!doctype html") || head.contains("<body")
        }
    }
}

/// Rough count of characters outside tags, scripts and styles.
fn visible_text_len(lower_html: &str) -> usize {
    let mut count = 0;
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;
    let mut rest = lower_html;

    while let Some(ch) = rest.chars().next() {
        if let Some(end) = skip_until {
            match rest.find(end) {
                Some(idx) => {
                    rest = &rest[idx + end.len()..];
                    skip_until = None;
                    continue;
                }
                None => break,
            }
        }
        if !in_tag && ch == '<' {
            if rest.starts_with("<script") {
                skip_until = Some("</script>");
                continue;
            }
            if rest.starts_with("<style") {
                skip_until = Some("</style>");
                continue;
            }
            in_tag = true;
        } else if in_tag && ch == '>' {
            in_tag = false;
        } else if !in_tag && !ch.is_whitespace() {
            count += 1;
        }
        rest = &rest[ch.len_utf8()..];
    }
    count
}
