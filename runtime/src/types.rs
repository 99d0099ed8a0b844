// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared request/result types.

use crate::error::AcquireError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher;
use std::time::Duration;
use url::Url;

/// Default per-request timeout when the caller does not supply one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Caller preference for which tier serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderHint {
    /// Fetch first, escalate to render when the fetch is insufficient.
    #[default]
    Auto,
    /// Fetch tier only, never escalate.
    ForceFetch,
    /// Render tier only, never fetch.
    ForceRender,
}

impl RenderHint {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderHint::Auto => "auto",
            RenderHint::ForceFetch => "force-fetch",
            RenderHint::ForceRender => "force-render",
        }
    }
}

impl std::str::FromStr for RenderHint {
    type Err = AcquireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(RenderHint::Auto),
            "force-fetch" | "fetch" => Ok(RenderHint::ForceFetch),
            "force-render" | "render" => Ok(RenderHint::ForceRender),
            other => Err(AcquireError::invalid(format!("unknown render hint `{other}`"))),
        }
    }
}

/// One command in a bounded interaction sequence, interpreted by the render
/// tier. The vocabulary is closed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interaction {
    /// Click the first element matching `selector`.
    Click { selector: String },
    /// Set the value of the first element matching `selector`.
    Fill { selector: String, value: String },
    /// Pause for `ms` milliseconds (capped by configuration).
    Wait { ms: u64 },
    /// Scroll the viewport vertically by `pixels`.
    Scroll { pixels: i64 },
    /// Take a screenshot of the viewport.
    Capture,
}

impl Interaction {
    pub fn name(&self) -> &'static str {
        match self {
            Interaction::Click { .. } => "click",
            Interaction::Fill { .. } => "fill",
            Interaction::Wait { .. } => "wait",
            Interaction::Scroll { .. } => "scroll",
            Interaction::Capture => "capture",
        }
    }
}

/// Scheme + host + port identity. Unit of rate limiting and policy caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Origin(String);

impl Origin {
    /// Derive the origin of an absolute URL.
    pub fn of(url: &Url) -> Self {
        Origin(url.origin().ascii_serialization())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL of the origin's policy document.
    pub fn policy_url(&self) -> String {
        format!("{}/robots.txt", self.0)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a URL: lowercase scheme and host, strip default ports, drop the
/// fragment. Only absolute http(s) URLs are accepted.
pub fn normalize_url(raw: &str) -> Result<Url, AcquireError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| AcquireError::invalid(format!("unparseable url `{raw}`: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AcquireError::invalid(format!(
            "unsupported scheme `{}` in `{raw}`",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(AcquireError::invalid(format!("url `{raw}` has no host")));
    }
    // `Url` already lowercases the scheme and host and elides default ports.
    url.set_fragment(None);
    Ok(url)
}

/// A single acquisition request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionRequest {
    url: Url,
    hint: RenderHint,
    interactions: Vec<Interaction>,
    timeout_ms: u64,
    concurrency_tag: Option<String>,
}

impl AcquisitionRequest {
    /// Build a request with the `auto` hint and default timeout.
    pub fn new(raw_url: &str) -> Result<Self, AcquireError> {
        Ok(Self {
            url: normalize_url(raw_url)?,
            hint: RenderHint::Auto,
            interactions: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            concurrency_tag: None,
        })
    }

    pub fn with_hint(mut self, hint: RenderHint) -> Result<Self, AcquireError> {
        if hint == RenderHint::ForceFetch && !self.interactions.is_empty() {
            return Err(AcquireError::invalid(
                "interactions require the render tier; hint is force-fetch",
            ));
        }
        self.hint = hint;
        Ok(self)
    }

    pub fn with_interactions(mut self, interactions: Vec<Interaction>) -> Result<Self, AcquireError> {
        if self.hint == RenderHint::ForceFetch && !interactions.is_empty() {
            return Err(AcquireError::invalid(
                "interactions require the render tier; hint is force-fetch",
            ));
        }
        self.interactions = interactions;
        Ok(self)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms.max(1);
        self
    }

    pub fn with_concurrency_tag(mut self, tag: impl Into<String>) -> Self {
        self.concurrency_tag = Some(tag.into());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn hint(&self) -> RenderHint {
        self.hint
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn concurrency_tag(&self) -> Option<&str> {
        self.concurrency_tag.as_deref()
    }

    pub fn origin(&self) -> Origin {
        Origin::of(&self.url)
    }

    /// Path plus query, as matched against policy rules.
    pub fn policy_path(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{q}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    /// Hint after accounting for interactions: a scripted sequence can only
    /// run in the render tier.
    pub fn effective_hint(&self) -> RenderHint {
        if self.hint == RenderHint::Auto && !self.interactions.is_empty() {
            RenderHint::ForceRender
        } else {
            self.hint
        }
    }

    /// Cache key: normalized URL, effective rendering mode and a hash of the
    /// interaction sequence.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut interactions = fnv::FnvHasher::default();
        for step in &self.interactions {
            // Serialization of the closed vocabulary cannot fail.
            let encoded = serde_json::to_string(step).unwrap_or_default();
            interactions.write(encoded.as_bytes());
            interactions.write_u8(0x1f);
        }

        let mut key = fnv::FnvHasher::default();
        key.write(self.url.as_str().as_bytes());
        key.write_u8(0);
        key.write(self.effective_hint().as_str().as_bytes());
        key.write_u8(0);
        key.write_u64(interactions.finish());

        Fingerprint(format!("{:016x}{:016x}", key.finish(), interactions.finish()))
    }
}

/// Deterministic cache key derived from a normalized request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild from a stored key (used when reloading persisted entries).
    pub(crate) fn from_stored(raw: &str) -> Option<Self> {
        if raw.len() == 32 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Fingerprint(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which tier produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    Fetch,
    Render,
}

impl AcquisitionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AcquisitionMode::Fetch => "fetch",
            AcquisitionMode::Render => "render",
        }
    }
}

/// A successful acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acquired {
    /// Requested (normalized) URL.
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    /// Raw payload bytes.
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    /// Content-Type reported by the server, if any.
    pub content_type: Option<String>,
    /// Tier that produced the payload.
    pub mode: AcquisitionMode,
    /// Wall time spent producing the payload.
    pub elapsed_ms: u64,
    /// Payload length in bytes.
    pub byte_size: usize,
    /// Whether this result was served from the response cache.
    #[serde(default)]
    pub from_cache: bool,
    /// Screenshots taken by `capture` interactions, PNG encoded.
    #[serde(default, with = "b64_list")]
    pub captures: Vec<Vec<u8>>,
}

impl Acquired {
    /// Payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Outcome of one acquisition: exactly one of success or typed failure.
pub type AcquisitionResult = Result<Acquired, AcquireError>;

mod b64 {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod b64_list {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(
            items
                .iter()
                .map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let raw = Vec::<String>::deserialize(d)?;
        raw.iter()
            .map(|s| {
                base64::engine::general_purpose::STANDARD
                    .decode(s.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        let url = normalize_url("HTTPS://Example.COM:443/a/b?x=1#section").unwrap();
        assert_eq!(url.as_str(), "https://example.com/a/b?x=1");

        let url = normalize_url("http://example.com:80/").unwrap();
        assert_eq!(url.as_str(), "http://example.com/");

        let url = normalize_url("http://example.com:8080/p").unwrap();
        assert_eq!(url.as_str(), "http://example.com:8080/p");
    }

    #[test]
    fn test_normalize_rejects_non_http() {
        assert!(normalize_url("ftp://example.com/").is_err());
        assert!(normalize_url("not a url").is_err());
        assert!(normalize_url("/relative/path").is_err());
    }

    #[test]
    fn test_origin_includes_non_default_port() {
        let a = AcquisitionRequest::new("https://example.com/a").unwrap();
        let b = AcquisitionRequest::new("https://EXAMPLE.com:443/b").unwrap();
        let c = AcquisitionRequest::new("https://example.com:8443/c").unwrap();
        assert_eq!(a.origin(), b.origin());
        assert_ne!(a.origin(), c.origin());
        assert_eq!(c.origin().as_str(), "https://example.com:8443");
        assert_eq!(a.origin().policy_url(), "https://example.com/robots.txt");
    }

    #[test]
    fn test_fingerprint_ignores_fragment_but_not_mode() {
        let a = AcquisitionRequest::new("https://example.com/page#top").unwrap();
        let b = AcquisitionRequest::new("https://example.com/page").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let rendered = b.clone().with_hint(RenderHint::ForceRender).unwrap();
        assert_ne!(rendered.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_covers_interactions() {
        let base = AcquisitionRequest::new("https://example.com/").unwrap();
        let clicked = base
            .clone()
            .with_interactions(vec![Interaction::Click {
                selector: "#more".into(),
            }])
            .unwrap();
        let scrolled = base
            .clone()
            .with_interactions(vec![Interaction::Scroll { pixels: 400 }])
            .unwrap();
        assert_ne!(clicked.fingerprint(), scrolled.fingerprint());
        assert_eq!(clicked.fingerprint().as_str().len(), 32);
        assert!(Fingerprint::from_stored(clicked.fingerprint().as_str()).is_some());
    }

    #[test]
    fn test_interactions_reject_force_fetch() {
        let req = AcquisitionRequest::new("https://example.com/")
            .unwrap()
            .with_hint(RenderHint::ForceFetch)
            .unwrap();
        let err = req
            .with_interactions(vec![Interaction::Capture])
            .unwrap_err();
        assert_eq!(err.label(), "invalid_request");
    }

    #[test]
    fn test_interactions_imply_render() {
        let req = AcquisitionRequest::new("https://example.com/")
            .unwrap()
            .with_interactions(vec![Interaction::Wait { ms: 10 }])
            .unwrap();
        assert_eq!(req.hint(), RenderHint::Auto);
        assert_eq!(req.effective_hint(), RenderHint::ForceRender);
    }

    #[test]
    fn test_interaction_json_shape() {
        let steps: Vec<Interaction> = serde_json::from_str(
            r##"[{"type":"click","selector":"#go"},{"type":"fill","selector":"input","value":"x"},
                {"type":"wait","ms":500},{"type":"scroll","pixels":800},{"type":"capture"}]"##,
        )
        .unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[4], Interaction::Capture);
        assert_eq!(steps[2].name(), "wait");
    }

    #[test]
    fn test_hint_parse() {
        assert_eq!("force-render".parse::<RenderHint>().unwrap(), RenderHint::ForceRender);
        assert_eq!("FETCH".parse::<RenderHint>().unwrap(), RenderHint::ForceFetch);
        assert!("sometimes".parse::<RenderHint>().is_err());
    }
}
