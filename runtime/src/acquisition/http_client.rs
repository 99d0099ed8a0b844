// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fetch tier: async HTTP client wrapping reqwest.
//!
//! Not a browser, just HTTP requests. Handles redirects and per-request
//! timeouts, and falls back to HTTP/1.1 when an endpoint rejects HTTP/2.
//! Failures are not retried here; escalation is the router's decision.

use super::sufficiency;
use super::{FetchOutcome, Fetcher};
use crate::error::AcquireError;
use crate::types::{AcquisitionMode, AcquisitionRequest, Acquired};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Response from an HTTP GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header.
    pub content_type: Option<String>,
    /// Response headers (selected subset).
    pub headers: Vec<(String, String)>,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client for the fetch tier.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
}

impl HttpClient {
    /// Create a new HTTP client sending `user_agent`.
    pub fn new(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self { client, h1_client }
    }

    /// Perform a single GET request.
    ///
    /// Falls back to HTTP/1.1 on protocol errors (some CDNs reject HTTP/2).
    pub async fn get(&self, url: &str, timeout_ms: u64) -> Result<HttpResponse, AcquireError> {
        let started = Instant::now();
        match Self::get_inner(&self.client, url, timeout_ms).await {
            Ok(resp) => Ok(resp),
            Err(e) if !e.is_timeout() && looks_like_protocol_error(&e) => {
                let spent = started.elapsed().as_millis() as u64;
                let remaining = timeout_ms.saturating_sub(spent);
                if remaining == 0 {
                    return Err(AcquireError::Timeout { timeout_ms });
                }
                tracing::debug!("retrying {url} over HTTP/1.1 after protocol error: {e}");
                Self::get_inner(&self.h1_client, url, remaining)
                    .await
                    .map_err(|e| AcquireError::from_reqwest(&e, timeout_ms))
            }
            Err(e) => Err(AcquireError::from_reqwest(&e, timeout_ms)),
        }
    }

    async fn get_inner(
        client: &reqwest::Client,
        url: &str,
        timeout_ms: u64,
    ) -> Result<HttpResponse, reqwest::Error> {
        let r = client
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await?;

        let status = r.status().as_u16();
        let final_url = r.url().to_string();
        let content_type = r
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let headers: Vec<(String, String)> = r
            .headers()
            .iter()
            .filter(|(k, _)| {
                matches!(
                    k.as_str(),
                    "content-type"
                        | "content-language"
                        | "last-modified"
                        | "cache-control"
                        | "x-robots-tag"
                        | "retry-after"
                )
            })
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body = r.bytes().await?.to_vec();

        Ok(HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            content_type,
            headers,
            body,
        })
    }
}

fn looks_like_protocol_error(e: &reqwest::Error) -> bool {
    let err_str = format!("{e:?}").to_ascii_lowercase();
    err_str.contains("http2") || err_str.contains("protocol") || err_str.contains("connection closed")
}

/// The fetch executor: one GET, classified by the sufficiency heuristic.
#[derive(Clone)]
pub struct HttpFetcher {
    client: HttpClient,
    min_bytes: usize,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, min_bytes: usize) -> Self {
        Self {
            client: HttpClient::new(user_agent),
            min_bytes,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: &AcquisitionRequest,
        budget: Duration,
    ) -> Result<FetchOutcome, AcquireError> {
        let started = Instant::now();
        let timeout_ms = budget.as_millis().max(1) as u64;
        let resp = self.client.get(request.url().as_str(), timeout_ms).await?;

        let verdict = sufficiency::assess(
            resp.status,
            resp.content_type.as_deref(),
            &resp.body,
            self.min_bytes,
        );
        let byte_size = resp.body.len();
        tracing::debug!(
            url = %request.url(),
            status = resp.status,
            bytes = byte_size,
            sufficient = verdict.is_sufficient(),
            "fetch tier complete"
        );

        Ok(FetchOutcome {
            acquired: Acquired {
                url: request.url().to_string(),
                final_url: resp.final_url,
                payload: resp.body,
                content_type: resp.content_type,
                mode: AcquisitionMode::Fetch,
                elapsed_ms: started.elapsed().as_millis() as u64,
                byte_size,
                from_cache: false,
                captures: Vec::new(),
            },
            status: resp.status,
            verdict,
        })
    }

    async fn get_document(&self, url: &str, timeout: Duration) -> Result<HttpResponse, AcquireError> {
        self.client.get(url, timeout.as_millis().max(1) as u64).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::sufficiency::{InsufficientReason, Sufficiency};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page(words: usize) -> String {
        format!(
            "<html><head><title>Doc</title></head><body><main>{}</main></body></html>",
            "content ".repeat(words)
        )
    }

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new("grasp-test");
        // Just verify it doesn't panic
        let _ = client;
    }

    #[tokio::test]
    async fn test_fetch_sufficient_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(page(200), "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new("grasp-test", 256);
        let req = AcquisitionRequest::new(&format!("{}/article", server.uri())).unwrap();
        let outcome = fetcher.fetch(&req, Duration::from_secs(5)).await.unwrap();

        assert!(outcome.verdict.is_sufficient());
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.acquired.mode, AcquisitionMode::Fetch);
        assert_eq!(outcome.acquired.byte_size, outcome.acquired.payload.len());
        assert!(outcome.acquired.text().contains("<main>"));
        assert_eq!(
            outcome.acquired.content_type.as_deref(),
            Some("text/html; charset=utf-8")
        );
    }

    #[tokio::test]
    async fn test_fetch_small_page_is_insufficient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("x".repeat(50), "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new("grasp-test", 256);
        let req = AcquisitionRequest::new(&server.uri()).unwrap();
        let outcome = fetcher.fetch(&req, Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome.verdict,
            Sufficiency::Insufficient {
                reason: InsufficientReason::TooSmall {
                    bytes: 50,
                    min_bytes: 256
                }
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(page(100))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new("grasp-test", 256);
        let req = AcquisitionRequest::new(&server.uri()).unwrap();
        let err = fetcher
            .fetch(&req, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        // Bind then drop a listener so the port is closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let fetcher = HttpFetcher::new("grasp-test", 256);
        let req = AcquisitionRequest::new(&format!("http://127.0.0.1:{port}/")).unwrap();
        let err = fetcher.fetch(&req, Duration::from_secs(2)).await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
    }
}
