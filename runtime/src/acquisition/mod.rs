// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fetch tier: lightweight retrieval without script execution.
//!
//! The browser is the fallback; most static pages are served from here.

pub mod http_client;
pub mod sufficiency;

use crate::error::AcquireError;
use crate::types::{AcquisitionRequest, Acquired};
use async_trait::async_trait;
use std::time::Duration;

pub use http_client::{HttpClient, HttpFetcher, HttpResponse};
pub use sufficiency::{InsufficientReason, Sufficiency};

/// A fetch-tier retrieval and its sufficiency verdict.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub acquired: Acquired,
    pub status: u16,
    pub verdict: Sufficiency,
}

/// Lightweight retrieval executor.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve `request` within `budget` and classify the response.
    async fn fetch(
        &self,
        request: &AcquisitionRequest,
        budget: Duration,
    ) -> Result<FetchOutcome, AcquireError>;

    /// Plain GET of an auxiliary document (the policy document).
    async fn get_document(&self, url: &str, timeout: Duration) -> Result<HttpResponse, AcquireError>;
}
