// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Policy gate: per-origin crawl permissions and cadence.
//!
//! The policy document is fetched once per origin through the fetch tier and
//! memoized until it goes stale. Concurrent callers for the same origin wait
//! on one retrieval; other origins are unaffected. Any failure to obtain or
//! parse the document degrades to "no restriction, default delay". Retrieval
//! never outlasts the requesting call's budget; a retrieval cut short that
//! way answers permissively for that call only and is not memoized.

use super::robots::{self, RobotsRules};
use crate::acquisition::Fetcher;
use crate::config::AGENT_TOKEN;
use crate::error::AcquireError;
use crate::types::Origin;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Timeout for policy document retrieval.
const POLICY_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Cached policy for one origin.
#[derive(Debug, Clone)]
pub struct PolicyRecord {
    pub rules: RobotsRules,
    pub fetched_at: Instant,
    /// Whether the document was actually retrieved and parsed.
    pub from_document: bool,
}

impl PolicyRecord {
    fn permissive() -> Self {
        Self {
            rules: RobotsRules::permissive(),
            fetched_at: Instant::now(),
            from_document: false,
        }
    }

    fn is_stale(&self, staleness: Duration) -> bool {
        self.fetched_at.elapsed() >= staleness
    }

    /// Crawl-delay hint, if the document carried one.
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.rules
            .crawl_delay
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Answer to "may I request this path, and how fast?".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Authorization {
    pub allowed: bool,
    /// Effective minimum spacing for the origin: the larger of the global
    /// default and the crawl-delay hint.
    pub delay: Duration,
}

impl Authorization {
    pub fn delay_seconds(&self) -> f64 {
        self.delay.as_secs_f64()
    }
}

type Slot = Arc<Mutex<Option<PolicyRecord>>>;

/// Resolves and memoizes per-origin policy.
pub struct PolicyGate {
    fetcher: Arc<dyn Fetcher>,
    records: DashMap<Origin, Slot>,
    staleness: Duration,
    default_delay: Duration,
    enabled: bool,
}

impl PolicyGate {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        staleness: Duration,
        default_delay: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            fetcher,
            records: DashMap::new(),
            staleness,
            default_delay,
            enabled,
        }
    }

    /// Authorize a request for `path` on `origin`, spending at most `budget`
    /// on policy retrieval. Never fails.
    pub async fn authorize(&self, origin: &Origin, path: &str, budget: Duration) -> Authorization {
        if !self.enabled {
            return Authorization {
                allowed: true,
                delay: self.default_delay,
            };
        }

        let record = self.record_within(origin, budget).await;
        let delay = record
            .crawl_delay()
            .map_or(self.default_delay, |hint| hint.max(self.default_delay));
        let allowed = record.rules.is_allowed(path);
        if !allowed {
            tracing::info!("policy for {origin} disallows {path}");
        }
        Authorization { allowed, delay }
    }

    /// Current policy record for `origin`, fetching or refreshing it if needed.
    pub async fn record_for(&self, origin: &Origin) -> PolicyRecord {
        self.record_within(origin, POLICY_FETCH_TIMEOUT).await
    }

    async fn record_within(&self, origin: &Origin, budget: Duration) -> PolicyRecord {
        let deadline = Instant::now() + budget.min(POLICY_FETCH_TIMEOUT);
        // Clone the slot out so the map shard lock is not held across awaits.
        let slot: Slot = self
            .records
            .entry(origin.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let Ok(mut guard) = tokio::time::timeout_at(deadline, slot.lock()).await else {
            tracing::debug!("policy for {origin} still loading at the deadline; allowing");
            return PolicyRecord::permissive();
        };
        if let Some(record) = guard.as_ref() {
            if !record.is_stale(self.staleness) {
                return record.clone();
            }
            tracing::debug!("policy for {origin} is stale, refreshing");
        }

        let capped = budget < POLICY_FETCH_TIMEOUT;
        match self.load(origin, deadline, capped).await {
            Some(record) => {
                *guard = Some(record.clone());
                record
            }
            None => PolicyRecord::permissive(),
        }
    }

    /// Number of origins with a memoized record.
    pub fn known_origins(&self) -> usize {
        self.records.len()
    }

    /// Drop the memoized record for `origin`.
    pub fn forget(&self, origin: &Origin) {
        self.records.remove(origin);
    }

    /// Retrieve and parse the document. `None` when a `capped` deadline cut
    /// the retrieval short, so the outcome says nothing about the origin.
    async fn load(&self, origin: &Origin, deadline: Instant, capped: bool) -> Option<PolicyRecord> {
        let url = origin.policy_url();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let fetched = tokio::time::timeout_at(deadline, self.fetcher.get_document(&url, remaining)).await;

        let rules = match fetched {
            Ok(Ok(resp)) if resp.status == 200 => {
                let text = resp.text();
                Some(robots::parse_robots(&text, AGENT_TOKEN))
            }
            Ok(Ok(resp)) => {
                tracing::debug!("no policy document at {url} (status {})", resp.status);
                None
            }
            Ok(Err(AcquireError::Timeout { .. })) | Err(_) if capped => {
                tracing::debug!("policy document {url} not retrieved within the request budget");
                return None;
            }
            Ok(Err(e)) => {
                tracing::warn!("failed to fetch policy document {url}: {e}; using permissive default");
                None
            }
            Err(_) => {
                tracing::warn!("policy document {url} timed out; using permissive default");
                None
            }
        };

        Some(PolicyRecord {
            from_document: rules.is_some(),
            rules: rules.unwrap_or_else(RobotsRules::permissive),
            fetched_at: Instant::now(),
        })
    }
}
