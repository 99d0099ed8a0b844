// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Background cache maintenance.
//!
//! Reads evict expired entries lazily; this loop also sweeps them
//! periodically and trims the cache back under its entry cap, so memory and
//! disk use stay bounded for entries nobody asks for again.

use crate::cache::ResponseCache;
use crate::events::{AcquireEvent, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub remaining: usize,
}

/// Sweep `cache` once.
pub fn sweep_once(cache: &ResponseCache) -> SweepReport {
    let removed = cache.sweep();
    SweepReport {
        removed,
        remaining: cache.len(),
    }
}

/// Spawn the sweep loop. It runs every `every` until `shutdown` is notified.
///
/// Signal with [`Notify::notify_one`] so a notification sent mid-sweep is
/// not lost.
pub fn spawn(
    cache: Arc<ResponseCache>,
    events: EventBus,
    every: Duration,
    shutdown: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("maintenance loop started: sweep every {}s", every.as_secs());
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sweeps: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!("maintenance loop stopping after {sweeps} sweeps");
                    break;
                }
                _ = ticker.tick() => {
                    sweeps = sweeps.saturating_add(1);
                    let report = sweep_once(&cache);
                    if report.removed > 0 {
                        tracing::info!(
                            "maintenance sweep removed {} entries, {} remain",
                            report.removed,
                            report.remaining
                        );
                        events.emit(AcquireEvent::CacheSwept {
                            removed: report.removed,
                            remaining: report.remaining,
                        });
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AcquisitionMode, AcquisitionRequest, Acquired};

    fn acquired(url: &str) -> Acquired {
        let payload = b"<html><body>cached</body></html>".to_vec();
        Acquired {
            url: url.to_string(),
            final_url: url.to_string(),
            byte_size: payload.len(),
            payload,
            content_type: Some("text/html".into()),
            mode: AcquisitionMode::Fetch,
            elapsed_ms: 1,
            from_cache: false,
            captures: Vec::new(),
        }
    }

    fn fill(cache: &ResponseCache, urls: &[&str]) {
        for url in urls {
            let fp = AcquisitionRequest::new(url).unwrap().fingerprint();
            cache.put_acquired(fp, &acquired(url));
        }
    }

    #[test]
    fn test_sweep_once_removes_expired() {
        let cache = ResponseCache::in_memory(Duration::ZERO, 10);
        fill(&cache, &["https://a.test/1", "https://a.test/2"]);
        assert_eq!(
            sweep_once(&cache),
            SweepReport {
                removed: 2,
                remaining: 0
            }
        );
    }

    #[test]
    fn test_sweep_once_keeps_fresh_entries() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 10);
        fill(&cache, &["https://a.test/1"]);
        assert_eq!(sweep_once(&cache).remaining, 1);
    }

    #[tokio::test]
    async fn test_loop_emits_and_stops() {
        let cache = Arc::new(ResponseCache::in_memory(Duration::ZERO, 10));
        fill(&cache, &["https://a.test/1"]);
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let shutdown = Arc::new(Notify::new());

        let handle = spawn(
            Arc::clone(&cache),
            events,
            Duration::from_secs(60),
            Arc::clone(&shutdown),
        );

        match rx.recv().await.unwrap() {
            AcquireEvent::CacheSwept { removed, remaining } => {
                assert_eq!(removed, 1);
                assert_eq!(remaining, 0);
            }
            other => panic!("unexpected event {other:?}"),
        }
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
