// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-origin rate limiter.
//!
//! Each origin owns a lock guarding its last start time. The read, wait and
//! update happen under that lock, so two workers on the same origin can never
//! both observe a stale start time. Different origins never contend.
//! `tokio::sync::Mutex` is FIFO, so waiters proceed in arrival order.

use crate::types::Origin;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct LimiterState {
    last_start: Option<Instant>,
    spacing: Duration,
}

/// Enforces minimum spacing between request starts per origin.
pub struct RateLimiter {
    states: DashMap<Origin, Arc<Mutex<LimiterState>>>,
    default_delay: Duration,
}

impl RateLimiter {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            states: DashMap::new(),
            default_delay,
        }
    }

    /// Wait until `origin` may start another request, then claim the slot.
    ///
    /// `delay` is the policy-derived spacing; the effective spacing is never
    /// below the global default. Returns how long the caller was suspended.
    pub async fn await_turn(&self, origin: &Origin, delay: Duration) -> Duration {
        let slot = self
            .states
            .entry(origin.clone())
            .or_default()
            .clone();

        let mut state = slot.lock().await;
        state.spacing = delay.max(self.default_delay);

        let arrived = Instant::now();
        let waited = match state.last_start {
            Some(last) => {
                let next_allowed = last + state.spacing;
                if arrived < next_allowed {
                    tracing::debug!(
                        "rate limiting {origin}: waiting {:.2}s",
                        (next_allowed - arrived).as_secs_f64()
                    );
                    tokio::time::sleep_until(next_allowed).await;
                    next_allowed - arrived
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        };

        state.last_start = Some(Instant::now());
        waited
    }

    /// Effective spacing last applied to `origin`, if it has been seen.
    pub fn spacing(&self, origin: &Origin) -> Option<Duration> {
        let slot = self.states.get(origin)?.clone();
        let spacing = slot.try_lock().ok().map(|s| s.spacing);
        spacing
    }

    /// Forget all limiter state for `origin`.
    pub fn reset(&self, origin: &Origin) {
        self.states.remove(origin);
    }

    /// Number of origins tracked.
    pub fn tracked_origins(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(s: &str) -> Origin {
        Origin::of(&url::Url::parse(s).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let waited = limiter
            .await_turn(&origin("https://a.test"), Duration::ZERO)
            .await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_same_origin_are_spaced() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
        let o = origin("https://a.test");
        let t0 = Instant::now();

        let first = {
            let limiter = Arc::clone(&limiter);
            let o = o.clone();
            tokio::spawn(async move {
                limiter.await_turn(&o, Duration::from_secs(2)).await;
                Instant::now()
            })
        };
        let second = {
            let limiter = Arc::clone(&limiter);
            let o = o.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                limiter.await_turn(&o, Duration::from_secs(2)).await;
                Instant::now()
            })
        };

        let first_start = first.await.unwrap();
        let second_start = second.await.unwrap();
        assert!(second_start - first_start >= Duration::from_secs(2));
        assert!(second_start - t0 >= Duration::from_secs(2));
        assert_eq!(limiter.spacing(&o), Some(Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_workers_never_bypass_spacing() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(300)));
        let o = origin("https://busy.test");
        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = Arc::clone(&limiter);
            let o = o.clone();
            handles.push(tokio::spawn(async move {
                limiter.await_turn(&o, Duration::ZERO).await;
                Instant::now()
            }));
        }
        let mut starts = Vec::new();
        for h in handles {
            starts.push(h.await.unwrap());
        }
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_origins_do_not_interfere() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(5)));
        limiter
            .await_turn(&origin("https://a.test"), Duration::ZERO)
            .await;

        let started = Instant::now();
        let waited = limiter
            .await_turn(&origin("https://b.test"), Duration::ZERO)
            .await;
        assert_eq!(waited, Duration::ZERO);
        assert_eq!(Instant::now(), started);
        assert_eq!(limiter.tracked_origins(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_elapsed_means_no_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let o = origin("https://a.test");
        limiter.await_turn(&o, Duration::ZERO).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.await_turn(&o, Duration::ZERO).await, Duration::ZERO);

        limiter.reset(&o);
        assert_eq!(limiter.tracked_origins(), 0);
    }
}
