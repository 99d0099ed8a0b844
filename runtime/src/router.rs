// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Adaptive router: picks the fetch or render tier per request.
//!
//! Under `auto` the fetch tier goes first. An insufficient response, or a
//! fetch failure classified retryable, moves the request to the render tier
//! exactly once; whatever the render tier returns is final. Both tiers share
//! the request deadline. Successful results are written to the response
//! cache before they are returned; failures are deliberately not cached.

use crate::acquisition::{FetchOutcome, Fetcher, Sufficiency};
use crate::cache::ResponseCache;
use crate::error::AcquireError;
use crate::events::{AcquireEvent, EventBus};
use crate::renderer::RenderExecutor;
use crate::types::{AcquisitionMode, AcquisitionRequest, AcquisitionResult, RenderHint};
use std::sync::Arc;
use tokio::time::Instant;

/// Escalation state for one request.
///
/// `attempted` records that the fetch tier already ran. The only transition
/// is fetch to render, taken at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteState {
    pub mode: AcquisitionMode,
    pub attempted: bool,
    can_escalate: bool,
}

impl RouteState {
    /// Initial state for `hint`. `render_required` marks hosts known to need
    /// script execution, which skip the fetch tier under `auto`.
    pub fn start(hint: RenderHint, render_required: bool) -> Self {
        match hint {
            RenderHint::ForceFetch => Self {
                mode: AcquisitionMode::Fetch,
                attempted: false,
                can_escalate: false,
            },
            RenderHint::ForceRender => Self {
                mode: AcquisitionMode::Render,
                attempted: false,
                can_escalate: false,
            },
            RenderHint::Auto if render_required => Self {
                mode: AcquisitionMode::Render,
                attempted: false,
                can_escalate: false,
            },
            RenderHint::Auto => Self {
                mode: AcquisitionMode::Fetch,
                attempted: false,
                can_escalate: true,
            },
        }
    }

    /// Move to the render tier, if this state still may.
    pub fn escalate(self) -> Option<Self> {
        (self.can_escalate && self.mode == AcquisitionMode::Fetch).then_some(Self {
            mode: AcquisitionMode::Render,
            attempted: true,
            can_escalate: false,
        })
    }
}

/// Routes requests across the two tiers.
pub struct AdaptiveRouter {
    fetcher: Arc<dyn Fetcher>,
    renderer: RenderExecutor,
    cache: Arc<ResponseCache>,
    events: EventBus,
    render_required_hosts: Vec<String>,
}

impl AdaptiveRouter {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        renderer: RenderExecutor,
        cache: Arc<ResponseCache>,
        events: EventBus,
        render_required_hosts: Vec<String>,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            cache,
            events,
            render_required_hosts,
        }
    }

    /// Acquire `request` through the fetch and/or render tiers.
    pub async fn acquire(&self, request: &AcquisitionRequest) -> AcquisitionResult {
        let started = Instant::now();
        let deadline = started + request.timeout();
        let url = request.url().as_str();

        let mut state = RouteState::start(
            request.effective_hint(),
            self.requires_render(request.url().host_str().unwrap_or_default()),
        );

        let result = loop {
            match state.mode {
                AcquisitionMode::Fetch => {
                    let (reason, unescalated) = match self.fetch_until(request, deadline).await {
                        Ok(FetchOutcome {
                            acquired,
                            verdict: Sufficiency::Sufficient,
                            ..
                        }) => break Ok(acquired),
                        Ok(FetchOutcome {
                            acquired,
                            verdict: Sufficiency::Insufficient { reason },
                            ..
                        }) => (reason.label(), Ok(acquired)),
                        Err(e) if e.is_retryable() => (e.label().to_string(), Err(e)),
                        Err(e) => break Err(e),
                    };

                    let Some(next) = state.escalate() else {
                        tracing::debug!("fetch of {url} not usable ({reason}), escalation not allowed");
                        break unescalated;
                    };
                    tracing::info!("escalating {url} to render tier: {reason}");
                    self.events.emit(AcquireEvent::Escalated {
                        url: url.to_string(),
                        reason,
                    });
                    state = next;
                }
                AcquisitionMode::Render => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break Err(AcquireError::Timeout {
                            timeout_ms: request.timeout_ms(),
                        });
                    }
                    break self.renderer.render(request, remaining).await;
                }
            }
        };

        match result {
            Ok(mut acquired) => {
                acquired.elapsed_ms = started.elapsed().as_millis() as u64;
                self.cache.put_acquired(request.fingerprint(), &acquired);
                Ok(acquired)
            }
            Err(AcquireError::Timeout { .. }) => Err(AcquireError::Timeout {
                timeout_ms: request.timeout_ms(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Run the fetch tier, abandoning it at `deadline` even if the fetcher
    /// does not honor its budget.
    async fn fetch_until(
        &self,
        request: &AcquisitionRequest,
        deadline: Instant,
    ) -> Result<FetchOutcome, AcquireError> {
        let budget = deadline.saturating_duration_since(Instant::now());
        let timeout = AcquireError::Timeout {
            timeout_ms: request.timeout_ms(),
        };
        if budget.is_zero() {
            return Err(timeout);
        }
        match tokio::time::timeout_at(deadline, self.fetcher.fetch(request, budget)).await {
            Ok(result) => result,
            Err(_) => Err(timeout),
        }
    }

    fn requires_render(&self, host: &str) -> bool {
        crate::config::host_listed(&self.render_required_hosts, host)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::acquisition::{sufficiency, HttpResponse};
    use crate::renderer::executor::tests::FakeRenderer;
    use crate::types::{Acquired, Interaction};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fetch tier stand-in serving one canned response.
    #[derive(Clone)]
    pub(crate) struct FakeFetcher {
        pub body: String,
        pub content_type: Option<String>,
        pub status: u16,
        pub delay: Duration,
        pub failure: Option<AcquireError>,
        pub robots: Option<String>,
        pub calls: Arc<AtomicUsize>,
        pub starts: Arc<Mutex<Vec<Instant>>>,
    }

    impl FakeFetcher {
        pub(crate) fn serving(body: &str) -> Self {
            Self {
                body: body.to_string(),
                content_type: Some("text/html".to_string()),
                status: 200,
                delay: Duration::ZERO,
                failure: None,
                robots: None,
                calls: Arc::new(AtomicUsize::new(0)),
                starts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn fetches(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(
            &self,
            request: &AcquisitionRequest,
            _budget: Duration,
        ) -> Result<FetchOutcome, AcquireError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.starts.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.delay).await;
            if let Some(err) = &self.failure {
                return Err(err.clone());
            }
            let payload = self.body.as_bytes().to_vec();
            Ok(FetchOutcome {
                verdict: sufficiency::assess(self.status, self.content_type.as_deref(), &payload, 256),
                status: self.status,
                acquired: Acquired {
                    url: request.url().to_string(),
                    final_url: request.url().to_string(),
                    byte_size: payload.len(),
                    payload,
                    content_type: self.content_type.clone(),
                    mode: AcquisitionMode::Fetch,
                    elapsed_ms: self.delay.as_millis() as u64,
                    from_cache: false,
                    captures: Vec::new(),
                },
            })
        }

        async fn get_document(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, AcquireError> {
            let (status, body) = match &self.robots {
                Some(body) => (200, body.clone().into_bytes()),
                None => (404, Vec::new()),
            };
            Ok(HttpResponse {
                url: url.to_string(),
                final_url: url.to_string(),
                status,
                content_type: Some("text/plain".to_string()),
                headers: Vec::new(),
                body,
            })
        }
    }

    pub(crate) fn static_page() -> String {
        format!(
            "<html><head><title>Static</title></head><body><article>{}</article></body></html>",
            "plain server-rendered text ".repeat(40)
        )
    }

    fn router(fetcher: &FakeFetcher, renderer: &FakeRenderer) -> (AdaptiveRouter, Arc<ResponseCache>) {
        let cache = Arc::new(ResponseCache::in_memory(Duration::from_secs(3600), 100));
        let router = AdaptiveRouter::new(
            Arc::new(fetcher.clone()),
            RenderExecutor::new(
                Arc::new(renderer.clone()),
                Duration::from_millis(2000),
                Duration::from_millis(5000),
            ),
            Arc::clone(&cache),
            EventBus::default(),
            vec!["spa.test".to_string()],
        );
        (router, cache)
    }

    fn req(url: &str) -> AcquisitionRequest {
        AcquisitionRequest::new(url).unwrap()
    }

    #[test]
    fn test_route_state_single_transition() {
        let auto = RouteState::start(RenderHint::Auto, false);
        assert_eq!(auto.mode, AcquisitionMode::Fetch);
        let rendered = auto.escalate().unwrap();
        assert_eq!(rendered.mode, AcquisitionMode::Render);
        assert!(rendered.attempted);
        assert!(rendered.escalate().is_none());

        assert!(RouteState::start(RenderHint::ForceFetch, false).escalate().is_none());
        assert!(RouteState::start(RenderHint::ForceRender, false).escalate().is_none());
        assert_eq!(
            RouteState::start(RenderHint::Auto, true).mode,
            AcquisitionMode::Render
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sufficient_fetch_never_renders() {
        let fetcher = FakeFetcher::serving(&static_page());
        let renderer = FakeRenderer::serving("<html><body>rendered</body></html>");
        let (router, cache) = router(&fetcher, &renderer);

        let acquired = router.acquire(&req("https://static.test/a")).await.unwrap();
        assert_eq!(acquired.mode, AcquisitionMode::Fetch);
        assert_eq!(fetcher.fetches(), 1);
        assert_eq!(renderer.renders(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_response_escalates_to_render() {
        let fetcher = FakeFetcher::serving(&"x".repeat(50));
        let renderer = FakeRenderer::serving("<html><body>rendered app</body></html>");
        let (router, _) = router(&fetcher, &renderer);

        let acquired = router.acquire(&req("https://app.test/")).await.unwrap();
        assert_eq!(acquired.mode, AcquisitionMode::Render);
        assert!(acquired.text().contains("rendered app"));
        assert_eq!(fetcher.fetches(), 1);
        assert_eq!(renderer.renders(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_plain_text_escalates_to_render() {
        let fetcher = FakeFetcher {
            content_type: Some("text/plain".to_string()),
            ..FakeFetcher::serving(&"x".repeat(50))
        };
        let renderer = FakeRenderer::serving("<html><body>rendered app</body></html>");
        let (router, _) = router(&fetcher, &renderer);

        let acquired = router.acquire(&req("https://plain.test/")).await.unwrap();
        assert_eq!(acquired.mode, AcquisitionMode::Render);
        assert_eq!(renderer.renders(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_render_times_out_at_navigation() {
        let fetcher = FakeFetcher::serving(&static_page());
        let renderer = FakeRenderer {
            nav_delay: Duration::from_millis(500),
            honors_nav_timeout: true,
            ..FakeRenderer::serving("<html><body>r</body></html>")
        };
        let (router, cache) = router(&fetcher, &renderer);

        let request = req("https://slow.test/")
            .with_hint(RenderHint::ForceRender)
            .unwrap()
            .with_timeout_ms(100);
        let err = router.acquire(&request).await.unwrap_err();
        assert_eq!(err, AcquireError::Timeout { timeout_ms: 100 });
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_render_skips_fetch() {
        let fetcher = FakeFetcher::serving(&static_page());
        let renderer = FakeRenderer::serving("<html><body>r</body></html>");
        let (router, _) = router(&fetcher, &renderer);

        let request = req("https://static.test/").with_hint(RenderHint::ForceRender).unwrap();
        let acquired = router.acquire(&request).await.unwrap();
        assert_eq!(acquired.mode, AcquisitionMode::Render);
        assert_eq!(fetcher.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_fetch_returns_insufficient_payload() {
        let fetcher = FakeFetcher::serving("tiny");
        let renderer = FakeRenderer::serving("<html><body>r</body></html>");
        let (router, _) = router(&fetcher, &renderer);

        let request = req("https://app.test/").with_hint(RenderHint::ForceFetch).unwrap();
        let acquired = router.acquire(&request).await.unwrap();
        assert_eq!(acquired.mode, AcquisitionMode::Fetch);
        assert_eq!(acquired.payload, b"tiny");
        assert_eq!(renderer.renders(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_escalates() {
        let fetcher = FakeFetcher {
            failure: Some(AcquireError::NetworkFailure {
                message: "tls handshake".into(),
            }),
            ..FakeFetcher::serving("")
        };
        let renderer = FakeRenderer::serving("<html><body>r</body></html>");
        let (router, _) = router(&fetcher, &renderer);

        let acquired = router.acquire(&req("https://picky.test/")).await.unwrap();
        assert_eq!(acquired.mode, AcquisitionMode::Render);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_hard_and_not_escalated() {
        let fetcher = FakeFetcher {
            delay: Duration::from_millis(500),
            ..FakeFetcher::serving(&static_page())
        };
        let renderer = FakeRenderer::serving("<html><body>r</body></html>");
        let (router, cache) = router(&fetcher, &renderer);

        let started = Instant::now();
        let request = req("https://slow.test/").with_timeout_ms(100);
        let err = router.acquire(&request).await.unwrap_err();
        assert_eq!(err, AcquireError::Timeout { timeout_ms: 100 });
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(renderer.renders(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_tier_failure_is_terminal() {
        let fetcher = FakeFetcher::serving("x");
        let renderer = FakeRenderer {
            missing_selectors: vec!["#nope".into()],
            ..FakeRenderer::serving("<html><body>half</body></html>")
        };
        let (router, cache) = router(&fetcher, &renderer);

        let request = req("https://app.test/")
            .with_interactions(vec![Interaction::Click { selector: "#nope".into() }])
            .unwrap();
        let err = router.acquire(&request).await.unwrap_err();
        assert_eq!(err.label(), "interaction_failure");
        assert_eq!(fetcher.fetches(), 0);
        assert_eq!(renderer.renders(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_required_host_goes_straight_to_render() {
        let fetcher = FakeFetcher::serving(&static_page());
        let renderer = FakeRenderer::serving("<html><body>r</body></html>");
        let (router, _) = router(&fetcher, &renderer);

        let acquired = router.acquire(&req("https://www.spa.test/feed")).await.unwrap();
        assert_eq!(acquired.mode, AcquisitionMode::Render);
        assert_eq!(fetcher.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_emits_event() {
        let fetcher = FakeFetcher::serving("x");
        let renderer = FakeRenderer::serving("<html><body>r</body></html>");
        let (router, _) = router(&fetcher, &renderer);
        let mut rx = router.events.subscribe();

        router.acquire(&req("https://app.test/")).await.unwrap();
        match rx.try_recv().unwrap() {
            AcquireEvent::Escalated { reason, .. } => assert_eq!(reason, "too_small"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
