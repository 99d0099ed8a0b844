// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine facade.
//!
//! Owns every component and exposes the acquisition operations. A single
//! request flows through the policy gate, the rate limiter, the response
//! cache and, on a miss, the adaptive router. Fetch and render work holds a
//! permit from the process-wide worker semaphore; tagged requests also hold
//! a permit from their tag's pool.

use crate::acquisition::{Fetcher, HttpFetcher};
use crate::batch::{self, BatchJob, BatchReport, CancelHandle};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::EngineConfig;
use crate::error::AcquireError;
use crate::events::{AcquireEvent, EventBus};
use crate::extract::{self, ContentKind, ExtractError, StructuredContent};
use crate::policy::{PolicyGate, RateLimiter};
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::{NoopRenderer, RenderExecutor, Renderer};
use crate::router::AdaptiveRouter;
use crate::types::{Acquired, AcquisitionRequest, AcquisitionResult, Interaction, RenderHint};
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Failure of [`Engine::acquire_and_extract`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// The acquisition engine.
pub struct Engine {
    config: EngineConfig,
    gate: PolicyGate,
    limiter: RateLimiter,
    cache: Arc<ResponseCache>,
    router: AdaptiveRouter,
    renderer: Arc<dyn Renderer>,
    workers: Arc<Semaphore>,
    tag_pools: DashMap<String, Arc<Semaphore>>,
    events: EventBus,
    started_at: std::time::Instant,
}

impl Engine {
    /// Build an engine from explicit executors.
    pub fn with_components(
        config: EngineConfig,
        fetcher: Arc<dyn Fetcher>,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self> {
        let config = config.validate();
        let cache = match &config.cache_dir {
            Some(dir) => ResponseCache::persistent(dir.clone(), config.cache_ttl(), config.cache_max_entries)
                .with_context(|| format!("failed to open cache directory {}", dir.display()))?,
            None => ResponseCache::in_memory(config.cache_ttl(), config.cache_max_entries),
        };
        let cache = Arc::new(cache);
        let events = EventBus::default();

        let executor = RenderExecutor::new(
            Arc::clone(&renderer),
            config.render_settle_grace(),
            config.max_wait_command(),
        );
        let router = AdaptiveRouter::new(
            Arc::clone(&fetcher),
            executor,
            Arc::clone(&cache),
            events.clone(),
            config.render_required_hosts.clone(),
        );
        let gate = PolicyGate::new(
            fetcher,
            config.policy_staleness(),
            config.per_origin_default_delay(),
            config.respect_policy,
        );

        Ok(Self {
            gate,
            limiter: RateLimiter::new(config.per_origin_default_delay()),
            cache,
            router,
            renderer,
            workers: Arc::new(Semaphore::new(config.worker_ceiling)),
            tag_pools: DashMap::new(),
            events,
            started_at: std::time::Instant::now(),
            config,
        })
    }

    /// Build an engine with the HTTP fetch tier and a Chromium render tier.
    /// Without a usable browser the engine runs fetch-only and render
    /// attempts fail with `RenderEnvironmentFailure`.
    pub async fn launch(config: EngineConfig) -> Result<Self> {
        let renderer: Arc<dyn Renderer> = match ChromiumRenderer::launch(&config.user_agent).await {
            Ok(chromium) => Arc::new(chromium),
            Err(e) => {
                tracing::warn!("browser unavailable, running fetch-only: {e:#}");
                Arc::new(NoopRenderer)
            }
        };
        Self::with_renderer(config, renderer)
    }

    /// Build an engine that never starts a browser.
    pub fn fetch_only(config: EngineConfig) -> Result<Self> {
        Self::with_renderer(config, Arc::new(NoopRenderer))
    }

    fn with_renderer(config: EngineConfig, renderer: Arc<dyn Renderer>) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(
            &config.user_agent,
            config.fetch_sufficiency_min_bytes,
        ));
        Self::with_components(config, fetcher, renderer)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Whether a real render environment is attached.
    pub fn render_available(&self) -> bool {
        self.renderer.is_available()
    }

    pub fn active_render_contexts(&self) -> usize {
        self.renderer.active_contexts()
    }

    /// Worker permits not currently held.
    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// `Acquire(url, hint?, interactions?, timeoutMs?)`.
    pub async fn acquire_url(
        &self,
        url: &str,
        hint: Option<RenderHint>,
        interactions: Vec<Interaction>,
        timeout_ms: Option<u64>,
    ) -> AcquisitionResult {
        let request = AcquisitionRequest::new(url)?
            .with_timeout_ms(timeout_ms.unwrap_or(self.config.default_timeout_ms))
            .with_interactions(interactions)?
            .with_hint(hint.unwrap_or_default())?;
        self.acquire(request).await
    }

    /// Run one request through gate, limiter, cache and router.
    pub async fn acquire(&self, request: AcquisitionRequest) -> AcquisitionResult {
        let started = Instant::now();
        let url = request.url().to_string();

        if request.interactions().len() > self.config.max_interactions {
            let error = AcquireError::invalid(format!(
                "{} interactions exceed the limit of {}",
                request.interactions().len(),
                self.config.max_interactions
            ));
            return self.finish(&url, started, Err(error));
        }

        let origin = request.origin();
        let authorization = self
            .gate
            .authorize(&origin, &request.policy_path(), request.timeout())
            .await;
        if !authorization.allowed {
            self.events.emit(AcquireEvent::PolicyDenied { url: url.clone() });
            let denied = Err(AcquireError::PolicyDenied { url: url.clone() });
            return self.finish(&url, started, denied);
        }

        let waited = self.limiter.await_turn(&origin, authorization.delay).await;
        if !waited.is_zero() {
            tracing::debug!("waited {}ms for {origin}", waited.as_millis());
        }
        self.events.emit(AcquireEvent::AcquireStarted {
            url: url.clone(),
            hint: request.effective_hint().as_str().to_string(),
        });

        let fingerprint = request.fingerprint();
        if let Some(entry) = self.cache.get(&fingerprint) {
            tracing::debug!("cache hit for {url}");
            self.events.emit(AcquireEvent::CacheHit { url: url.clone() });
            let mut acquired = entry.to_acquired();
            acquired.elapsed_ms = started.elapsed().as_millis() as u64;
            return self.finish(&url, started, Ok(acquired));
        }

        let _permits = match self.permits(request.concurrency_tag()).await {
            Some(permits) => permits,
            None => return self.finish(&url, started, Err(AcquireError::Cancelled)),
        };
        let result = self.router.acquire(&request).await;
        self.finish(&url, started, result)
    }

    /// `AcquireBatch(urls[], concurrency?, timeoutMs?)`.
    pub async fn acquire_batch<S: AsRef<str>>(
        self: &Arc<Self>,
        urls: &[S],
        concurrency: Option<usize>,
        timeout_ms: Option<u64>,
    ) -> BatchReport {
        let mut job = BatchJob::from_urls(urls, timeout_ms.unwrap_or(self.config.default_timeout_ms));
        if let Some(workers) = concurrency {
            job = job.with_concurrency(workers);
        }
        batch::run(Arc::clone(self), job, CancelHandle::default()).await
    }

    /// `InvalidateCache(urlPattern?)`. Returns the number of entries removed.
    pub fn invalidate_cache(&self, pattern: Option<&str>) -> usize {
        let removed = self.cache.invalidate(pattern);
        tracing::info!(
            "invalidated {removed} cache entries matching {}",
            pattern.unwrap_or("*")
        );
        removed
    }

    /// `CacheStats()`.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Acquire `request`, then hand the payload to the `kind` extractor.
    pub async fn acquire_and_extract(
        &self,
        request: AcquisitionRequest,
        kind: ContentKind,
    ) -> Result<(Acquired, StructuredContent), PipelineError> {
        let acquired = self.acquire(request).await?;
        let base = url::Url::parse(&acquired.final_url).ok();
        let content = extract::extract(
            &acquired.payload,
            acquired.content_type.as_deref(),
            kind,
            base.as_ref(),
        )?;
        Ok((acquired, content))
    }

    /// Make per-tag pools available for tagged requests. The first
    /// registration of a tag fixes its size.
    pub fn register_tag(&self, tag: &str, capacity: usize) {
        self.tag_pools
            .entry(tag.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(capacity.max(1))));
    }

    /// Stop handing out worker permits and close the render environment.
    /// In-flight work finishes; later requests fail with `Cancelled`.
    pub async fn shutdown(&self) {
        self.workers.close();
        for pool in self.tag_pools.iter() {
            pool.close();
        }
        if let Err(e) = self.renderer.shutdown().await {
            tracing::warn!("render environment shutdown failed: {e:#}");
        }
        tracing::info!("engine shut down");
    }

    /// Tag permit first, then a global one. `None` once shut down.
    async fn permits(&self, tag: Option<&str>) -> Option<(Option<OwnedSemaphorePermit>, OwnedSemaphorePermit)> {
        let tagged = match tag {
            Some(tag) => {
                // Clone the pool out so the map shard lock is not held across the await.
                let pool = self
                    .tag_pools
                    .entry(tag.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.config.worker_ceiling)))
                    .clone();
                Some(pool.acquire_owned().await.ok()?)
            }
            None => None,
        };
        let global = Arc::clone(&self.workers).acquire_owned().await.ok()?;
        Some((tagged, global))
    }

    fn finish(&self, url: &str, started: Instant, result: AcquisitionResult) -> AcquisitionResult {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(acquired) => {
                tracing::info!(
                    "acquired {url} via {} ({} bytes, {elapsed_ms}ms{})",
                    acquired.mode.as_str(),
                    acquired.byte_size,
                    if acquired.from_cache { ", cached" } else { "" }
                );
                self.events.emit(AcquireEvent::AcquireComplete {
                    url: url.to_string(),
                    mode: acquired.mode.as_str().to_string(),
                    bytes: acquired.byte_size,
                    elapsed_ms,
                    from_cache: acquired.from_cache,
                });
            }
            Err(error) => {
                tracing::warn!("failed to acquire {url}: {error}");
                self.events.emit(AcquireEvent::AcquireFailed {
                    url: url.to_string(),
                    error: error.label().to_string(),
                    elapsed_ms,
                });
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::executor::tests::FakeRenderer;
    use crate::router::tests::{static_page, FakeFetcher};
    use crate::types::AcquisitionMode;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig {
            per_origin_default_delay_ms: 0,
            ..EngineConfig::default()
        }
    }

    fn engine(fetcher: &FakeFetcher, renderer: &FakeRenderer, config: EngineConfig) -> Engine {
        Engine::with_components(config, Arc::new(fetcher.clone()), Arc::new(renderer.clone())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_is_a_cache_hit() {
        let fetcher = FakeFetcher::serving(&static_page());
        let renderer = FakeRenderer::default();
        let engine = engine(&fetcher, &renderer, config());

        let first = engine.acquire_url("https://a.test/page", None, vec![], None).await.unwrap();
        let second = engine.acquire_url("https://a.test/page", None, vec![], None).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.payload, second.payload);
        assert_eq!(fetcher.fetches(), 1);
        assert_eq!(renderer.renders(), 0);
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_fresh_acquisition() {
        let fetcher = FakeFetcher::serving(&static_page());
        let engine = engine(&fetcher, &FakeRenderer::default(), config());

        engine.acquire_url("https://a.test/x", None, vec![], None).await.unwrap();
        assert_eq!(engine.invalidate_cache(Some("https://a.test/")), 1);
        let again = engine.acquire_url("https://a.test/x", None, vec![], None).await.unwrap();

        assert!(!again.from_cache);
        assert_eq!(fetcher.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_denial_short_circuits() {
        let fetcher = FakeFetcher {
            robots: Some("User-agent: *\nDisallow: /private\n".into()),
            ..FakeFetcher::serving(&static_page())
        };
        let engine = engine(&fetcher, &FakeRenderer::default(), config());
        let mut rx = engine.events().subscribe();

        let err = engine
            .acquire_url("https://a.test/private/doc", None, vec![], None)
            .await
            .unwrap_err();

        assert!(matches!(err, AcquireError::PolicyDenied { .. }));
        assert_eq!(fetcher.fetches(), 0);
        assert!(matches!(rx.try_recv().unwrap(), AcquireEvent::PolicyDenied { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_can_be_ignored() {
        let fetcher = FakeFetcher {
            robots: Some("User-agent: *\nDisallow: /\n".into()),
            ..FakeFetcher::serving(&static_page())
        };
        let config = EngineConfig {
            respect_policy: false,
            ..config()
        };
        let engine = engine(&fetcher, &FakeRenderer::default(), config);
        assert!(engine.acquire_url("https://a.test/", None, vec![], None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_many_interactions_rejected() {
        let fetcher = FakeFetcher::serving(&static_page());
        let config = EngineConfig {
            max_interactions: 2,
            ..config()
        };
        let engine = engine(&fetcher, &FakeRenderer::default(), config);
        let steps = vec![Interaction::Wait { ms: 1 }; 3];

        let err = engine.acquire_url("https://a.test/", None, steps, None).await.unwrap_err();
        assert!(matches!(err, AcquireError::InvalidRequest { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactions_route_to_render() {
        let fetcher = FakeFetcher::serving(&static_page());
        let renderer = FakeRenderer::serving("<html><body><p>rendered</p></body></html>");
        let engine = engine(&fetcher, &renderer, config());

        let acquired = engine
            .acquire_url("https://a.test/", None, vec![Interaction::Scroll { pixels: 400 }], None)
            .await
            .unwrap();
        assert_eq!(acquired.mode, AcquisitionMode::Render);
        assert_eq!(fetcher.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_ceiling_bounds_concurrency() {
        let fetcher = FakeFetcher {
            delay: Duration::from_millis(100),
            ..FakeFetcher::serving(&static_page())
        };
        let config = EngineConfig {
            worker_ceiling: 1,
            ..config()
        };
        let engine = Arc::new(engine(&fetcher, &FakeRenderer::default(), config));

        let started = Instant::now();
        let a = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.acquire_url("https://a.test/", None, vec![], None).await }
        });
        let b = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.acquire_url("https://b.test/", None, vec![], None).await }
        });
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_new_work() {
        let fetcher = FakeFetcher::serving(&static_page());
        let engine = engine(&fetcher, &FakeRenderer::default(), config());
        engine.shutdown().await;

        let err = engine.acquire_url("https://a.test/", None, vec![], None).await.unwrap_err();
        assert_eq!(err, AcquireError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_and_extract() {
        let fetcher = FakeFetcher::serving(&static_page());
        let engine = engine(&fetcher, &FakeRenderer::default(), config());
        let request = AcquisitionRequest::new("https://a.test/post").unwrap();

        let (acquired, content) = engine
            .acquire_and_extract(request, ContentKind::Generic)
            .await
            .unwrap();
        assert_eq!(acquired.mode, AcquisitionMode::Fetch);
        assert_eq!(content.kind(), ContentKind::Generic);
    }

    #[tokio::test]
    async fn test_persistent_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::serving(&static_page());
        let config = EngineConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..config()
        };
        let first = engine(&fetcher, &FakeRenderer::default(), config.clone());
        first.acquire_url("https://a.test/", None, vec![], None).await.unwrap();
        drop(first);

        let second = engine(&fetcher, &FakeRenderer::default(), config);
        let hit = second.acquire_url("https://a.test/", None, vec![], None).await.unwrap();
        assert!(hit.from_cache);
        assert_eq!(fetcher.fetches(), 1);
    }
}
