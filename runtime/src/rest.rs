// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP REST API.
//!
//! Every endpoint maps 1:1 to an engine operation. Failures are returned as
//! the serialized [`AcquireError`] with a status code chosen by its kind.

use crate::batch::{self, BatchJob};
use crate::engine::{Engine, PipelineError};
use crate::error::AcquireError;
use crate::events::{self, AcquireEvent};
use crate::extract::ContentKind;
use crate::types::{AcquisitionRequest, Interaction, RenderHint};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::{Any, CorsLayer};

/// Build the axum Router with all REST endpoints.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/acquire", post(handle_acquire))
        .route("/api/v1/batch", post(handle_batch))
        .route("/api/v1/batch/stream", post(handle_batch_stream))
        .route("/api/v1/cache", delete(handle_invalidate))
        .route("/api/v1/cache/stats", get(handle_cache_stats))
        .route("/api/v1/events", get(events_sse))
        .layer(cors)
        .with_state(engine)
}

/// Serve on `127.0.0.1:port` until `shutdown` resolves.
pub async fn start(
    port: u16,
    engine: Arc<Engine>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();
    tracing::info!("REST API listening on http://127.0.0.1:{port}");
    engine.events().emit(AcquireEvent::ServerStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        port,
    });

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────

fn status_for(error: &AcquireError) -> StatusCode {
    match error {
        AcquireError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        AcquireError::PolicyDenied { .. } => StatusCode::FORBIDDEN,
        AcquireError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        AcquireError::NetworkFailure { .. } => StatusCode::BAD_GATEWAY,
        AcquireError::InteractionFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AcquireError::RenderEnvironmentFailure { .. } | AcquireError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AcquireError::CacheCorruption { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: AcquireError) -> Response {
    (status_for(&error), Json(json!({ "ok": false, "error": error }))).into_response()
}

// ── Handlers ────────────────────────────────────────────────────

async fn health(State(engine): State<Arc<Engine>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": engine.uptime().as_secs_f64(),
        "render_available": engine.render_available(),
        "active_contexts": engine.active_render_contexts(),
        "idle_workers": engine.idle_workers(),
        "worker_ceiling": engine.config().worker_ceiling,
    }))
}

#[derive(Debug, Deserialize)]
struct AcquireBody {
    url: String,
    #[serde(default)]
    hint: Option<RenderHint>,
    #[serde(default)]
    interactions: Vec<Interaction>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    /// Run the named extractor on the payload.
    #[serde(default)]
    extract: Option<ContentKind>,
}

impl AcquireBody {
    fn into_request(self, default_timeout_ms: u64) -> Result<AcquisitionRequest, AcquireError> {
        AcquisitionRequest::new(&self.url)?
            .with_timeout_ms(self.timeout_ms.unwrap_or(default_timeout_ms))
            .with_interactions(self.interactions)?
            .with_hint(self.hint.unwrap_or_default())
    }
}

async fn handle_acquire(State(engine): State<Arc<Engine>>, Json(body): Json<AcquireBody>) -> Response {
    let kind = body.extract;
    let request = match body.into_request(engine.config().default_timeout_ms) {
        Ok(request) => request,
        Err(e) => return failure(e),
    };

    match kind {
        None => match engine.acquire(request).await {
            Ok(acquired) => Json(json!({ "ok": true, "result": acquired })).into_response(),
            Err(e) => failure(e),
        },
        Some(kind) => match engine.acquire_and_extract(request, kind).await {
            Ok((acquired, content)) => {
                Json(json!({ "ok": true, "result": acquired, "content": content })).into_response()
            }
            Err(PipelineError::Acquire(e)) => failure(e),
            Err(PipelineError::Extract(e)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "ok": false, "error": { "kind": "extract_failure", "message": e.to_string() } })),
            )
                .into_response(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    urls: Vec<String>,
    #[serde(default)]
    concurrency: Option<usize>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    tag: Option<String>,
}

impl BatchBody {
    fn into_job(self, default_timeout_ms: u64) -> BatchJob {
        let mut job = BatchJob::from_urls(&self.urls, self.timeout_ms.unwrap_or(default_timeout_ms));
        if let Some(workers) = self.concurrency {
            job = job.with_concurrency(workers);
        }
        if let Some(tag) = self.tag {
            job = job.with_tag(tag);
        }
        job
    }
}

async fn handle_batch(State(engine): State<Arc<Engine>>, Json(body): Json<BatchBody>) -> Response {
    let job = body.into_job(engine.config().default_timeout_ms);
    let (handle, _entries) = batch::spawn(Arc::clone(&engine), job);
    match handle.join().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": { "kind": "internal", "message": e.to_string() } })),
        )
            .into_response(),
    }
}

/// Batch entries as SSE in completion order. The batch keeps running if the
/// client disconnects.
async fn handle_batch_stream(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<BatchBody>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let job = body.into_job(engine.config().default_timeout_ms);
    let (_handle, entries) = batch::spawn(Arc::clone(&engine), job);
    let stream = UnboundedReceiverStream::new(entries).filter_map(|entry| async move {
        serde_json::to_string(&entry)
            .ok()
            .map(|json| Ok(Event::default().event("entry").data(json)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize, Default)]
struct InvalidateParams {
    pattern: Option<String>,
}

async fn handle_invalidate(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<InvalidateParams>,
) -> Json<Value> {
    let removed = engine.invalidate_cache(params.pattern.as_deref());
    Json(json!({ "removed": removed }))
}

async fn handle_cache_stats(State(engine): State<Arc<Engine>>) -> Response {
    Json(engine.cache_stats()).into_response()
}

/// SSE query parameters.
#[derive(Debug, Deserialize, Default)]
struct EventsParams {
    host: Option<String>,
}

/// Server-Sent Events endpoint for real-time event streaming.
///
/// Optionally filters request-scoped events by host via `?host=example.com`.
async fn events_sse(
    Query(params): Query<EventsParams>,
    State(engine): State<Arc<Engine>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = engine.events().subscribe();
    let host_filter = params.host;

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(ref host) = host_filter {
                        if !events::event_matches_host(&event, host) {
                            continue;
                        }
                    }
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().data(json));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!("event stream lagged, {missed} events dropped");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
