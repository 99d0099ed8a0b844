// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Event bus: typed events from every component.
//!
//! The EventBus is a `tokio::sync::broadcast` channel that carries
//! [`AcquireEvent`] values. Any consumer (the REST SSE endpoint, a CLI
//! progress printer, tests) can subscribe independently. When no
//! subscribers exist, events are silently dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event the engine emits. Serialized to JSON for SSE streaming.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AcquireEvent {
    // ── Request Events ────────────────────
    /// A request passed the policy gate and the limiter.
    AcquireStarted { url: String, hint: String },
    /// Served from the response cache.
    CacheHit { url: String },
    /// The fetch tier was not enough; moving to the render tier.
    Escalated { url: String, reason: String },
    /// A request finished successfully.
    AcquireComplete {
        url: String,
        mode: String,
        bytes: usize,
        elapsed_ms: u64,
        from_cache: bool,
    },
    /// A request finished with a failure.
    AcquireFailed {
        url: String,
        error: String,
        elapsed_ms: u64,
    },
    /// The origin's policy refused the path.
    PolicyDenied { url: String },

    // ── Batch Events ──────────────────────
    /// One slot of a batch was filled.
    BatchProgress {
        batch_id: String,
        completed: usize,
        total: usize,
    },
    /// Every slot of a batch is filled.
    BatchComplete {
        batch_id: String,
        succeeded: usize,
        failed: usize,
        cancelled: usize,
        total_ms: u64,
    },

    // ── System Events ─────────────────────
    /// The REST server started.
    ServerStarted { version: String, port: u16 },
    /// The maintenance loop swept the cache.
    CacheSwept { removed: usize, remaining: usize },
}

impl AcquireEvent {
    /// URL the event concerns, if it is request-scoped.
    pub fn url(&self) -> Option<&str> {
        match self {
            AcquireEvent::AcquireStarted { url, .. }
            | AcquireEvent::CacheHit { url }
            | AcquireEvent::Escalated { url, .. }
            | AcquireEvent::AcquireComplete { url, .. }
            | AcquireEvent::AcquireFailed { url, .. }
            | AcquireEvent::PolicyDenied { url } => Some(url),
            AcquireEvent::BatchProgress { .. }
            | AcquireEvent::BatchComplete { .. }
            | AcquireEvent::ServerStarted { .. }
            | AcquireEvent::CacheSwept { .. } => None,
        }
    }
}

/// The central event bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AcquireEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: AcquireEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<AcquireEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Whether `event` concerns `host`. Events without a URL match every host.
pub fn event_matches_host(event: &AcquireEvent, host: &str) -> bool {
    match event.url() {
        Some(url) => url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(host)))
            .unwrap_or(false),
        None => true,
    }
}
