// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Render environment seam.
//!
//! [`Renderer`] hands out isolated tabs; [`RenderContext`] is the handful of
//! primitives the render tier drives them with. Chromium lives in
//! [`chromium`], the tier logic in [`executor`], and [`NoopRenderer`] stands
//! in when no browser is installed.

pub mod chromium;
pub mod executor;

pub use executor::RenderExecutor;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where a navigation ended up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    pub final_url: String,
    pub status: u16,
    pub load_time_ms: u64,
}

/// Why a navigation did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    /// The page did not load within the allotted time.
    #[error("navigation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// The page could not be reached (DNS, TLS, refused connection).
    #[error("page unreachable: {0}")]
    Network(String),
    /// The browser itself failed or went away.
    #[error("render environment failed: {0}")]
    Environment(String),
}

/// A running render environment.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a fresh, isolated tab.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;

    /// Stop the environment. Tabs opened afterwards fail.
    async fn shutdown(&self) -> Result<()>;

    /// Tabs currently open.
    fn active_contexts(&self) -> usize;

    /// False when every `new_context` call is going to fail.
    fn is_available(&self) -> bool {
        true
    }
}

/// One tab. Dropped tabs leak until the environment stops, so callers
/// always `close` them.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Load `url`, giving up after `timeout_ms`.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult, NavigationError>;

    /// Evaluate `script` and return its JSON-serializable result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;

    /// Serialized DOM as it stands now.
    async fn get_html(&self) -> Result<String>;

    async fn get_url(&self) -> Result<String>;

    /// PNG of the viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Render environment for hosts without a browser. Every render fails with
/// a render environment error; the fetch tier is unaffected.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        anyhow::bail!("no browser available; running fetch-only")
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        0
    }

    fn is_available(&self) -> bool {
        false
    }
}
