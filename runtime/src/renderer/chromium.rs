// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Headless Chromium backend over chromiumoxide.
//!
//! One browser process per engine; every render gets its own tab. The
//! browser is closed explicitly on shutdown, after which no new tabs open.

use super::{NavigationError, NavigationResult, RenderContext, Renderer};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Viewport used for every tab, so captures are comparable across runs.
const VIEWPORT: (u32, u32) = (1280, 800);

/// Locate a Chromium or Chrome binary.
///
/// `GRASP_CHROMIUM_PATH` wins, then a browser unpacked under
/// `~/.grasp/chromium`, then `PATH`, then the stock macOS install.
pub fn find_chromium() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("GRASP_CHROMIUM_PATH").map(PathBuf::from) {
        if path.exists() {
            return Some(path);
        }
        tracing::warn!("GRASP_CHROMIUM_PATH={} does not exist", path.display());
    }

    let bundled = dirs::home_dir().map(|home| home.join(".grasp").join("chromium"));
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(root) = &bundled {
        if cfg!(target_os = "macos") {
            for arch in ["chrome-mac-arm64", "chrome-mac-x64"] {
                candidates.push(root.join(arch).join(
                    "Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
                ));
            }
        } else {
            candidates.push(root.join("chrome-linux64").join("chrome"));
        }
        candidates.push(root.join("chrome"));
    }
    if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
        return Some(found);
    }

    ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
        .into_iter()
        .find_map(|name| which::which(name).ok())
        .or_else(|| {
            let stock = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
            (cfg!(target_os = "macos") && stock.exists()).then_some(stock)
        })
}

/// Render environment backed by a headless Chromium process.
pub struct ChromiumRenderer {
    browser: Mutex<Option<Browser>>,
    open_tabs: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Start headless Chromium sending `user_agent` on every request.
    pub async fn launch(user_agent: &str) -> Result<Self> {
        let executable = find_chromium()
            .context("no Chromium binary found; install Chrome or set GRASP_CHROMIUM_PATH")?;
        tracing::debug!("launching {}", executable.display());

        let config = BrowserConfig::builder()
            .chrome_executable(executable)
            .window_size(VIEWPORT.0, VIEWPORT.1)
            .args([
                "--headless=new",
                "--disable-gpu",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-extensions",
                "--disable-background-networking",
                "--mute-audio",
            ])
            .arg(format!("--user-agent={user_agent}"))
            .build()
            .map_err(|e| anyhow!("invalid browser configuration: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Chromium failed to start")?;

        // The CDP handler must be polled for the browser to make progress.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("cdp handler: {e}");
                }
            }
            tracing::debug!("cdp handler finished");
        });

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            open_tabs: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = {
            let guard = self.browser.lock().await;
            let Some(browser) = guard.as_ref() else {
                bail!("browser has been shut down");
            };
            browser
                .new_page("about:blank")
                .await
                .context("could not open a tab")?
        };
        self.open_tabs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ChromiumTab {
            page,
            open_tabs: Arc::clone(&self.open_tabs),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = browser.close().await {
            tracing::debug!("browser close command failed: {e}");
        }
        browser.wait().await.context("waiting for Chromium to exit")?;
        tracing::info!("Chromium stopped");
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.open_tabs.load(Ordering::SeqCst)
    }
}

/// Split a failed `goto` into what the router can act on. Chrome reports
/// unreachable pages as an error text such as `net::ERR_NAME_NOT_RESOLVED`;
/// anything else means the browser or its connection broke.
fn classify_navigation_error(err: CdpError, timeout_ms: u64) -> NavigationError {
    match err {
        CdpError::Timeout => NavigationError::Timeout { timeout_ms },
        CdpError::ChromeMessage(text) if text.contains("net::ERR_") => NavigationError::Network(text),
        other => NavigationError::Environment(other.to_string()),
    }
}

/// One browser tab.
pub struct ChromiumTab {
    page: Page,
    open_tabs: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumTab {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult, NavigationError> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout_ms);

        match tokio::time::timeout_at(deadline, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(classify_navigation_error(e, timeout_ms)),
            Err(_) => return Err(NavigationError::Timeout { timeout_ms }),
        }
        // A redirect or client-side navigation may still be in flight.
        if tokio::time::timeout_at(deadline, self.page.wait_for_navigation())
            .await
            .is_err()
        {
            tracing::debug!("{url} still navigating at the deadline");
        }

        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());
        Ok(NavigationResult {
            final_url,
            // CDP reports the status per network response, not per goto.
            status: 200,
            load_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .context("script evaluation failed")?
            .into_value()
            .map_err(|e| anyhow!("script result is not JSON: {e:?}"))
    }

    async fn get_html(&self) -> Result<String> {
        self.page.content().await.context("could not read the document")
    }

    async fn get_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .context("could not read the tab url")?
            .unwrap_or_default())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page.screenshot(params).await.context("screenshot failed")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.open_tabs.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = self.page.close().await {
            tracing::debug!("closing tab: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // needs a Chromium binary
    async fn test_render_capture_and_shutdown() {
        let renderer = ChromiumRenderer::launch("grasp-test").await.unwrap();
        let mut tab = renderer.new_context().await.unwrap();

        tab.navigate("data:text/html,<h1>Quay</h1><p>Seven berths</p>", 10_000)
            .await
            .unwrap();
        let heading = tab.execute_js("document.querySelector('h1').textContent").await.unwrap();
        assert_eq!(heading, serde_json::json!("Quay"));
        assert!(tab.get_html().await.unwrap().contains("<p>Seven berths</p>"));
        assert!(tab.screenshot().await.unwrap().starts_with(&[0x89, b'P', b'N', b'G']));

        tab.close().await.unwrap();
        assert_eq!(renderer.active_contexts(), 0);

        renderer.shutdown().await.unwrap();
        assert!(renderer.new_context().await.is_err());
    }

    #[test]
    fn test_navigation_errors_are_classified() {
        assert_eq!(
            classify_navigation_error(CdpError::Timeout, 250),
            NavigationError::Timeout { timeout_ms: 250 }
        );
        assert_eq!(
            classify_navigation_error(CdpError::ChromeMessage("net::ERR_NAME_NOT_RESOLVED".into()), 250),
            NavigationError::Network("net::ERR_NAME_NOT_RESOLVED".into())
        );
        assert!(matches!(
            classify_navigation_error(CdpError::NoResponse, 250),
            NavigationError::Environment(_)
        ));
    }

    #[test]
    fn test_env_override_must_exist() {
        std::env::set_var("GRASP_CHROMIUM_PATH", "/nonexistent/grasp/chrome");
        let found = find_chromium();
        std::env::remove_var("GRASP_CHROMIUM_PATH");
        assert_ne!(found, Some(PathBuf::from("/nonexistent/grasp/chrome")));
    }
}
