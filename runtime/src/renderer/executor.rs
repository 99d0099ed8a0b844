// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Render tier: full page load, settle, then the interaction sequence.
//!
//! The request budget is a hard ceiling over context creation, navigation,
//! settling and every interaction. Interactions run strictly in order; the
//! first failing command aborts the rest and the failure carries whatever
//! content the page held at that point.

use super::{NavigationError, RenderContext, Renderer};
use crate::error::AcquireError;
use crate::types::{AcquisitionMode, AcquisitionRequest, Acquired, Interaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Interval between settle probes.
const SETTLE_POLL: Duration = Duration::from_millis(100);

/// The resource count must stay flat this long to count as network idle.
const IDLE_WINDOW: Duration = Duration::from_millis(500);

/// Upper bound on the settle after a click.
const POST_CLICK_SETTLE: Duration = Duration::from_secs(1);

/// Closing a context must not hold a worker hostage.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const SETTLE_PROBE: &str = "(() => ({ ready: document.readyState, resources: performance.getEntriesByType('resource').length }))()";

/// Executes requests in a rendering environment.
pub struct RenderExecutor {
    renderer: Arc<dyn Renderer>,
    settle_grace: Duration,
    max_wait_command: Duration,
}

impl RenderExecutor {
    pub fn new(renderer: Arc<dyn Renderer>, settle_grace: Duration, max_wait_command: Duration) -> Self {
        Self {
            renderer,
            settle_grace,
            max_wait_command,
        }
    }

    /// Render `request` within `budget`.
    pub async fn render(
        &self,
        request: &AcquisitionRequest,
        budget: Duration,
    ) -> Result<Acquired, AcquireError> {
        let started = Instant::now();
        let deadline = started + budget;
        let timeout = || AcquireError::Timeout {
            timeout_ms: budget.as_millis() as u64,
        };

        let mut ctx = match tokio::time::timeout_at(deadline, self.renderer.new_context()).await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => {
                tracing::warn!("render environment unavailable: {e:#}");
                return Err(AcquireError::RenderEnvironmentFailure {
                    message: format!("{e:#}"),
                });
            }
            Err(_) => return Err(timeout()),
        };

        let outcome =
            tokio::time::timeout_at(deadline, self.drive(ctx.as_mut(), request, deadline, started))
                .await;

        if tokio::time::timeout(CLOSE_TIMEOUT, ctx.close()).await.is_err() {
            tracing::debug!("closing render context for {} timed out", request.url());
        }

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("render of {} exceeded {}ms", request.url(), budget.as_millis());
                Err(timeout())
            }
        }
    }

    async fn drive(
        &self,
        ctx: &mut dyn RenderContext,
        request: &AcquisitionRequest,
        deadline: Instant,
        started: Instant,
    ) -> Result<Acquired, AcquireError> {
        let url = request.url().as_str();
        let remaining_ms = deadline
            .saturating_duration_since(Instant::now())
            .as_millis()
            .max(1) as u64;

        let nav = match ctx.navigate(url, remaining_ms).await {
            Ok(nav) => nav,
            Err(NavigationError::Network(message)) if Instant::now() < deadline => {
                return Err(AcquireError::NetworkFailure { message })
            }
            Err(NavigationError::Environment(message)) if Instant::now() < deadline => {
                tracing::warn!("render environment failed while loading {url}: {message}");
                return Err(AcquireError::RenderEnvironmentFailure { message });
            }
            // Cut short by the request deadline, whatever the browser called it.
            Err(_) => {
                return Err(AcquireError::Timeout {
                    timeout_ms: deadline.duration_since(started).as_millis() as u64,
                })
            }
        };

        self.settle(ctx, self.settle_grace).await;

        let mut captures = Vec::new();
        for (index, step) in request.interactions().iter().enumerate() {
            if let Err(message) = self.run_step(ctx, step, &mut captures).await {
                tracing::info!(
                    "interaction {index} ({}) failed on {url}: {message}",
                    step.name()
                );
                let partial = match self.snapshot(ctx, url, &nav.final_url, captures, started).await {
                    Ok(acquired) => Some(Box::new(acquired)),
                    Err(_) => None,
                };
                return Err(AcquireError::InteractionFailure {
                    index,
                    command: step.name().to_string(),
                    message,
                    partial,
                });
            }
        }

        self.snapshot(ctx, url, &nav.final_url, captures, started).await
    }

    /// Wait for the network to go idle, bounded by `grace`. Falls through
    /// once the document is ready if the network never idles.
    async fn settle(&self, ctx: &dyn RenderContext, grace: Duration) {
        let until = Instant::now() + grace;
        let mut last_count: Option<u64> = None;
        let mut stable_since = Instant::now();

        loop {
            let probe = match ctx.execute_js(SETTLE_PROBE).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("settle probe failed: {e:#}");
                    return;
                }
            };
            let ready = probe.get("ready").and_then(|v| v.as_str()) == Some("complete");
            let count = probe.get("resources").and_then(|v| v.as_u64()).unwrap_or(0);

            let now = Instant::now();
            if last_count != Some(count) {
                last_count = Some(count);
                stable_since = now;
            }
            if ready && now.duration_since(stable_since) >= IDLE_WINDOW {
                return;
            }
            if now >= until {
                if !ready {
                    tracing::debug!("settle grace expired before the document was ready");
                }
                return;
            }
            tokio::time::sleep(SETTLE_POLL.min(until - now)).await;
        }
    }

    async fn run_step(
        &self,
        ctx: &dyn RenderContext,
        step: &Interaction,
        captures: &mut Vec<Vec<u8>>,
    ) -> Result<(), String> {
        match step {
            Interaction::Click { selector } => {
                run_script(ctx, &click_script(selector)).await?;
                self.settle(ctx, self.settle_grace.min(POST_CLICK_SETTLE)).await;
                Ok(())
            }
            Interaction::Fill { selector, value } => {
                run_script(ctx, &fill_script(selector, value)).await
            }
            Interaction::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms).min(self.max_wait_command)).await;
                Ok(())
            }
            Interaction::Scroll { pixels } => run_script(ctx, &scroll_script(*pixels)).await,
            Interaction::Capture => {
                let png = ctx.screenshot().await.map_err(|e| format!("{e:#}"))?;
                captures.push(png);
                Ok(())
            }
        }
    }

    async fn snapshot(
        &self,
        ctx: &dyn RenderContext,
        url: &str,
        nav_final_url: &str,
        captures: Vec<Vec<u8>>,
        started: Instant,
    ) -> Result<Acquired, AcquireError> {
        let html = ctx
            .get_html()
            .await
            .map_err(|e| AcquireError::RenderEnvironmentFailure {
                message: format!("failed to read rendered document: {e:#}"),
            })?;
        let final_url = match ctx.get_url().await {
            Ok(u) if !u.is_empty() && u != "about:blank" => u,
            _ => nav_final_url.to_string(),
        };
        let payload = html.into_bytes();

        Ok(Acquired {
            url: url.to_string(),
            final_url,
            byte_size: payload.len(),
            payload,
            content_type: Some("text/html; charset=utf-8".to_string()),
            mode: AcquisitionMode::Render,
            elapsed_ms: started.elapsed().as_millis() as u64,
            from_cache: false,
            captures,
        })
    }
}

/// Run an action script that reports `{ ok, error }`.
async fn run_script(ctx: &dyn RenderContext, script: &str) -> Result<(), String> {
    let result = ctx.execute_js(script).await.map_err(|e| format!("{e:#}"))?;
    if result.get("ok").and_then(|v| v.as_bool()) == Some(true) {
        Ok(())
    } else {
        Err(result
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("command reported failure")
            .to_string())
    }
}

fn click_script(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector('{}');
            if (!el) {{ return {{ ok: false, error: 'no element matches selector' }}; }}
            el.scrollIntoView({{ block: 'center' }});
            el.click();
            return {{ ok: true }};
        }})()"#,
        sanitize_js_string(selector)
    )
}

fn fill_script(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector('{}');
            if (!el) {{ return {{ ok: false, error: 'no element matches selector' }}; }}
            if (!('value' in el)) {{ return {{ ok: false, error: 'element is not fillable' }}; }}
            el.focus();
            el.value = '{}';
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return {{ ok: true }};
        }})()"#,
        sanitize_js_string(selector),
        sanitize_js_string(value)
    )
}

fn scroll_script(pixels: i64) -> String {
    format!("(() => {{ window.scrollBy(0, {pixels}); return {{ ok: true }}; }})()")
}

/// Escape a string for injection into a single-quoted JavaScript literal.
///
/// Values are only ever placed inside string literals, never in code
/// positions. `<` and `>` are hex-escaped so a value cannot close a script
/// element.
fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\u{2028}' => result.push_str("\\u2028"),
            '\u{2029}' => result.push_str("\\u2029"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}
