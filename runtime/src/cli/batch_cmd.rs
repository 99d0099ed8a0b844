// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! `grasp batch`: acquire many URLs over a bounded worker pool.
//!
//! Entries are reported as they complete. With `--json` each one is a JSON
//! line; the final report follows as the last line.

use crate::batch::{self, BatchEntry, BatchJob};
use crate::cli::output::{self, Styled};
use crate::cli::{build_engine, read_url_list, EngineOptions};
use anyhow::{bail, Result};
use std::path::PathBuf;

pub struct BatchArgs {
    pub urls: Vec<String>,
    /// Newline-separated URL list, `-` for stdin.
    pub file: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub tag: Option<String>,
}

pub async fn run(opts: &EngineOptions, args: BatchArgs) -> Result<()> {
    let mut urls = args.urls;
    if let Some(file) = &args.file {
        urls.extend(read_url_list(file)?);
    }
    if urls.is_empty() {
        bail!("no URLs given; pass them as arguments or with --file");
    }

    let engine = build_engine(opts).await?;
    let mut job = BatchJob::from_urls(&urls, args.timeout_ms.unwrap_or(engine.config().default_timeout_ms));
    if let Some(workers) = args.concurrency {
        job = job.with_concurrency(workers);
    }
    if let Some(tag) = args.tag {
        job = job.with_tag(tag);
    }

    let s = Styled::new();
    let total = job.len();
    let (handle, mut entries) = batch::spawn(std::sync::Arc::clone(&engine), job);

    // Ctrl-C stops dispatching; in-flight requests finish and the rest are
    // reported as cancelled.
    let cancel = handle.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling remaining batch requests");
            cancel.cancel();
        }
    });

    let mut done = 0;
    while let Some(entry) = entries.recv().await {
        done += 1;
        if output::is_json() {
            output::print_json_line(&entry);
        } else if !output::is_quiet() {
            eprintln!("  [{done}/{total}] {}", describe(&entry, &s));
        }
    }
    interrupt.abort();

    let report = handle.join().await?;
    engine.shutdown().await;

    if output::is_json() {
        output::print_json_line(&serde_json::json!({
            "id": report.id,
            "total": report.len(),
            "succeeded": report.succeeded(),
            "failed": report.failed(),
            "cancelled": report.cancelled(),
            "elapsed_ms": report.elapsed_ms,
        }));
    } else if !output::is_quiet() {
        eprintln!();
        eprintln!(
            "  {} {} succeeded, {} failed, {} cancelled in {}ms",
            if report.failed() == 0 && report.cancelled() == 0 { s.ok_sym() } else { s.warn_sym() },
            report.succeeded(),
            report.failed(),
            report.cancelled(),
            report.elapsed_ms
        );
    }
    Ok(())
}

fn describe(entry: &BatchEntry, s: &Styled) -> String {
    match &entry.result {
        Ok(acquired) => format!(
            "{} {} {}",
            s.ok_sym(),
            entry.url,
            s.dim(&format!(
                "{} {}{}",
                acquired.mode.as_str(),
                output::format_bytes(acquired.byte_size),
                if acquired.from_cache { " cached" } else { "" }
            ))
        ),
        Err(e) => format!("{} {} {}", s.err_sym(), entry.url, s.dim(&e.to_string())),
    }
}
