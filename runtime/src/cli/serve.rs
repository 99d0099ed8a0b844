// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! `grasp serve`: run the engine behind the REST API.

use crate::cli::output::{self, Styled};
use crate::cli::{build_engine, EngineOptions};
use crate::{maintenance, rest};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

pub const DEFAULT_PORT: u16 = 7750;

/// Serve until Ctrl-C. The maintenance loop runs alongside the server and
/// stops with it.
pub async fn run(opts: &EngineOptions, port: u16) -> Result<()> {
    let s = Styled::new();
    let engine = build_engine(opts).await?;
    info!("starting grasp v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = Arc::new(Notify::new());
    let sweeper = maintenance::spawn(
        Arc::clone(engine.cache()),
        engine.events().clone(),
        engine.config().cache_sweep_interval(),
        Arc::clone(&shutdown),
    );

    if !output::is_quiet() {
        eprintln!(
            "  {} grasp v{} listening on http://127.0.0.1:{port}",
            s.ok_sym(),
            env!("CARGO_PKG_VERSION")
        );
        if !engine.render_available() {
            eprintln!("  {} No browser found; render tier disabled", s.warn_sym());
        }
    }

    let stop = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
    };
    let result = rest::start(port, Arc::clone(&engine), stop).await;

    shutdown.notify_one();
    if let Err(e) = sweeper.await {
        tracing::warn!("maintenance loop ended abnormally: {e}");
    }
    engine.shutdown().await;

    if !output::is_quiet() {
        eprintln!("  {} grasp stopped.", s.ok_sym());
    }
    result
}
