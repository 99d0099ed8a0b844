// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommand implementations for the grasp binary.

pub mod acquire_cmd;
pub mod batch_cmd;
pub mod cache_cmd;
pub mod doctor;
pub mod output;
pub mod serve;

use crate::config::EngineConfig;
use crate::engine::Engine;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options every engine-backed command shares.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// JSON config file.
    pub config: Option<PathBuf>,
    /// Overrides the configured cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Keep the cache in memory for this run only.
    pub no_persist: bool,
    /// Skip launching a browser.
    pub no_browser: bool,
    /// Ignore origin policy documents.
    pub ignore_policy: bool,
}

/// `~/.grasp/cache`, where CLI runs persist responses unless told otherwise.
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".grasp")
        .join("cache")
}

/// Defaults, then the config file, then `GRASP_*`, then flags.
pub fn resolve_config(opts: &EngineOptions) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(opts.config.as_deref())?;
    if let Some(dir) = &opts.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if opts.no_persist {
        config.cache_dir = None;
    } else if config.cache_dir.is_none() {
        config.cache_dir = Some(default_cache_dir());
    }
    if opts.ignore_policy {
        config.respect_policy = false;
    }
    Ok(config)
}

pub async fn build_engine(opts: &EngineOptions) -> Result<Arc<Engine>> {
    let config = resolve_config(opts)?;
    let engine = if opts.no_browser {
        Engine::fetch_only(config)?
    } else {
        Engine::launch(config).await?
    };
    Ok(Arc::new(engine))
}

/// Read newline-separated URLs from `path`, or stdin for `-`. Blank lines
/// and `#` comments are skipped.
pub fn read_url_list(path: &Path) -> Result<Vec<String>> {
    use anyhow::Context;
    use std::io::Read;

    let mut raw = String::new();
    if path == Path::new("-") {
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read URLs from stdin")?;
    } else {
        raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read URL list {}", path.display()))?;
    }
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
