// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! `grasp cache clear|stats`: manage the on-disk response cache.

use crate::cache::{CacheStats, ResponseCache};
use crate::cli::output::{self, Styled};
use crate::cli::{resolve_config, EngineOptions};
use anyhow::{bail, Result};

fn open(opts: &EngineOptions) -> Result<ResponseCache> {
    let config = resolve_config(opts)?;
    let Some(dir) = config.cache_dir.clone() else {
        bail!("no cache directory configured");
    };
    ResponseCache::persistent(dir, config.cache_ttl(), config.cache_max_entries)
}

/// Remove entries matching `pattern`, or every entry.
pub fn run_clear(opts: &EngineOptions, pattern: Option<&str>) -> Result<()> {
    let cache = open(opts)?;
    let removed = cache.invalidate(pattern);
    if output::is_json() {
        output::print_json(&serde_json::json!({ "removed": removed, "remaining": cache.len() }));
    } else if !output::is_quiet() {
        let s = Styled::new();
        match pattern {
            Some(p) => eprintln!("  {} Removed {removed} entries matching {p}", s.ok_sym()),
            None => eprintln!("  {} Removed all {removed} cached entries", s.ok_sym()),
        }
    }
    Ok(())
}

pub fn run_stats(opts: &EngineOptions) -> Result<()> {
    let cache = open(opts)?;
    // Startup already dropped expired files; count what is left.
    let stats = cache.stats();
    if output::is_json() {
        output::print_json(&stats);
        return Ok(());
    }
    print_stats(&stats, cache.dir().map(|d| d.display().to_string()));
    Ok(())
}

fn print_stats(stats: &CacheStats, dir: Option<String>) {
    let s = Styled::new();
    println!("  {}", s.bold("Response cache"));
    if let Some(dir) = dir {
        println!("  location   {dir}");
    }
    println!("  entries    {} / {}", stats.entry_count, stats.max_entries);
    match stats.oldest_entry_age_secs {
        Some(age) => println!("  oldest     {}", format_age(age)),
        None => println!("  oldest     -"),
    }
    println!("  hit rate   {:.1}%", stats.hit_rate * 100.0);
    println!("  evictions  {}", stats.evictions);
    if stats.corruptions > 0 {
        println!("  {} {} corrupt entries discarded", s.warn_sym(), stats.corruptions);
    }
}

fn format_age(secs: f64) -> String {
    let secs = secs.max(0.0) as u64;
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}
