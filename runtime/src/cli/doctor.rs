// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Environment readiness check.

use crate::cli::output::{self, Styled};
use crate::cli::{resolve_config, EngineOptions};
use crate::renderer::chromium::find_chromium;
use anyhow::Result;
use std::path::Path;
#[cfg(target_os = "macos")]
use std::process::Command;

/// Check browser availability, the cache directory and available memory.
pub async fn run(opts: &EngineOptions) -> Result<()> {
    let s = Styled::new();
    let config = resolve_config(opts)?;
    let chromium = find_chromium();
    let cache_ok = config.cache_dir.as_deref().map(writable);
    let mem_mb = get_available_memory_mb();

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "chromium": chromium.as_ref().map(|p| p.display().to_string()),
            "cache_dir": config.cache_dir.as_ref().map(|p| p.display().to_string()),
            "cache_dir_writable": cache_ok,
            "available_memory_mb": mem_mb,
            "config": config,
            "render_tier": chromium.is_some(),
        }));
        return Ok(());
    }

    println!("grasp doctor");
    println!("============");
    println!();
    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    match &chromium {
        Some(path) => println!("[{}] Chromium found: {}", s.ok_sym(), path.display()),
        None => println!(
            "[{}] Chromium NOT found. Set GRASP_CHROMIUM_PATH or install Chrome; fetch tier still works.",
            s.warn_sym()
        ),
    }

    match (&config.cache_dir, cache_ok) {
        (Some(dir), Some(true)) => println!("[{}] Cache directory {} is writable", s.ok_sym(), dir.display()),
        (Some(dir), _) => println!("[{}] Cache directory {} is NOT writable", s.err_sym(), dir.display()),
        (None, _) => println!("[{}] Cache is memory-only", s.ok_sym()),
    }

    match mem_mb {
        Some(mb) if mb >= 256 => println!("[{}] Available memory: {mb}MB (>= 256MB required)", s.ok_sym()),
        Some(mb) => println!("[{}] Available memory: {mb}MB (< 256MB, may be insufficient)", s.warn_sym()),
        None => println!("[??] Could not determine available memory"),
    }

    println!();
    println!(
        "workers {} | origin delay {}ms | cache ttl {}s | policy {}",
        config.worker_ceiling,
        config.per_origin_default_delay_ms,
        config.cache_ttl_seconds,
        if config.respect_policy { "respected" } else { "ignored" }
    );
    println!();
    if chromium.is_some() {
        println!("Status: READY");
    } else {
        println!("Status: READY (fetch tier only)");
    }
    Ok(())
}

fn writable(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".grasp-doctor");
    let ok = std::fs::write(&probe, b"ok").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}

/// Get available memory in MB (platform-specific).
fn get_available_memory_mb() -> Option<u64> {
    #[cfg(target_os = "macos")]
    {
        let output = Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .ok()?;
        let s = String::from_utf8_lossy(&output.stdout);
        let bytes: u64 = s.trim().parse().ok()?;
        Some(bytes / 1_048_576)
    }
    #[cfg(target_os = "linux")]
    {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        meminfo
            .lines()
            .find(|l| l.starts_with("MemAvailable:"))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb / 1024)
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(writable(&dir.path().join("nested")));
    }
}
