// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.
//!
//! Resolution order: built-in defaults, then an optional JSON file, then
//! `GRASP_*` environment variables. CLI flags are applied last by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_WORKER_CEILING: usize = 3;
const DEFAULT_PER_ORIGIN_DELAY_MS: u64 = 500;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
const DEFAULT_RENDER_SETTLE_GRACE_MS: u64 = 2000;
const DEFAULT_FETCH_SUFFICIENCY_MIN_BYTES: usize = 256;
const DEFAULT_POLICY_STALENESS_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MAX_INTERACTIONS: usize = 20;
const DEFAULT_MAX_WAIT_COMMAND_MS: u64 = 5000;
const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 300;

/// Agent token matched against `User-agent` groups in policy documents.
pub const AGENT_TOKEN: &str = "grasp";

/// User agent sent by the fetch tier and the policy gate.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; grasp/0.1; +https://github.com/grasp-dev/grasp)";

/// Hosts whose pages are known to need script execution.
const DEFAULT_RENDER_REQUIRED_HOSTS: &[&str] = &[
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
    "tiktok.com",
    "reddit.com",
];

/// All recognized engine options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Process-wide ceiling on concurrent fetch/render work; also the
    /// default batch pool size.
    pub worker_ceiling: usize,
    /// Minimum spacing between request starts to one origin.
    pub per_origin_default_delay_ms: u64,
    /// Response cache time to live.
    pub cache_ttl_seconds: u64,
    /// Maximum cached entries before insertion-order eviction.
    pub cache_max_entries: usize,
    /// Grace period for the network to go idle after load.
    pub render_settle_grace_ms: u64,
    /// Fetch payloads smaller than this are insufficient.
    pub fetch_sufficiency_min_bytes: usize,
    /// How long a policy record stays fresh.
    pub policy_staleness_secs: u64,
    /// Timeout for requests that do not carry their own.
    pub default_timeout_ms: u64,
    /// Longest accepted interaction sequence.
    pub max_interactions: usize,
    /// Cap on a single `wait` command.
    pub max_wait_command_ms: u64,
    /// Period of the background cache sweep.
    pub cache_sweep_interval_secs: u64,
    /// Persist cache entries under this directory when set.
    pub cache_dir: Option<PathBuf>,
    /// User agent for outbound HTTP requests.
    pub user_agent: String,
    /// Honor origin policy documents.
    pub respect_policy: bool,
    /// Hosts routed straight to the render tier under `auto`.
    pub render_required_hosts: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_ceiling: DEFAULT_WORKER_CEILING,
            per_origin_default_delay_ms: DEFAULT_PER_ORIGIN_DELAY_MS,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECS,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            render_settle_grace_ms: DEFAULT_RENDER_SETTLE_GRACE_MS,
            fetch_sufficiency_min_bytes: DEFAULT_FETCH_SUFFICIENCY_MIN_BYTES,
            policy_staleness_secs: DEFAULT_POLICY_STALENESS_SECS,
            default_timeout_ms: crate::types::DEFAULT_TIMEOUT_MS,
            max_interactions: DEFAULT_MAX_INTERACTIONS,
            max_wait_command_ms: DEFAULT_MAX_WAIT_COMMAND_MS,
            cache_sweep_interval_secs: DEFAULT_CACHE_SWEEP_INTERVAL_SECS,
            cache_dir: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            respect_policy: true,
            render_required_hosts: DEFAULT_RENDER_REQUIRED_HOSTS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with the config file (if any) and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut cfg = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg.validate())
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Overlay `GRASP_*` environment variables.
    pub fn apply_env(&mut self) {
        self.worker_ceiling = read_env_usize("GRASP_WORKER_CEILING", self.worker_ceiling);
        self.per_origin_default_delay_ms = read_env_u64(
            "GRASP_PER_ORIGIN_DELAY_MS",
            self.per_origin_default_delay_ms,
        );
        self.cache_ttl_seconds = read_env_u64("GRASP_CACHE_TTL_SECS", self.cache_ttl_seconds);
        self.cache_max_entries = read_env_usize("GRASP_CACHE_MAX_ENTRIES", self.cache_max_entries);
        self.render_settle_grace_ms =
            read_env_u64("GRASP_RENDER_SETTLE_GRACE_MS", self.render_settle_grace_ms);
        self.fetch_sufficiency_min_bytes = read_env_usize(
            "GRASP_FETCH_SUFFICIENCY_MIN_BYTES",
            self.fetch_sufficiency_min_bytes,
        );
        self.policy_staleness_secs =
            read_env_u64("GRASP_POLICY_STALENESS_SECS", self.policy_staleness_secs);
        self.default_timeout_ms = read_env_u64("GRASP_DEFAULT_TIMEOUT_MS", self.default_timeout_ms);
        if let Some(dir) = read_env_string("GRASP_CACHE_DIR") {
            if !dir.is_empty() {
                self.cache_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(ua) = read_env_string("GRASP_USER_AGENT") {
            if !ua.is_empty() {
                self.user_agent = ua;
            }
        }
        if let Some(flag) = read_env_string("GRASP_RESPECT_POLICY") {
            self.respect_policy = !matches!(flag.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
    }

    /// Clamp values that would make the engine unusable.
    pub fn validate(mut self) -> Self {
        self.worker_ceiling = self.worker_ceiling.max(1);
        self.cache_max_entries = self.cache_max_entries.max(1);
        self.default_timeout_ms = self.default_timeout_ms.max(1);
        self.cache_sweep_interval_secs = self.cache_sweep_interval_secs.max(1);
        self
    }

    pub fn per_origin_default_delay(&self) -> Duration {
        Duration::from_millis(self.per_origin_default_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn render_settle_grace(&self) -> Duration {
        Duration::from_millis(self.render_settle_grace_ms)
    }

    pub fn policy_staleness(&self) -> Duration {
        Duration::from_secs(self.policy_staleness_secs)
    }

    pub fn max_wait_command(&self) -> Duration {
        Duration::from_millis(self.max_wait_command_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }

    /// Whether `host` (or a parent domain of it) is known to need rendering.
    pub fn requires_render(&self, host: &str) -> bool {
        host_listed(&self.render_required_hosts, host)
    }
}

/// Whether `host`, or a parent domain of it, appears in `hosts`.
pub(crate) fn host_listed(hosts: &[String], host: &str) -> bool {
    let host = host.trim_start_matches("www.");
    hosts
        .iter()
        .any(|h| host == h || host.ends_with(&format!(".{h}")))
}

fn read_env_u64(name: &str, default_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_usize(name: &str, default_value: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default_value)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.worker_ceiling, 3);
        assert_eq!(cfg.per_origin_default_delay_ms, 500);
        assert_eq!(cfg.cache_ttl_seconds, 3600);
        assert_eq!(cfg.cache_max_entries, 10_000);
        assert_eq!(cfg.render_settle_grace_ms, 2000);
        assert_eq!(cfg.fetch_sufficiency_min_bytes, 256);
        assert_eq!(cfg.policy_staleness(), Duration::from_secs(86_400));
        assert!(cfg.respect_policy);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grasp.json");
        std::fs::write(&path, r#"{"workerCeiling": 8, "cacheTtlSeconds": 60}"#).unwrap();

        let cfg = EngineConfig::from_file(&path).unwrap();
        assert_eq!(cfg.worker_ceiling, 8);
        assert_eq!(cfg.cache_ttl_seconds, 60);
        assert_eq!(cfg.per_origin_default_delay_ms, 500);
    }

    #[test]
    fn test_validate_clamps_zero() {
        let cfg = EngineConfig {
            worker_ceiling: 0,
            cache_max_entries: 0,
            ..EngineConfig::default()
        }
        .validate();
        assert_eq!(cfg.worker_ceiling, 1);
        assert_eq!(cfg.cache_max_entries, 1);
    }

    #[test]
    fn test_requires_render_matches_subdomains() {
        let cfg = EngineConfig::default();
        assert!(cfg.requires_render("x.com"));
        assert!(cfg.requires_render("www.youtube.com"));
        assert!(cfg.requires_render("old.reddit.com"));
        assert!(!cfg.requires_render("example.com"));
        assert!(!cfg.requires_render("notreddit.com"));
    }
}
