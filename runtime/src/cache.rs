// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Response cache keyed by request fingerprint.
//!
//! ## Storage
//!
//! The index lives in a concurrent map. Payloads are held in memory, or, when
//! a cache directory is configured, written to one file per entry and read
//! back on hit. A persisted file is a JSON header line followed by the raw
//! payload; a file that fails to decode is evicted and reported as a miss.
//!
//! ## Expiry and eviction
//!
//! An entry is never served past its expiry: reads check it and drop expired
//! entries on the spot. [`ResponseCache::sweep`] removes the rest and, once
//! the entry cap is exceeded, evicts in insertion order.

use crate::error::AcquireError;
use crate::types::{AcquisitionMode, Acquired, Fingerprint};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ENTRY_EXTENSION: &str = "entry";

/// A cached acquisition. Immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub url: String,
    pub final_url: String,
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub mode: AcquisitionMode,
    pub captures: Vec<Vec<u8>>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build an entry from a successful acquisition, expiring after `ttl`.
    pub fn from_acquired(acquired: &Acquired, ttl: Duration) -> Self {
        let stored_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            url: acquired.url.clone(),
            final_url: acquired.final_url.clone(),
            payload: acquired.payload.clone(),
            content_type: acquired.content_type.clone(),
            mode: acquired.mode,
            captures: acquired.captures.clone(),
            stored_at,
            expires_at: stored_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Rehydrate as an acquisition result served from cache.
    pub fn to_acquired(&self) -> Acquired {
        Acquired {
            url: self.url.clone(),
            final_url: self.final_url.clone(),
            byte_size: self.payload.len(),
            payload: self.payload.clone(),
            content_type: self.content_type.clone(),
            mode: self.mode,
            elapsed_ms: 0,
            from_cache: true,
            captures: self.captures.clone(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Header line of a persisted entry.
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    fingerprint: String,
    url: String,
    final_url: String,
    content_type: Option<String>,
    mode: AcquisitionMode,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    byte_size: usize,
    #[serde(default)]
    captures: Vec<String>,
}

enum Stored {
    Memory(Arc<CacheEntry>),
    Disk(PathBuf),
}

/// Index slot: metadata needed for expiry, eviction and invalidation
/// without touching the payload.
struct Slot {
    seq: u64,
    url: String,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    stored: Stored,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    /// Hits over lookups, 0.0 before the first lookup.
    pub hit_rate: f64,
    /// Age of the oldest live entry in seconds.
    pub oldest_entry_age_secs: Option<f64>,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub corruptions: u64,
    pub max_entries: usize,
}

/// Concurrent response cache.
pub struct ResponseCache {
    index: DashMap<Fingerprint, Slot>,
    /// Insertion log for cap eviction. May hold stale pairs for entries that
    /// were replaced or removed; those are skipped when popped.
    order: Mutex<VecDeque<(u64, Fingerprint)>>,
    next_seq: AtomicU64,
    ttl: Duration,
    max_entries: usize,
    dir: Option<PathBuf>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    corruptions: AtomicU64,
}

impl ResponseCache {
    /// In-memory cache.
    pub fn in_memory(ttl: Duration, max_entries: usize) -> Self {
        Self {
            index: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            ttl,
            max_entries: max_entries.max(1),
            dir: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            corruptions: AtomicU64::new(0),
        }
    }

    /// Cache persisted under `dir`.
    ///
    /// On creation, scans the directory for entry files and rebuilds the
    /// index so previously cached payloads are available immediately.
    /// Unreadable headers and expired files are deleted.
    pub fn persistent(dir: PathBuf, ttl: Duration, max_entries: usize) -> anyhow::Result<Self> {
        use anyhow::Context;
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache dir: {}", dir.display()))?;

        let mut cache = Self::in_memory(ttl, max_entries);
        let now = Utc::now();
        let mut loaded: Vec<(DateTime<Utc>, Fingerprint, Slot)> = Vec::new();

        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                    continue;
                }
                match read_header(&path) {
                    Ok(header) if now < header.expires_at => {
                        let Some(fp) = Fingerprint::from_stored(&header.fingerprint) else {
                            let _ = fs::remove_file(&path);
                            continue;
                        };
                        loaded.push((
                            header.stored_at,
                            fp,
                            Slot {
                                seq: 0,
                                url: header.url,
                                stored_at: header.stored_at,
                                expires_at: header.expires_at,
                                stored: Stored::Disk(path),
                            },
                        ));
                    }
                    Ok(_) => {
                        let _ = fs::remove_file(&path);
                    }
                    Err(e) => {
                        tracing::warn!("dropping unreadable cache file {}: {e}", path.display());
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }

        // Oldest first so insertion order survives the restart.
        loaded.sort_by_key(|(stored_at, _, _)| *stored_at);
        for (_, fp, mut slot) in loaded {
            slot.seq = cache.next_seq.fetch_add(1, Ordering::Relaxed);
            cache.push_order(slot.seq, fp.clone());
            cache.index.insert(fp, slot);
        }

        tracing::debug!(
            "response cache initialized: {} entries from {}",
            cache.index.len(),
            dir.display()
        );
        cache.dir = Some(dir);
        cache.enforce_cap();
        Ok(cache)
    }

    /// Configured time to live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.get_at(fingerprint, Utc::now())
    }

    /// Look up a live entry as of `now`.
    pub fn get_at(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Option<CacheEntry> {
        let (seq, loaded) = {
            let Some(slot) = self.index.get(fingerprint) else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            };
            let loaded = if now >= slot.expires_at {
                None
            } else {
                Some(match &slot.stored {
                    Stored::Memory(entry) => Ok(CacheEntry::clone(entry)),
                    Stored::Disk(path) => read_entry(path),
                })
            };
            (slot.seq, loaded)
        };

        match loaded {
            Some(Ok(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("cache hit for {}", entry.url);
                Some(entry)
            }
            Some(Err(e)) => {
                tracing::warn!("evicting corrupted cache entry {fingerprint}: {e}");
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                self.remove_if_current(fingerprint, seq);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                // Expired: lazy eviction, unless a put replaced it meanwhile.
                if self.remove_if_current(fingerprint, seq) {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an entry. Replaces any previous entry for the fingerprint; a
    /// stored entry itself is never modified.
    pub fn put(&self, fingerprint: Fingerprint, entry: CacheEntry) {
        let stored = match &self.dir {
            Some(dir) => {
                let path = dir.join(format!("{fingerprint}.{ENTRY_EXTENSION}"));
                match write_entry(&path, &fingerprint, &entry) {
                    Ok(()) => Stored::Disk(path),
                    Err(e) => {
                        tracing::warn!("failed to persist cache entry {}: {e}; keeping it in memory", path.display());
                        Stored::Memory(Arc::new(entry.clone()))
                    }
                }
            }
            None => Stored::Memory(Arc::new(entry.clone())),
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.push_order(seq, fingerprint.clone());
        self.index.insert(
            fingerprint,
            Slot {
                seq,
                url: entry.url,
                stored_at: entry.stored_at,
                expires_at: entry.expires_at,
                stored,
            },
        );
        self.enforce_cap();
    }

    /// Cache a successful acquisition with the configured TTL.
    pub fn put_acquired(&self, fingerprint: Fingerprint, acquired: &Acquired) {
        self.put(fingerprint, CacheEntry::from_acquired(acquired, self.ttl));
    }

    /// Remove entries whose URL matches `pattern`, or everything when
    /// `pattern` is `None`. `*` matches any run of characters; a pattern
    /// without `*` matches as a URL prefix. Returns the number removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let Some(pattern) = pattern.filter(|p| !p.trim().is_empty()) else {
            let keys = self.live_keys(|_| true);
            let removed = keys.iter().filter(|(fp, seq)| self.remove_if_current(fp, *seq)).count();
            tracing::info!("response cache cleared ({removed} entries)");
            return removed;
        };

        let Some(matcher) = url_pattern(pattern.trim()) else {
            tracing::warn!("unusable invalidation pattern {pattern}");
            return 0;
        };
        let keys = self.live_keys(|slot| matcher.is_match(&slot.url));
        let removed = keys.iter().filter(|(fp, seq)| self.remove_if_current(fp, *seq)).count();
        tracing::info!("invalidated {removed} cache entries matching {pattern}");
        removed
    }

    /// Drop expired entries and enforce the entry cap. Returns the number of
    /// entries removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let expired = self.live_keys(|slot| now >= slot.expires_at);
        let mut removed = expired
            .iter()
            .filter(|(fp, seq)| self.remove_if_current(fp, *seq))
            .count();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed += self.enforce_cap();
        if removed > 0 {
            tracing::debug!("cache sweep removed {removed} entries");
        }
        removed
    }

    /// Number of entries in the index, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let oldest = self
            .index
            .iter()
            .filter(|e| now < e.value().expires_at)
            .map(|e| e.value().stored_at)
            .min();

        CacheStats {
            entry_count: self.index.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            oldest_entry_age_secs: oldest
                .map(|t| (now - t).to_std().unwrap_or_default().as_secs_f64()),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            corruptions: self.corruptions.load(Ordering::Relaxed),
            max_entries: self.max_entries,
        }
    }

    /// Cache directory, when persistent.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Keys and sequence numbers of the slots matching `filter`.
    fn live_keys(&self, filter: impl Fn(&Slot) -> bool) -> Vec<(Fingerprint, u64)> {
        self.index
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| (e.key().clone(), e.value().seq))
            .collect()
    }

    /// Remove the entry only if it is still the one stored as `seq`. A put
    /// that raced in after the caller looked stays cached.
    fn remove_if_current(&self, fingerprint: &Fingerprint, seq: u64) -> bool {
        match self.index.remove_if(fingerprint, |_, slot| slot.seq == seq) {
            Some((_, slot)) => {
                if let Stored::Disk(path) = &slot.stored {
                    let _ = fs::remove_file(path);
                }
                true
            }
            None => false,
        }
    }

    /// Evict in insertion order until within the cap.
    fn enforce_cap(&self) -> usize {
        let mut evicted = 0;
        while self.index.len() > self.max_entries {
            let Some((seq, fp)) = self.lock_order().pop_front() else {
                break;
            };
            if self.remove_if_current(&fp, seq) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::info!("evicted {evicted} oldest cache entries (cap {})", self.max_entries);
        }
        evicted
    }

    fn push_order(&self, seq: u64, fp: Fingerprint) {
        let mut order = self.lock_order();
        order.push_back((seq, fp));
        // Drop stale pairs once the log grows well past the live set.
        if order.len() > self.max_entries.saturating_mul(2) + 64 {
            order.retain(|(s, f)| self.index.get(f).map_or(false, |slot| slot.seq == *s) || *s == seq);
        }
    }

    fn lock_order(&self) -> std::sync::MutexGuard<'_, VecDeque<(u64, Fingerprint)>> {
        self.order.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Compile an invalidation pattern into an anchored regex.
fn url_pattern(pattern: &str) -> Option<regex::Regex> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let body = escaped.join(".*");
    let anchored = if pattern.contains('*') {
        format!("^{body}$")
    } else {
        format!("^{body}")
    };
    regex::Regex::new(&anchored).ok()
}

fn write_entry(path: &Path, fingerprint: &Fingerprint, entry: &CacheEntry) -> std::io::Result<()> {
    use base64::Engine as _;
    let header = EntryHeader {
        fingerprint: fingerprint.to_string(),
        url: entry.url.clone(),
        final_url: entry.final_url.clone(),
        content_type: entry.content_type.clone(),
        mode: entry.mode,
        stored_at: entry.stored_at,
        expires_at: entry.expires_at,
        byte_size: entry.payload.len(),
        captures: entry
            .captures
            .iter()
            .map(|c| base64::engine::general_purpose::STANDARD.encode(c))
            .collect(),
    };
    let mut buf = serde_json::to_vec(&header)?;
    buf.push(b'\n');
    buf.extend_from_slice(&entry.payload);

    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&buf)?;
    }
    fs::rename(&tmp, path)
}

fn read_header(path: &Path) -> Result<EntryHeader, AcquireError> {
    let file = fs::File::open(path).map_err(corruption)?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    reader.read_line(&mut line).map_err(corruption)?;
    serde_json::from_str(line.trim_end()).map_err(corruption)
}

fn read_entry(path: &Path) -> Result<CacheEntry, AcquireError> {
    use base64::Engine as _;
    let file = fs::File::open(path).map_err(corruption)?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    reader.read_line(&mut line).map_err(corruption)?;
    let header: EntryHeader = serde_json::from_str(line.trim_end()).map_err(corruption)?;

    let mut payload = Vec::with_capacity(header.byte_size);
    reader.read_to_end(&mut payload).map_err(corruption)?;
    if payload.len() != header.byte_size {
        return Err(AcquireError::CacheCorruption {
            message: format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                header.byte_size
            ),
        });
    }

    let captures = header
        .captures
        .iter()
        .map(|c| base64::engine::general_purpose::STANDARD.decode(c.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(corruption)?;

    Ok(CacheEntry {
        url: header.url,
        final_url: header.final_url,
        payload,
        content_type: header.content_type,
        mode: header.mode,
        captures,
        stored_at: header.stored_at,
        expires_at: header.expires_at,
    })
}

fn corruption(e: impl std::fmt::Display) -> AcquireError {
    AcquireError::CacheCorruption {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AcquisitionRequest;

    fn fp(url: &str) -> Fingerprint {
        AcquisitionRequest::new(url).unwrap().fingerprint()
    }

    fn entry(url: &str, body: &str, stored_at: DateTime<Utc>, ttl_secs: i64) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            final_url: url.to_string(),
            payload: body.as_bytes().to_vec(),
            content_type: Some("text/html".to_string()),
            mode: AcquisitionMode::Fetch,
            captures: Vec::new(),
            stored_at,
            expires_at: stored_at + chrono::Duration::seconds(ttl_secs),
        }
    }

    #[test]
    fn test_cache_roundtrip() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 10);
        let key = fp("https://a.test/");
        cache.put(key.clone(), entry("https://a.test/", "hello", Utc::now(), 3600));

        let got = cache.get(&key).unwrap();
        assert_eq!(got.payload, b"hello");
        assert!(got.to_acquired().from_cache);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_never_serves_expired_entry() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 10);
        let key = fp("https://a.test/");
        let t0 = Utc::now();
        cache.put(key.clone(), entry("https://a.test/", "x", t0, 10));

        assert!(cache.get_at(&key, t0 + chrono::Duration::seconds(9)).is_some());
        assert!(cache.get_at(&key, t0 + chrono::Duration::seconds(11)).is_none());
        // Lazily evicted on that read.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entry_lingers_until_read_or_sweep() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 10);
        let t0 = Utc::now();
        cache.put(fp("https://a.test/1"), entry("https://a.test/1", "x", t0, 10));
        cache.put(fp("https://a.test/2"), entry("https://a.test/2", "y", t0, 100));
        assert_eq!(cache.len(), 2);

        let removed = cache.sweep_at(t0 + chrono::Duration::seconds(11));
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cap_evicts_in_insertion_order() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 3);
        let now = Utc::now();
        for i in 0..3 {
            let url = format!("https://a.test/{i}");
            cache.put(fp(&url), entry(&url, "x", now, 3600));
        }
        // Reads do not refresh position.
        assert!(cache.get(&fp("https://a.test/0")).is_some());

        cache.put(fp("https://a.test/3"), entry("https://a.test/3", "x", now, 3600));
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&fp("https://a.test/0")).is_none());
        assert!(cache.get(&fp("https://a.test/1")).is_some());
        assert!(cache.get(&fp("https://a.test/3")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacement_is_a_new_insert() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 2);
        let now = Utc::now();
        let a = fp("https://a.test/a");
        let b = fp("https://a.test/b");
        cache.put(a.clone(), entry("https://a.test/a", "v1", now, 3600));
        cache.put(b.clone(), entry("https://a.test/b", "x", now, 3600));
        cache.put(a.clone(), entry("https://a.test/a", "v2", now, 3600));

        // `b` is now the oldest insertion.
        cache.put(fp("https://a.test/c"), entry("https://a.test/c", "x", now, 3600));
        assert!(cache.get(&b).is_none());
        assert_eq!(cache.get(&a).unwrap().payload, b"v2");
    }

    #[test]
    fn test_removal_spares_entry_replaced_after_lookup() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 10);
        let key = fp("https://a.test/");
        let t0 = Utc::now();
        cache.put(key.clone(), entry("https://a.test/", "old", t0, 10));
        let stale = cache.live_keys(|_| true);

        // A fresh put lands between the expiry check and the removal.
        cache.put(key.clone(), entry("https://a.test/", "new", t0, 3600));
        let (_, old_seq) = &stale[0];
        assert!(!cache.remove_if_current(&key, *old_seq));
        assert_eq!(cache.get(&key).unwrap().payload, b"new");
    }

    #[test]
    fn test_clear_keeps_eviction_order_for_later_puts() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 2);
        let now = Utc::now();
        cache.put(fp("https://a.test/0"), entry("https://a.test/0", "x", now, 3600));
        assert_eq!(cache.invalidate(None), 1);

        for i in 1..4 {
            let url = format!("https://a.test/{i}");
            cache.put(fp(&url), entry(&url, "x", now, 3600));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&fp("https://a.test/1")).is_none());
        assert!(cache.get(&fp("https://a.test/3")).is_some());
    }

    #[test]
    fn test_invalidate_pattern_and_all() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 10);
        let now = Utc::now();
        for url in [
            "https://a.test/docs/1",
            "https://a.test/docs/2",
            "https://a.test/blog/1",
            "https://b.test/docs/1",
        ] {
            cache.put(fp(url), entry(url, "x", now, 3600));
        }

        assert_eq!(cache.invalidate(Some("https://a.test/docs")), 2);
        assert_eq!(cache.invalidate(Some("*/docs/*")), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_hit_rate_and_age() {
        let cache = ResponseCache::in_memory(Duration::from_secs(3600), 10);
        let key = fp("https://a.test/");
        assert_eq!(cache.stats().hit_rate, 0.0);
        assert!(cache.stats().oldest_entry_age_secs.is_none());

        cache.put(
            key.clone(),
            entry("https://a.test/", "x", Utc::now() - chrono::Duration::seconds(30), 3600),
        );
        cache.get(&key);
        cache.get(&fp("https://a.test/missing"));

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert!(stats.oldest_entry_age_secs.unwrap() >= 30.0);
    }

    #[test]
    fn test_persistent_reload() {
        let dir = tempfile::tempdir().unwrap();
        let key = fp("https://a.test/");
        {
            let cache =
                ResponseCache::persistent(dir.path().to_path_buf(), Duration::from_secs(3600), 10)
                    .unwrap();
            let mut e = entry("https://a.test/", "persisted body", Utc::now(), 3600);
            e.captures = vec![vec![0x89, b'P', b'N', b'G']];
            cache.put(key.clone(), e);
        }

        let cache =
            ResponseCache::persistent(dir.path().to_path_buf(), Duration::from_secs(3600), 10)
                .unwrap();
        assert_eq!(cache.len(), 1);
        let got = cache.get(&key).unwrap();
        assert_eq!(got.payload, b"persisted body");
        assert_eq!(got.captures, vec![vec![0x89, b'P', b'N', b'G']]);
    }

    #[test]
    fn test_corrupted_file_is_evicted_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache =
            ResponseCache::persistent(dir.path().to_path_buf(), Duration::from_secs(3600), 10)
                .unwrap();
        let key = fp("https://a.test/");
        cache.put(key.clone(), entry("https://a.test/", "full body", Utc::now(), 3600));

        // Truncate the payload behind the cache's back.
        let path = dir.path().join(format!("{key}.entry"));
        let raw = fs::read(&path).unwrap();
        fs::write(&path, &raw[..raw.len() - 4]).unwrap();

        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
        assert!(!path.exists());
        assert_eq!(cache.stats().corruptions, 1);
    }

    #[test]
    fn test_unreadable_file_dropped_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("0123456789abcdef0123456789abcdef.entry");
        fs::write(&junk, b"not json\npayload").unwrap();

        let cache =
            ResponseCache::persistent(dir.path().to_path_buf(), Duration::from_secs(3600), 10)
                .unwrap();
        assert!(cache.is_empty());
        assert!(!junk.exists());
    }
}
