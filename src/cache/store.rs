//! Cache store (C1)
//!
//! A single mutex-guarded map of fingerprint -> entry. All operations are
//! atomic; readers are cheap so a plain mutex is preferred over a
//! reader/writer lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::fingerprint::fingerprint as compute_fingerprint;
use super::tokens::default_token_estimator;
use crate::config::CacheConfig;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub prefix_tag: String,
    pub content: String,
    pub token_count: usize,
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub access_count: u64,
}

impl CacheEntry {
    fn byte_len(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Outcome of a `store` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    RejectedTooSmall,
}

/// Outcome of a `get` call.
#[derive(Debug, Clone)]
pub enum GetOutcome {
    Hit(CacheEntry),
    Miss,
}

/// A fault internal to the store (lock poisoning from a panicked holder).
/// C3 records these as breaker failures; C1 itself never returns this for
/// ordinary admission/lookup outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOpError;

/// Point-in-time counters for the cache store.
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub rejected_too_small: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub entry_count: u64,
    pub total_bytes: u64,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    metrics: CacheMetrics,
}

/// C1: the cache store itself. Owns all entries and metrics; C2/C3 call in,
/// nothing calls out.
pub struct CacheStore {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                total_bytes: 0,
                metrics: CacheMetrics::default(),
            }),
        }
    }

    /// Deterministic fingerprint over this store's configured prefix tag.
    pub fn fingerprint(&self, query: &str) -> String {
        compute_fingerprint(&self.config.prefix_tag, query)
    }

    /// Admission + insertion, gated by minimum token count and fill ratio.
    pub fn store(&self, fingerprint: &str, content: &str) -> Result<StoreOutcome, CacheOpError> {
        let token_count = default_token_estimator(content);
        let mut inner = self.inner.lock().map_err(|_| CacheOpError)?;

        if token_count < self.config.min_tokens as usize {
            inner.metrics.rejected_too_small += 1;
            return Ok(StoreOutcome::RejectedTooSmall);
        }

        let now = now_secs();
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            prefix_tag: self.config.prefix_tag.clone(),
            content: content.to_string(),
            token_count,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        };

        if let Some(old) = inner.entries.remove(fingerprint) {
            inner.total_bytes -= old.byte_len();
        }
        inner.total_bytes += entry.byte_len();
        inner.entries.insert(fingerprint.to_string(), entry);

        if inner.total_bytes > self.config.max_bytes {
            let target = (self.config.max_bytes as f64 * self.config.target_fill_ratio) as u64;
            evict_lru_until(&mut inner, target);
        }

        inner.metrics.entry_count = inner.entries.len() as u64;
        inner.metrics.total_bytes = inner.total_bytes;
        Ok(StoreOutcome::Stored)
    }

    /// Lookup with TTL-based expiry.
    pub fn get(&self, fingerprint: &str) -> Result<GetOutcome, CacheOpError> {
        let mut inner = self.inner.lock().map_err(|_| CacheOpError)?;
        let now = now_secs();

        let expired = match inner.entries.get(fingerprint) {
            Some(entry) => now.saturating_sub(entry.created_at) > self.config.ttl_seconds,
            None => {
                inner.metrics.misses += 1;
                return Ok(GetOutcome::Miss);
            }
        };

        if expired {
            if let Some(entry) = inner.entries.remove(fingerprint) {
                inner.total_bytes -= entry.byte_len();
            }
            inner.metrics.expirations += 1;
            inner.metrics.misses += 1;
            inner.metrics.entry_count = inner.entries.len() as u64;
            inner.metrics.total_bytes = inner.total_bytes;
            return Ok(GetOutcome::Miss);
        }

        let entry = inner
            .entries
            .get_mut(fingerprint)
            .expect("entry presence checked above");
        entry.last_accessed_at = now;
        entry.access_count += 1;
        inner.metrics.hits += 1;
        Ok(GetOutcome::Hit(inner.entries.get(fingerprint).unwrap().clone()))
    }

    /// Remove every entry whose prefix tag matches; return the count removed.
    pub fn invalidate(&self, prefix_tag: &str) -> Result<u64, CacheOpError> {
        let mut inner = self.inner.lock().map_err(|_| CacheOpError)?;
        let to_remove: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.prefix_tag == prefix_tag)
            .map(|(fp, _)| fp.clone())
            .collect();

        let mut removed = 0u64;
        for fp in to_remove {
            if let Some(entry) = inner.entries.remove(&fp) {
                inner.total_bytes -= entry.byte_len();
                removed += 1;
            }
        }
        inner.metrics.entry_count = inner.entries.len() as u64;
        inner.metrics.total_bytes = inner.total_bytes;
        Ok(removed)
    }

    /// Remove all entries past their TTL; return the count removed.
    pub fn sweep_expired(&self) -> u64 {
        let mut inner = self.inner.lock().expect("cache store mutex poisoned");
        let now = now_secs();
        let ttl = self.config.ttl_seconds;

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.created_at) > ttl)
            .map(|(fp, _)| fp.clone())
            .collect();

        let mut removed = 0u64;
        for fp in expired {
            if let Some(entry) = inner.entries.remove(&fp) {
                inner.total_bytes -= entry.byte_len();
                removed += 1;
            }
        }
        inner.metrics.expirations += removed;
        inner.metrics.entry_count = inner.entries.len() as u64;
        inner.metrics.total_bytes = inner.total_bytes;
        removed
    }

    pub fn snapshot_metrics(&self) -> CacheMetrics {
        let inner = self.inner.lock().expect("cache store mutex poisoned");
        inner.metrics.clone()
    }
}

/// Evict least-recently-used entries until `total_bytes <= target`.
fn evict_lru_until(inner: &mut Inner, target: u64) {
    while inner.total_bytes > target {
        let Some(victim_fp) = inner
            .entries
            .values()
            .min_by_key(|e| e.last_accessed_at)
            .map(|e| e.fingerprint.clone())
        else {
            break;
        };
        if let Some(entry) = inner.entries.remove(&victim_fp) {
            inner.total_bytes -= entry.byte_len();
            inner.metrics.evictions += 1;
        }
    }
}
