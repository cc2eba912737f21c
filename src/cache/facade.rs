//! Resilient cache facade (C3, §4.3)
//!
//! Wraps `CacheStore` (C1) behind `CircuitBreaker` (C2). A `Rejected(TooSmall)`
//! from the store is never counted as a breaker failure — it's a normal,
//! expected admission outcome, not a fault.

use crate::circuit::{Admission, CircuitBreaker, CircuitMetrics, FailureKind};

use super::store::{CacheEntry, CacheMetrics, CacheStore, GetOutcome, StoreOutcome};

#[derive(Debug, Clone)]
pub enum FacadeGet {
    Hit(CacheEntry),
    Miss,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacadeStore {
    Stored,
    RejectedTooSmall,
    Degraded,
}

#[derive(Debug, Clone)]
pub enum FacadeInvalidate {
    Count(u64),
    Degraded,
}

pub struct CacheFacadeMetrics {
    pub cache: CacheMetrics,
    pub circuit: CircuitMetrics,
}

/// C3: the only component the query pipeline talks to for caching.
pub struct ResilientCache {
    store: CacheStore,
    breaker: CircuitBreaker,
}

impl ResilientCache {
    pub fn new(store: CacheStore, breaker: CircuitBreaker) -> Self {
        Self { store, breaker }
    }

    /// Pure; never subject to the breaker.
    pub fn fingerprint(&self, query: &str) -> String {
        self.store.fingerprint(query)
    }

    pub fn get(&self, fingerprint: &str) -> FacadeGet {
        if self.breaker.admit() == Admission::FastFail {
            return FacadeGet::Degraded;
        }

        match self.store.get(fingerprint) {
            Ok(GetOutcome::Hit(entry)) => {
                self.breaker.on_success();
                FacadeGet::Hit(entry)
            }
            Ok(GetOutcome::Miss) => {
                self.breaker.on_success();
                FacadeGet::Miss
            }
            Err(_) => {
                self.breaker.on_failure(FailureKind::LookupError);
                FacadeGet::Degraded
            }
        }
    }

    pub fn store(&self, fingerprint: &str, content: &str) -> FacadeStore {
        if self.breaker.admit() == Admission::FastFail {
            return FacadeStore::Degraded;
        }

        match self.store.store(fingerprint, content) {
            Ok(StoreOutcome::Stored) => {
                self.breaker.on_success();
                FacadeStore::Stored
            }
            Ok(StoreOutcome::RejectedTooSmall) => {
                // Not a failure: admission rejection is expected behavior.
                FacadeStore::RejectedTooSmall
            }
            Err(_) => {
                self.breaker.on_failure(FailureKind::StoreError);
                FacadeStore::Degraded
            }
        }
    }

    pub fn invalidate(&self, prefix_tag: &str) -> FacadeInvalidate {
        if self.breaker.admit() == Admission::FastFail {
            return FacadeInvalidate::Degraded;
        }

        match self.store.invalidate(prefix_tag) {
            Ok(count) => {
                self.breaker.on_success();
                FacadeInvalidate::Count(count)
            }
            Err(_) => {
                self.breaker.on_failure(FailureKind::Other);
                FacadeInvalidate::Degraded
            }
        }
    }

    pub fn sweep_expired(&self) -> u64 {
        self.store.sweep_expired()
    }

    /// Background health probe (§4.2): exercises the breaker-gated path on a
    /// negligible lookup so an OPEN breaker is re-checked for recovery ahead
    /// of the next real request, without bypassing `open_timeout_seconds`.
    pub fn health_probe(&self) {
        let _ = self.get("__health_probe__");
    }

    pub fn metrics(&self) -> CacheFacadeMetrics {
        CacheFacadeMetrics {
            cache: self.store.snapshot_metrics(),
            circuit: self.breaker.metrics(),
        }
    }
}
