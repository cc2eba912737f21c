//! Metrics & maintenance (C7, §4.7)
//!
//! Owns nothing the other components don't already own — it aggregates their
//! point-in-time counters into one snapshot, and runs the periodic
//! maintenance work (expiry sweep, breaker health probe) that doesn't belong
//! to any single request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::cache::ResilientCache;
use crate::circuit::CircuitMetrics;
use crate::pipeline::CacheStatus;
use crate::tools::pool::SqlPool;
use crate::tools::{ToolInvocationMetrics, ToolRegistry};

const LATENCY_RESERVOIR_SIZE: usize = 512;

/// Reservoir sampler (Algorithm R), bounded at `LATENCY_RESERVOIR_SIZE`
/// samples regardless of how many latencies have actually been observed.
struct LatencyReservoir {
    samples: Vec<u64>,
    seen: u64,
}

impl LatencyReservoir {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(LATENCY_RESERVOIR_SIZE),
            seen: 0,
        }
    }

    fn record(&mut self, value_ms: u64) {
        self.seen += 1;
        if self.samples.len() < LATENCY_RESERVOIR_SIZE {
            self.samples.push(value_ms);
            return;
        }
        let j = rand::thread_rng().gen_range(0..self.seen);
        if (j as usize) < LATENCY_RESERVOIR_SIZE {
            self.samples[j as usize] = value_ms;
        }
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }

    fn p95(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStatusCounts {
    pub hit: u64,
    pub miss: u64,
    pub skipped_degraded: u64,
}

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub queries_processed: u64,
    pub cache_status_counts: CacheStatusCounts,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: u64,
}

struct Inner {
    queries_processed: u64,
    cache_status_counts: CacheStatusCounts,
    latencies: LatencyReservoir,
}

/// C6's side of C7: the pipeline reports every completed query here.
pub struct Metrics {
    inner: Mutex<Inner>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queries_processed: 0,
                cache_status_counts: CacheStatusCounts::default(),
                latencies: LatencyReservoir::new(),
            }),
        }
    }

    pub fn record_query(&self, cache_status: CacheStatus, latency_ms: u64) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.queries_processed += 1;
        match cache_status {
            CacheStatus::Hit => inner.cache_status_counts.hit += 1,
            CacheStatus::Miss => inner.cache_status_counts.miss += 1,
            CacheStatus::SkippedDegraded => inner.cache_status_counts.skipped_degraded += 1,
        }
        inner.latencies.record(latency_ms);
    }

    pub fn snapshot(&self) -> PipelineMetrics {
        let inner = self.inner.lock().expect("metrics mutex poisoned");
        PipelineMetrics {
            queries_processed: inner.queries_processed,
            cache_status_counts: inner.cache_status_counts.clone(),
            mean_latency_ms: inner.latencies.mean(),
            p95_latency_ms: inner.latencies.p95(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Full aggregated snapshot across C1 (via C3), C2, C4, C5, and C6.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub cache: crate::cache::CacheMetrics,
    pub circuit: CircuitMetrics,
    pub tools: HashMap<String, ToolInvocationMetrics>,
    pub pool: PoolMetrics,
    pub pipeline: PipelineSnapshotFields,
}

#[derive(Debug, Clone)]
pub struct PipelineSnapshotFields {
    pub queries_processed: u64,
    pub cache_status_counts: CacheStatusCounts,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: u64,
}

/// Build the aggregated metrics snapshot: a point read across every
/// component's owned counters.
pub fn snapshot(
    metrics: &Metrics,
    cache: &ResilientCache,
    tools: &ToolRegistry,
    pool: &SqlPool,
) -> MetricsSnapshot {
    let facade_metrics = cache.metrics();
    let (connections, idle_connections) = pool.state();
    let pipeline = metrics.snapshot();

    MetricsSnapshot {
        cache: facade_metrics.cache,
        circuit: facade_metrics.circuit,
        tools: tools.invocation_metrics(),
        pool: PoolMetrics {
            connections,
            idle_connections,
        },
        pipeline: PipelineSnapshotFields {
            queries_processed: pipeline.queries_processed,
            cache_status_counts: pipeline.cache_status_counts,
            mean_latency_ms: pipeline.mean_latency_ms,
            p95_latency_ms: pipeline.p95_latency_ms,
        },
    }
}

/// Background maintenance loop (§4.7): expiry sweep every `sweep_interval`,
/// plus an optional breaker health probe at half that interval. Runs until
/// `shutdown` fires.
pub async fn run_maintenance(
    cache: std::sync::Arc<ResilientCache>,
    sweep_interval: Duration,
    breaker_probe_enabled: bool,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut sweep_ticker = tokio::time::interval(sweep_interval);
    let probe_interval = sweep_interval
        .checked_div(2)
        .unwrap_or(sweep_interval)
        .max(Duration::from_millis(1));
    let mut probe_ticker = tokio::time::interval(probe_interval);

    loop {
        tokio::select! {
            _ = sweep_ticker.tick() => {
                let removed = cache.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "expiry sweep removed entries");
                }
            }
            _ = probe_ticker.tick(), if breaker_probe_enabled => {
                cache.health_probe();
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("maintenance loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reports_cache_status_distribution() {
        let metrics = Metrics::new();
        metrics.record_query(CacheStatus::Hit, 10);
        metrics.record_query(CacheStatus::Miss, 20);
        metrics.record_query(CacheStatus::Miss, 30);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_processed, 3);
        assert_eq!(snapshot.cache_status_counts.hit, 1);
        assert_eq!(snapshot.cache_status_counts.miss, 2);
        assert_eq!(snapshot.mean_latency_ms, 20.0);
    }

    #[test]
    fn reservoir_caps_sample_count_but_not_seen_count() {
        let mut reservoir = LatencyReservoir::new();
        for i in 0..(LATENCY_RESERVOIR_SIZE * 3) {
            reservoir.record(i as u64);
        }
        assert_eq!(reservoir.samples.len(), LATENCY_RESERVOIR_SIZE);
        assert_eq!(reservoir.seen, (LATENCY_RESERVOIR_SIZE * 3) as u64);
    }

    #[test]
    fn p95_of_uniform_samples_is_near_the_top() {
        let mut reservoir = LatencyReservoir::new();
        for i in 1..=100u64 {
            reservoir.record(i);
        }
        assert!(reservoir.p95() >= 94 && reservoir.p95() <= 100);
    }
}
