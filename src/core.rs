//! The `Core` value (§9 re-architecture mapping): owns C1-C7, constructed
//! once at startup and passed explicitly to request handlers. No global
//! singletons; background tasks own their own state via cloned `Arc`s.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, ResilientCache};
use crate::circuit::CircuitBreaker;
use crate::config::Config;
use crate::error::{ErrorKind, FactError};
use crate::metrics::{self, Metrics, MetricsSnapshot};
use crate::pipeline::llm::{HttpLlmClient, LlmClient};
use crate::pipeline::{QueryOutcome, QueryPipeline};
use crate::tools::pool::SqlPool;
use crate::tools::sql::{SqlGetSampleQueriesTool, SqlGetSchemaTool, SqlQueryReadonlyTool};
use crate::tools::ToolRegistry;

/// Curated example queries returned by `SQL.GetSampleQueries`. Static and
/// illustrative only; never executed by the core itself.
const SAMPLE_QUERIES: &[&str] = &[
    "SELECT name FROM sqlite_master WHERE type = 'table'",
    "SELECT * FROM companies LIMIT 10",
];

/// The fully wired runtime: C1-C7 plus the background maintenance task's
/// shutdown handle.
pub struct Core {
    cache: Arc<ResilientCache>,
    tools: Arc<ToolRegistry>,
    pool: Arc<SqlPool>,
    metrics: Arc<Metrics>,
    pipeline: QueryPipeline,
    drain_timeout: Duration,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    maintenance_handle: tokio::task::JoinHandle<()>,
    in_flight: Arc<tokio::sync::Semaphore>,
}

impl Core {
    /// Wire up every component from a loaded `Config` and spawn the
    /// background maintenance task. Discovers `known_tables` by introspecting
    /// `sqlite_master` rather than hardcoding a table list.
    pub async fn bootstrap(config: Config) -> Result<Self, FactError> {
        let cache = Arc::new(ResilientCache::new(
            CacheStore::new(config.cache.clone()),
            CircuitBreaker::new(config.circuit.clone()),
        ));

        let pool = Arc::new(SqlPool::open(&config.sql)?);
        let known_tables = discover_known_tables(Arc::clone(&pool)).await?;

        let tools = Arc::new(ToolRegistry::new(config.tools.clone()));
        tools.register(
            Box::new(SqlQueryReadonlyTool::new(
                Arc::clone(&pool),
                config.sql.clone(),
                known_tables.clone(),
            )),
            1,
        );
        tools.register(Box::new(SqlGetSchemaTool::new(Arc::clone(&pool), known_tables)), 1);
        tools.register(
            Box::new(SqlGetSampleQueriesTool::new(
                SAMPLE_QUERIES.iter().map(|s| s.to_string()).collect(),
            )),
            1,
        );

        let llm: Arc<dyn LlmClient> =
            Arc::new(HttpLlmClient::new(config.llm_api_url.clone(), config.llm_model.clone()));

        let metrics = Arc::new(Metrics::new());
        let pipeline = QueryPipeline::new(
            Arc::clone(&cache),
            Arc::clone(&tools),
            llm,
            config.pipeline.clone(),
            config.system_prompt.clone(),
            Arc::clone(&metrics),
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let maintenance_handle = tokio::spawn(metrics::run_maintenance(
            Arc::clone(&cache),
            Duration::from_secs(config.sweep_interval_seconds),
            config.breaker_probe_enabled,
            shutdown_rx,
        ));

        Ok(Self {
            cache,
            tools,
            pool,
            metrics,
            pipeline,
            drain_timeout: Duration::from_secs(config.drain_timeout_seconds),
            shutdown_tx,
            maintenance_handle,
            in_flight: Arc::new(tokio::sync::Semaphore::new(usize::MAX >> 3)),
        })
    }

    /// The sole entry point for answering a query. Tracks in-flight requests
    /// so `shutdown` can drain them.
    pub async fn answer(&self, user_id: &str, query: &str) -> Result<QueryOutcome, FactError> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .expect("in-flight semaphore never closed during normal operation");
        self.pipeline.run_query(user_id, query).await
    }

    /// Aggregated counters across every component (§4.7).
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        metrics::snapshot(&self.metrics, &self.cache, &self.tools, &self.pool)
    }

    /// Shutdown contract (§4.7): cancel background tasks, drain in-flight
    /// requests up to `drain_timeout_seconds`, close the SQL pool.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        let drain = async {
            // Acquiring every permit blocks until all in-flight `answer` calls
            // have released theirs.
            let _ = self.in_flight.acquire_many(self.in_flight.available_permits() as u32).await;
        };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            tracing::warn!("shutdown drain timeout elapsed with requests still in flight");
        }

        self.maintenance_handle.abort();
        self.pool.close_all();
    }
}

async fn discover_known_tables(pool: Arc<SqlPool>) -> Result<Vec<String>, FactError> {
    tokio::task::spawn_blocking(move || {
        let conn = pool.acquire()?;
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
            .map_err(|e| FactError::new(ErrorKind::Config, format!("failed to introspect schema: {e}")))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| FactError::new(ErrorKind::Config, format!("failed to introspect schema: {e}")))?
            .filter_map(Result::ok)
            .collect();
        Ok(names)
    })
    .await
    .map_err(|e| FactError::new(ErrorKind::Config, format!("schema discovery task panicked: {e}")))?
}
