//! Configuration for the FACT core
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority, §6.5)
//! 2. Config file (`~/.config/fact/config.toml`)
//! 3. Built-in defaults (lowest priority)
//!
//! Unknown config-file keys are ignored (serde's default struct
//! deserialization drops fields it doesn't recognize). Invalid values fail
//! loudly: `Config::from_env` returns a `ConfigError` naming the offending
//! option rather than silently falling back to a default.

use serde::Deserialize;
use std::path::PathBuf;

mod cache;
mod circuit;
mod logging;
mod pipeline;
mod sql;
mod tools;

#[cfg(test)]
mod tests;

pub use cache::{parse_size, CacheConfig, FileCacheConfig};
pub use circuit::{CircuitConfig, FileCircuitConfig};
pub use logging::{FileLoggingConfig, LoggingConfig};
pub use pipeline::{FilePipelineConfig, PipelineConfig};
pub use sql::{FileSqlConfig, SqlConfig};
pub use tools::{FileToolsConfig, ToolsConfig};

use crate::error::FactError;

/// Version info.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application configuration: one sub-struct per component (cache, circuit
/// breaker, SQL pool, tool registry, pipeline, logging).
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub circuit: CircuitConfig,
    pub sql: SqlConfig,
    pub tools: ToolsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    /// Fixed system prompt sent with every LLM call (§6.1).
    pub system_prompt: String,
    /// Base URL of the LLM provider's Anthropic-compatible API.
    pub llm_api_url: String,
    /// Model identifier sent with every LLM call.
    pub llm_model: String,
    /// Interval between expiry sweeps, in seconds (§4.7).
    pub sweep_interval_seconds: u64,
    /// Whether the background circuit-breaker health probe is enabled (§4.2, §4.7).
    pub breaker_probe_enabled: bool,
    /// Drain timeout for in-flight requests on shutdown, in seconds (§4.7).
    pub drain_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            circuit: CircuitConfig::default(),
            sql: SqlConfig::default(),
            tools: ToolsConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
            system_prompt: "You are FACT, a careful analytics assistant. Use the SQL tool to answer questions about the data; never guess at numbers you have not queried.".to_string(),
            llm_api_url: "https://api.anthropic.com".to_string(),
            llm_model: "claude-opus-4-5-20251101".to_string(),
            sweep_interval_seconds: 300,
            breaker_probe_enabled: true,
            drain_timeout_seconds: 10,
        }
    }
}

/// Config file structure (subset of `Config` that makes sense to persist).
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    system_prompt: Option<String>,
    llm_api_url: Option<String>,
    llm_model: Option<String>,
    sweep_interval_seconds: Option<u64>,
    breaker_probe_enabled: Option<bool>,
    drain_timeout_seconds: Option<u64>,

    cache: Option<FileCacheConfig>,
    circuit: Option<FileCircuitConfig>,
    sql: Option<FileSqlConfig>,
    tools: Option<FileToolsConfig>,
    pipeline: Option<FilePipelineConfig>,
    logging: Option<FileLoggingConfig>,
}

impl Config {
    /// Path to the config file: `~/.config/fact/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("fact").join("config.toml"))
    }

    /// Load the file config if it exists; missing file is not an error.
    fn load_file_config() -> Result<FileConfig, FactError> {
        let Some(path) = Self::config_path() else {
            return Ok(FileConfig::default());
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                FactError::config(format!(
                    "failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(FactError::config(format!(
                "cannot read config file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Load configuration: env vars override file, file overrides defaults.
    ///
    /// # Errors
    /// Returns a `ConfigError`-kind `FactError` naming the offending option
    /// if the config file is malformed or an environment variable holds an
    /// unparsable value.
    pub fn from_env() -> Result<Self, FactError> {
        let file = Self::load_file_config()?;
        let defaults = Self::default();

        let system_prompt = std::env::var("FACT_SYSTEM_PROMPT")
            .ok()
            .or(file.system_prompt)
            .unwrap_or(defaults.system_prompt);

        let llm_api_url = std::env::var("FACT_LLM_API_URL")
            .ok()
            .or(file.llm_api_url)
            .unwrap_or(defaults.llm_api_url);

        let llm_model = std::env::var("FACT_LLM_MODEL")
            .ok()
            .or(file.llm_model)
            .unwrap_or(defaults.llm_model);

        let sweep_interval_seconds = env_or("FACT_SWEEP_INTERVAL_SECONDS")?
            .or(file.sweep_interval_seconds)
            .unwrap_or(defaults.sweep_interval_seconds);

        let breaker_probe_enabled = std::env::var("FACT_BREAKER_PROBE_ENABLED")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(file.breaker_probe_enabled)
            .unwrap_or(defaults.breaker_probe_enabled);

        let drain_timeout_seconds = env_or("FACT_DRAIN_TIMEOUT_SECONDS")?
            .or(file.drain_timeout_seconds)
            .unwrap_or(defaults.drain_timeout_seconds);

        // Merge component sub-configs: env vars win over file over defaults.
        // Each component owns its own validation in `from_file`.
        let mut cache_file = file.cache.unwrap_or_default();
        if let Some(v) = std::env::var("CACHE_PREFIX").ok() {
            cache_file.prefix_tag = Some(v);
        }
        if let Some(v) = env_or("CACHE_MIN_TOKENS")? {
            cache_file.min_tokens = Some(v);
        }
        if let Some(v) = std::env::var("CACHE_MAX_SIZE").ok() {
            cache_file.max_size = Some(v);
        }
        if let Some(v) = env_or("CACHE_TTL_SECONDS")? {
            cache_file.ttl_seconds = Some(v);
        }
        let cache = CacheConfig::from_file(Some(cache_file)).map_err(FactError::config)?;

        let mut circuit_file = file.circuit.unwrap_or_default();
        if let Some(v) = env_or("CIRCUIT_FAILURE_THRESHOLD")? {
            circuit_file.failure_threshold = Some(v);
        }
        if let Some(v) = env_or("CIRCUIT_SUCCESS_THRESHOLD")? {
            circuit_file.success_threshold = Some(v);
        }
        if let Some(v) = env_or("CIRCUIT_OPEN_TIMEOUT_SECONDS")? {
            circuit_file.open_timeout_seconds = Some(v);
        }
        if let Some(v) = env_or("CIRCUIT_RECOVERY_FACTOR")? {
            circuit_file.recovery_factor = Some(v);
        }
        let circuit = CircuitConfig::from_file(Some(circuit_file)).map_err(FactError::config)?;

        let mut sql_file = file.sql.unwrap_or_default();
        if let Some(v) = env_or("SQL_POOL_MAX_CONNECTIONS")? {
            sql_file.max_connections = Some(v);
        }
        if let Some(v) = env_or("SQL_QUERY_TIMEOUT_SECONDS")? {
            sql_file.query_timeout_seconds = Some(v);
        }
        if let Some(v) = env_or("SQL_MAX_ROWS")? {
            sql_file.max_rows = Some(v);
        }
        let sql = SqlConfig::from_file(Some(sql_file)).map_err(FactError::config)?;

        let mut tools_file = file.tools.unwrap_or_default();
        if let Some(v) = env_or("TOOL_RATE_LIMIT_PER_MINUTE")? {
            tools_file.global_rate_limit_per_minute = Some(v);
        }
        if let Some(v) = env_or("TOOL_EXECUTION_TIMEOUT_SECONDS")? {
            tools_file.execution_timeout_seconds = Some(v);
        }
        let tools = ToolsConfig::from_file(Some(tools_file));

        let mut pipeline_file = file.pipeline.unwrap_or_default();
        if let Some(v) = env_or("PIPELINE_MAX_TOOL_ITERATIONS")? {
            pipeline_file.max_tool_iterations = Some(v);
        }
        if let Some(v) = env_or("PIPELINE_REQUEST_TIMEOUT_SECONDS")? {
            pipeline_file.request_timeout_seconds = Some(v);
        }
        if let Some(v) = env_or("LLM_MAX_RETRIES")? {
            pipeline_file.max_retries = Some(v);
        }
        let pipeline = PipelineConfig::from_file(Some(pipeline_file));

        let logging = LoggingConfig::from_file(file.logging);

        Ok(Self {
            cache,
            circuit,
            sql,
            tools,
            pipeline,
            logging,
            system_prompt,
            llm_api_url,
            llm_model,
            sweep_interval_seconds,
            breaker_probe_enabled,
            drain_timeout_seconds,
        })
    }

    /// Create the config file template if it doesn't exist yet, so users can
    /// discover options by inspecting `~/.config/fact/config.toml`.
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };
        if path.exists() {
            return;
        }
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let _ = std::fs::write(
            &path,
            "# FACT configuration\n# Uncomment and edit any of the [cache], [circuit], [sql], [tools],\n# [pipeline], or [logging] sections below to override a default.\n",
        );
    }
}

/// Parse an optional environment variable into `T`, surfacing a `ConfigError`
/// naming the offending variable on parse failure rather than silently
/// falling back to a default.
fn env_or<T: std::str::FromStr>(name: &str) -> Result<Option<T>, FactError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| FactError::config(format!("invalid value for {}: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}
