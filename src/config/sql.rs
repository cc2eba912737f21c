//! SQL executor tool configuration (§4.5, §6.5)

use serde::Deserialize;
use std::path::PathBuf;

/// Tunables for the SQL executor tool and its connection pool (C5).
#[derive(Debug, Clone)]
pub struct SqlConfig {
    /// Path to the local SQLite database file.
    pub db_path: PathBuf,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Seconds to wait for a free connection before `PoolExhausted`.
    pub acquire_timeout_seconds: u64,
    /// Wall-clock timeout for a single query, in seconds.
    pub query_timeout_seconds: u64,
    /// Maximum rows returned before truncation.
    pub max_rows: usize,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/fact.db"),
            max_connections: 10,
            acquire_timeout_seconds: 5,
            query_timeout_seconds: 30,
            max_rows: 10_000,
        }
    }
}

/// SQL settings as loaded from the config file's `[sql]` section.
#[derive(Debug, Deserialize, Default)]
pub struct FileSqlConfig {
    pub db_path: Option<String>,
    pub max_connections: Option<u32>,
    pub acquire_timeout_seconds: Option<u64>,
    pub query_timeout_seconds: Option<u64>,
    pub max_rows: Option<usize>,
}

impl SqlConfig {
    pub fn from_file(file: Option<FileSqlConfig>) -> Result<Self, String> {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        let max_connections = file.max_connections.unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err("max_connections must be >= 1".to_string());
        }

        Ok(Self {
            db_path: file.db_path.map(PathBuf::from).unwrap_or(defaults.db_path),
            max_connections,
            acquire_timeout_seconds: file
                .acquire_timeout_seconds
                .unwrap_or(defaults.acquire_timeout_seconds),
            query_timeout_seconds: file
                .query_timeout_seconds
                .unwrap_or(defaults.query_timeout_seconds),
            max_rows: file.max_rows.unwrap_or(defaults.max_rows),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_documented_defaults() {
        let cfg = SqlConfig::default();
        assert_eq!(cfg.max_connections, 10);
        assert_eq!(cfg.query_timeout_seconds, 30);
        assert_eq!(cfg.max_rows, 10_000);
    }

    #[test]
    fn rejects_zero_connections() {
        let file = FileSqlConfig {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(SqlConfig::from_file(Some(file)).is_err());
    }
}
