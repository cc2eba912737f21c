//! Tool registry configuration (§4.4, §6.5)

use serde::Deserialize;

/// Tunables for the tool registry (C4).
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Tool-independent global rate limit, requests per minute per user.
    pub global_rate_limit_per_minute: u32,
    /// Default per-invocation wall-clock timeout, in seconds.
    pub execution_timeout_seconds: u64,
    /// Maximum size of a sanitized tool result, in bytes.
    pub max_result_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            global_rate_limit_per_minute: 100,
            execution_timeout_seconds: 30,
            max_result_bytes: 1024 * 1024,
        }
    }
}

/// Tool settings as loaded from the config file's `[tools]` section.
#[derive(Debug, Deserialize, Default)]
pub struct FileToolsConfig {
    pub global_rate_limit_per_minute: Option<u32>,
    pub execution_timeout_seconds: Option<u64>,
    pub max_result_bytes: Option<usize>,
}

impl ToolsConfig {
    pub fn from_file(file: Option<FileToolsConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            global_rate_limit_per_minute: file
                .global_rate_limit_per_minute
                .unwrap_or(defaults.global_rate_limit_per_minute),
            execution_timeout_seconds: file
                .execution_timeout_seconds
                .unwrap_or(defaults.execution_timeout_seconds),
            max_result_bytes: file.max_result_bytes.unwrap_or(defaults.max_result_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_documented_defaults() {
        let cfg = ToolsConfig::default();
        assert_eq!(cfg.global_rate_limit_per_minute, 100);
        assert_eq!(cfg.execution_timeout_seconds, 30);
        assert_eq!(cfg.max_result_bytes, 1024 * 1024);
    }
}
