//! Query pipeline configuration (§4.6, §6.5)

use serde::Deserialize;

/// Tunables for the query pipeline state machine (C6).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum tool-use/tool-result round trips before exhaustion.
    pub max_tool_iterations: u32,
    /// Overall deadline for a single request, in seconds.
    pub request_timeout_seconds: u64,
    /// Maximum LLM-call retries on transient provider failure.
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Cap on backoff delay, in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            request_timeout_seconds: 60,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 5_000,
        }
    }
}

/// Pipeline settings as loaded from the config file's `[pipeline]` section.
#[derive(Debug, Deserialize, Default)]
pub struct FilePipelineConfig {
    pub max_tool_iterations: Option<u32>,
    pub request_timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
}

impl PipelineConfig {
    pub fn from_file(file: Option<FilePipelineConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            max_tool_iterations: file
                .max_tool_iterations
                .unwrap_or(defaults.max_tool_iterations),
            request_timeout_seconds: file
                .request_timeout_seconds
                .unwrap_or(defaults.request_timeout_seconds),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            retry_base_delay_ms: file
                .retry_base_delay_ms
                .unwrap_or(defaults.retry_base_delay_ms),
            retry_max_delay_ms: file
                .retry_max_delay_ms
                .unwrap_or(defaults.retry_max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_documented_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_tool_iterations, 5);
        assert_eq!(cfg.request_timeout_seconds, 60);
        assert_eq!(cfg.max_retries, 3);
    }
}
