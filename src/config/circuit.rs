//! Circuit breaker configuration (§4.2, §6.5)

use serde::Deserialize;

/// Tunables for the cache circuit breaker (C2).
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures from CLOSED before tripping OPEN.
    pub failure_threshold: u32,
    /// Consecutive successes from HALF_OPEN before closing.
    pub success_threshold: u32,
    /// Seconds to stay OPEN before admitting a probe (-> HALF_OPEN).
    pub open_timeout_seconds: u64,
    /// Fraction of requests admitted through HALF_OPEN (thundering-herd guard).
    pub recovery_factor: f64,
    /// Size of the rolling failure-record ring (observability only).
    pub window_size: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout_seconds: 60,
            recovery_factor: 0.5,
            window_size: 50,
        }
    }
}

/// Circuit breaker settings as loaded from the config file's `[circuit]` section.
#[derive(Debug, Deserialize, Default)]
pub struct FileCircuitConfig {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub open_timeout_seconds: Option<u64>,
    pub recovery_factor: Option<f64>,
    pub window_size: Option<usize>,
}

impl CircuitConfig {
    pub fn from_file(file: Option<FileCircuitConfig>) -> Result<Self, String> {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        let failure_threshold = file.failure_threshold.unwrap_or(defaults.failure_threshold);
        if !(2..=50).contains(&failure_threshold) {
            return Err(format!(
                "failure_threshold must be 2-50, got {}",
                failure_threshold
            ));
        }

        let success_threshold = file.success_threshold.unwrap_or(defaults.success_threshold);
        if !(1..=20).contains(&success_threshold) {
            return Err(format!(
                "success_threshold must be 1-20, got {}",
                success_threshold
            ));
        }

        let open_timeout_seconds = file
            .open_timeout_seconds
            .unwrap_or(defaults.open_timeout_seconds);
        if open_timeout_seconds < 1 {
            return Err("open_timeout_seconds must be >= 1".to_string());
        }

        let recovery_factor = file.recovery_factor.unwrap_or(defaults.recovery_factor);
        if !(recovery_factor > 0.0 && recovery_factor <= 1.0) {
            return Err(format!(
                "recovery_factor must be in (0, 1], got {}",
                recovery_factor
            ));
        }

        Ok(Self {
            failure_threshold,
            success_threshold,
            open_timeout_seconds,
            recovery_factor,
            window_size: file.window_size.unwrap_or(defaults.window_size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_documented_defaults() {
        let cfg = CircuitConfig::default();
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.success_threshold, 3);
        assert_eq!(cfg.open_timeout_seconds, 60);
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let file = FileCircuitConfig {
            failure_threshold: Some(1),
            ..Default::default()
        };
        assert!(CircuitConfig::from_file(Some(file)).is_err());
    }

    #[test]
    fn rejects_zero_recovery_factor() {
        let file = FileCircuitConfig {
            recovery_factor: Some(0.0),
            ..Default::default()
        };
        assert!(CircuitConfig::from_file(Some(file)).is_err());
    }
}
