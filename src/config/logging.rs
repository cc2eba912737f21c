//! Logging configuration

use serde::Deserialize;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Enable a rotating file sink for security-event audit logging
    /// (SQL `SecurityViolation`s), in addition to stdout.
    pub audit_log_enabled: bool,
    /// Directory for the audit log file, when enabled.
    pub audit_log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            audit_log_enabled: false,
            audit_log_dir: "./logs".to_string(),
        }
    }
}

/// Logging settings as loaded from the config file's `[logging]` section.
#[derive(Debug, Deserialize, Default)]
pub struct FileLoggingConfig {
    pub level: Option<String>,
    pub audit_log_enabled: Option<bool>,
    pub audit_log_dir: Option<String>,
}

impl LoggingConfig {
    pub fn from_file(file: Option<FileLoggingConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            level: file.level.unwrap_or(defaults.level),
            audit_log_enabled: file.audit_log_enabled.unwrap_or(defaults.audit_log_enabled),
            audit_log_dir: file.audit_log_dir.unwrap_or(defaults.audit_log_dir),
        }
    }
}
