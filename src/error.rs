//! Error taxonomy for the FACT core.
//!
//! Every fallible operation in the core surfaces one of these kinds. Kinds
//! that are "local recovery: yes" never escape the component that produced
//! them as a hard failure — they're folded into a tool-result block or a
//! cache degradation and the pipeline keeps going. Kinds with "no" are
//! terminal for the request.

use std::fmt;

/// Stable, machine-readable error kind. The `Display` impl of `FactError`
/// never includes stack traces, database error text, configuration values,
/// or other sensitive strings — only the kind, a short code, and a message
/// safe to show a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    CacheRejected,
    CacheDegraded,
    ToolNotFound,
    InvalidArguments,
    Unauthorized,
    RateLimited,
    ToolTimeout,
    ToolHandlerError,
    SecurityViolation,
    PoolExhausted,
    QueryTimeout,
    LlmUnavailable,
    PipelineTimeout,
}

impl ErrorKind {
    /// Stable `SCREAMING_SNAKE` code, used in logs and caller-visible payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::CacheRejected => "CACHE_REJECTED",
            ErrorKind::CacheDegraded => "CACHE_DEGRADED",
            ErrorKind::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorKind::InvalidArguments => "INVALID_ARGUMENTS",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::ToolTimeout => "TOOL_TIMEOUT",
            ErrorKind::ToolHandlerError => "TOOL_HANDLER_ERROR",
            ErrorKind::SecurityViolation => "SECURITY_VIOLATION",
            ErrorKind::PoolExhausted => "POOL_EXHAUSTED",
            ErrorKind::QueryTimeout => "QUERY_TIMEOUT",
            ErrorKind::LlmUnavailable => "LLM_UNAVAILABLE",
            ErrorKind::PipelineTimeout => "PIPELINE_TIMEOUT",
        }
    }

    /// Whether the pipeline can keep processing the request after this
    /// error (folded into a tool-result block or a cache degradation), or
    /// whether it's terminal for the request.
    pub fn is_locally_recoverable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::Config | ErrorKind::LlmUnavailable | ErrorKind::PipelineTimeout
        )
    }
}

/// A single classified error, with enough context for correlation but
/// nothing sensitive.
#[derive(Debug, Clone)]
pub struct FactError {
    pub kind: ErrorKind,
    pub message: String,
    pub query_id: Option<String>,
}

impl FactError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            query_id: None,
        }
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn security_violation(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecurityViolation, reason)
    }
}

impl fmt::Display for FactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query_id {
            Some(qid) => write!(f, "[{}] {} (query_id={})", self.code(), self.message, qid),
            None => write!(f, "[{}] {}", self.code(), self.message),
        }
    }
}

impl std::error::Error for FactError {}

/// Serializable, caller-safe rendering of a [`FactError`] (§7 policy: never
/// stack traces, db error text, config values, or other sensitive strings).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorPayload {
    pub error_kind: &'static str,
    pub error_code: &'static str,
    pub message: String,
    pub query_id: Option<String>,
}

impl From<&FactError> for ErrorPayload {
    fn from(err: &FactError) -> Self {
        Self {
            error_kind: err.code(),
            error_code: err.code(),
            message: err.message.clone(),
            query_id: err.query_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable() {
        assert_eq!(ErrorKind::SecurityViolation.code(), "SECURITY_VIOLATION");
        assert_eq!(ErrorKind::RateLimited.code(), "RATE_LIMITED");
    }

    #[test]
    fn tool_errors_are_locally_recoverable() {
        assert!(ErrorKind::ToolTimeout.is_locally_recoverable());
        assert!(ErrorKind::SecurityViolation.is_locally_recoverable());
        assert!(!ErrorKind::LlmUnavailable.is_locally_recoverable());
        assert!(!ErrorKind::PipelineTimeout.is_locally_recoverable());
        assert!(!ErrorKind::Config.is_locally_recoverable());
    }

    #[test]
    fn display_never_includes_query_id_when_absent() {
        let err = FactError::new(ErrorKind::ToolNotFound, "no such tool: foo");
        assert_eq!(format!("{}", err), "[TOOL_NOT_FOUND] no such tool: foo");
    }
}
