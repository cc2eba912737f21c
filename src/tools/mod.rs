//! Tool registry (C4, §4.4): schema validation, rate limiting, dispatch.
//!
//! Tools are plain values carrying a name, schema, and handler; registration
//! is an explicit call at startup rather than a decorator with global
//! side effects (§9 re-architecture mapping).

mod ratelimit;
pub mod pool;
pub mod sql;

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;

use crate::config::ToolsConfig;
use crate::error::{ErrorKind, FactError};
use ratelimit::RateLimiter;

/// Parameter types a tool schema field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

/// Per-field constraints checked during argument validation.
#[derive(Debug, Clone, Default)]
pub struct FieldConstraint {
    pub param_type: Option<ParamType>,
    pub required: bool,
    pub pattern: Option<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub enum_values: Option<Vec<String>>,
}

/// A tool's parameter schema: field name -> constraint.
#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub fields: Vec<(String, FieldConstraint)>,
}

impl ToolSchema {
    /// Validate `args` against this schema; returns field-level errors.
    pub fn validate(&self, args: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        let Some(obj) = args.as_object() else {
            return vec!["arguments must be a JSON object".to_string()];
        };

        for (field, constraint) in &self.fields {
            let value = obj.get(field);

            if constraint.required && value.is_none() {
                errors.push(format!("missing required field '{field}'"));
                continue;
            }
            let Some(value) = value else { continue };

            if let Some(expected) = constraint.param_type {
                if !matches_type(value, expected) {
                    errors.push(format!("field '{field}' has wrong type"));
                    continue;
                }
            }

            if let Some(s) = value.as_str() {
                if let Some(min) = constraint.min_length {
                    if s.len() < min {
                        errors.push(format!("field '{field}' shorter than minimum length {min}"));
                    }
                }
                if let Some(max) = constraint.max_length {
                    if s.len() > max {
                        errors.push(format!("field '{field}' exceeds maximum length {max}"));
                    }
                }
                if let Some(pattern) = &constraint.pattern {
                    match regex::Regex::new(pattern) {
                        Ok(re) if !re.is_match(s) => {
                            errors.push(format!("field '{field}' does not match required pattern"));
                        }
                        Err(_) => errors.push(format!("field '{field}' has an invalid pattern configured")),
                        _ => {}
                    }
                }
                if let Some(allowed) = &constraint.enum_values {
                    if !allowed.iter().any(|v| v == s) {
                        errors.push(format!("field '{field}' is not one of the allowed values"));
                    }
                }
            }

            if let Some(n) = value.as_f64() {
                if let Some(min) = constraint.minimum {
                    if n < min {
                        errors.push(format!("field '{field}' below minimum {min}"));
                    }
                }
                if let Some(max) = constraint.maximum {
                    if n > max {
                        errors.push(format!("field '{field}' above maximum {max}"));
                    }
                }
            }
        }

        errors
    }
}

fn matches_type(value: &Value, expected: ParamType) -> bool {
    match expected {
        ParamType::String => value.is_string(),
        ParamType::Integer => value.is_i64() || value.is_u64(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Object => value.is_object(),
        ParamType::Array => value.is_array(),
    }
}

/// A single tool invocation's resolved shape, as exposed to the pipeline.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub args: Value,
    pub user_id: String,
}

/// Outcome of `ToolRegistry::invoke`, serialized back into a tool-result
/// block for the LLM (§4.6 step 5). Errors are values, not exceptions
/// (§9 re-architecture mapping) — only pipeline-terminal faults propagate.
pub type ToolResult = Result<Value, FactError>;

/// Behavior a registered tool implements. `invoke` runs synchronously with
/// respect to the caller's async task; handlers doing I/O should be async
/// internally and the registry wraps the call with a timeout.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn schema(&self) -> &ToolSchema;
    fn requires_auth(&self) -> bool {
        false
    }
    /// Per-tool override of the execution timeout; `None` uses the
    /// registry-wide default.
    fn timeout_override(&self) -> Option<Duration> {
        None
    }
    /// Per-tool override of the rate limit; `None` uses the registry-wide
    /// default.
    fn rate_limit_override(&self) -> Option<u32> {
        None
    }
    async fn invoke(&self, args: Value, user_id: &str) -> ToolResult;
}

struct RegisteredTool {
    tool: Box<dyn Tool>,
    version: u32,
}

/// Per-tool invocation counters, surfaced in the C7 metrics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolInvocationMetrics {
    pub invocations: u64,
    pub failures: u64,
}

/// C4: the tool registry. Stateless after registration except for the
/// rate-limit buckets and invocation counters, which are the only things
/// mutated per-invocation.
pub struct ToolRegistry {
    config: ToolsConfig,
    tools: RwLock<HashMap<String, RegisteredTool>>,
    rate_limiter: Mutex<RateLimiter>,
    invocation_metrics: Mutex<HashMap<String, ToolInvocationMetrics>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    DuplicateTool,
}

impl ToolRegistry {
    pub fn new(config: ToolsConfig) -> Self {
        Self {
            rate_limiter: Mutex::new(RateLimiter::new()),
            tools: RwLock::new(HashMap::new()),
            invocation_metrics: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Point-in-time invocation/failure counters per registered tool (§4.7).
    pub fn invocation_metrics(&self) -> HashMap<String, ToolInvocationMetrics> {
        self.invocation_metrics
            .lock()
            .expect("tool metrics lock poisoned")
            .clone()
    }

    /// Register a tool at the given version. Re-registering at a
    /// same-or-older version is rejected; a newer version replaces.
    pub fn register(&self, tool: Box<dyn Tool>, version: u32) -> RegisterOutcome {
        let mut tools = self.tools.write().expect("tool registry lock poisoned");
        let name = tool.name().to_string();
        if let Some(existing) = tools.get(&name) {
            if version <= existing.version {
                return RegisterOutcome::DuplicateTool;
            }
        }
        tools.insert(name, RegisteredTool { tool, version });
        RegisterOutcome::Registered
    }

    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        let tools = self.tools.read().expect("tool registry lock poisoned");
        tools.values().map(|rt| rt.tool.schema().clone()).collect()
    }

    /// Full invocation contract: resolve -> validate -> auth -> rate-limit ->
    /// invoke-with-timeout -> sanitize (§4.4).
    pub async fn invoke(&self, invocation: ToolInvocation) -> ToolResult {
        let ToolInvocation {
            tool_name,
            args,
            user_id,
        } = invocation;

        let (schema_errors, requires_auth, timeout, rate_limit) = {
            let tools = self.tools.read().expect("tool registry lock poisoned");
            let Some(registered) = tools.get(&tool_name) else {
                return Err(FactError::new(
                    ErrorKind::ToolNotFound,
                    format!("no tool registered with name '{tool_name}'"),
                ));
            };
            let errors = registered.tool.schema().validate(&args);
            (
                errors,
                registered.tool.requires_auth(),
                registered
                    .tool
                    .timeout_override()
                    .unwrap_or(Duration::from_secs(self.config.execution_timeout_seconds)),
                registered
                    .tool
                    .rate_limit_override()
                    .unwrap_or(self.config.global_rate_limit_per_minute),
            )
        };

        if !schema_errors.is_empty() {
            self.record_invocation(&tool_name, false);
            return Err(FactError::new(
                ErrorKind::InvalidArguments,
                schema_errors.join("; "),
            ));
        }

        if requires_auth && user_id.trim().is_empty() {
            self.record_invocation(&tool_name, false);
            return Err(FactError::new(
                ErrorKind::Unauthorized,
                "tool requires a non-empty user_id",
            ));
        }

        {
            let mut limiter = self.rate_limiter.lock().expect("rate limiter lock poisoned");
            if !limiter.try_acquire(
                &user_id,
                &tool_name,
                rate_limit,
                self.config.global_rate_limit_per_minute,
            ) {
                self.record_invocation(&tool_name, false);
                return Err(FactError::new(
                    ErrorKind::RateLimited,
                    format!(
                        "rate limit exceeded for tool '{tool_name}' (tool limit {rate_limit}/min, \
                         global limit {}/min per user)",
                        self.config.global_rate_limit_per_minute
                    ),
                ));
            }
        }

        let invoke_future = {
            let tools = self.tools.read().expect("tool registry lock poisoned");
            let registered = tools.get(&tool_name).expect("checked above");
            registered.tool.invoke(args, &user_id)
        };

        let result = match tokio::time::timeout(timeout, invoke_future).await {
            Ok(result) => result,
            Err(_) => {
                self.record_invocation(&tool_name, false);
                return Err(FactError::new(
                    ErrorKind::ToolTimeout,
                    format!("tool '{tool_name}' did not complete within {timeout:?}"),
                ))
            }
        };

        self.record_invocation(&tool_name, result.is_ok());
        result.map(|value| sanitize_result(value, self.config.max_result_bytes))
    }

    fn record_invocation(&self, tool_name: &str, succeeded: bool) {
        let mut metrics = self.invocation_metrics.lock().expect("tool metrics lock poisoned");
        let entry = metrics.entry(tool_name.to_string()).or_default();
        entry.invocations += 1;
        if !succeeded {
            entry.failures += 1;
        }
    }
}

/// Strip control characters and bound the serialized size of a tool result.
fn sanitize_result(value: Value, max_bytes: usize) -> Value {
    let sanitized = strip_control_chars(value);
    let serialized = serde_json::to_string(&sanitized).unwrap_or_default();
    if serialized.len() <= max_bytes {
        sanitized
    } else {
        Value::String(format!(
            "[result truncated: exceeded {max_bytes} bytes after sanitization]"
        ))
    }
}

fn strip_control_chars(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.chars().filter(|c| !c.is_control() || *c == '\n').collect()),
        Value::Array(arr) => Value::Array(arr.into_iter().map(strip_control_chars).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, strip_control_chars(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool {
        schema: ToolSchema,
    }

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "Echo"
        }
        fn schema(&self) -> &ToolSchema {
            &self.schema
        }
        async fn invoke(&self, args: Value, _user_id: &str) -> ToolResult {
            Ok(args)
        }
    }

    struct EchoTool2 {
        schema: ToolSchema,
    }

    #[async_trait::async_trait]
    impl Tool for EchoTool2 {
        fn name(&self) -> &str {
            "Echo2"
        }
        fn schema(&self) -> &ToolSchema {
            &self.schema
        }
        async fn invoke(&self, args: Value, _user_id: &str) -> ToolResult {
            Ok(args)
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(ToolsConfig::default())
    }

    fn echo_schema() -> ToolSchema {
        ToolSchema {
            name: "Echo".to_string(),
            description: "echoes its input".to_string(),
            fields: vec![(
                "text".to_string(),
                FieldConstraint {
                    param_type: Some(ParamType::String),
                    required: true,
                    ..Default::default()
                },
            )],
        }
    }

    fn echo2_schema() -> ToolSchema {
        ToolSchema {
            name: "Echo2".to_string(),
            ..echo_schema()
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let reg = registry();
        let result = reg
            .invoke(ToolInvocation {
                tool_name: "Nope".to_string(),
                args: json!({}),
                user_id: "u1".to_string(),
            })
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn missing_required_field_is_invalid_arguments() {
        let reg = registry();
        reg.register(Box::new(EchoTool { schema: echo_schema() }), 1);
        let result = reg
            .invoke(ToolInvocation {
                tool_name: "Echo".to_string(),
                args: json!({}),
                user_id: "u1".to_string(),
            })
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn valid_invocation_succeeds() {
        let reg = registry();
        reg.register(Box::new(EchoTool { schema: echo_schema() }), 1);
        let result = reg
            .invoke(ToolInvocation {
                tool_name: "Echo".to_string(),
                args: json!({"text": "hi"}),
                user_id: "u1".to_string(),
            })
            .await;
        assert_eq!(result.unwrap(), json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn reregistering_same_version_is_duplicate() {
        let reg = registry();
        assert_eq!(
            reg.register(Box::new(EchoTool { schema: echo_schema() }), 1),
            RegisterOutcome::Registered
        );
        assert_eq!(
            reg.register(Box::new(EchoTool { schema: echo_schema() }), 1),
            RegisterOutcome::DuplicateTool
        );
        assert_eq!(
            reg.register(Box::new(EchoTool { schema: echo_schema() }), 2),
            RegisterOutcome::Registered
        );
    }

    #[tokio::test]
    async fn rate_limit_blocks_after_threshold() {
        let reg = ToolRegistry::new(ToolsConfig {
            global_rate_limit_per_minute: 2,
            ..ToolsConfig::default()
        });
        reg.register(Box::new(EchoTool { schema: echo_schema() }), 1);

        for _ in 0..2 {
            let result = reg
                .invoke(ToolInvocation {
                    tool_name: "Echo".to_string(),
                    args: json!({"text": "hi"}),
                    user_id: "u1".to_string(),
                })
                .await;
            assert!(result.is_ok());
        }

        let third = reg
            .invoke(ToolInvocation {
                tool_name: "Echo".to_string(),
                args: json!({"text": "hi"}),
                user_id: "u1".to_string(),
            })
            .await;
        assert_eq!(third.unwrap_err().kind, ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn global_rate_limit_caps_calls_spread_across_distinct_tools() {
        let reg = ToolRegistry::new(ToolsConfig {
            global_rate_limit_per_minute: 2,
            ..ToolsConfig::default()
        });
        reg.register(Box::new(EchoTool { schema: echo_schema() }), 1);
        reg.register(Box::new(EchoTool2 { schema: echo2_schema() }), 1);

        let first = reg
            .invoke(ToolInvocation {
                tool_name: "Echo".to_string(),
                args: json!({"text": "hi"}),
                user_id: "u1".to_string(),
            })
            .await;
        assert!(first.is_ok());

        let second = reg
            .invoke(ToolInvocation {
                tool_name: "Echo2".to_string(),
                args: json!({"text": "hi"}),
                user_id: "u1".to_string(),
            })
            .await;
        assert!(second.is_ok());

        // Each individual tool bucket has room, but the global per-user cap
        // of 2 was already spent across the two distinct tools above.
        let third = reg
            .invoke(ToolInvocation {
                tool_name: "Echo".to_string(),
                args: json!({"text": "hi"}),
                user_id: "u1".to_string(),
            })
            .await;
        assert_eq!(third.unwrap_err().kind, ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn invocation_metrics_track_successes_and_failures() {
        let reg = registry();
        reg.register(Box::new(EchoTool { schema: echo_schema() }), 1);

        reg.invoke(ToolInvocation {
            tool_name: "Echo".to_string(),
            args: json!({"text": "hi"}),
            user_id: "u1".to_string(),
        })
        .await
        .unwrap();
        reg.invoke(ToolInvocation {
            tool_name: "Echo".to_string(),
            args: json!({}),
            user_id: "u1".to_string(),
        })
        .await
        .unwrap_err();

        let metrics = reg.invocation_metrics();
        let echo = metrics.get("Echo").expect("Echo should have recorded invocations");
        assert_eq!(echo.invocations, 2);
        assert_eq!(echo.failures, 1);
    }
}
