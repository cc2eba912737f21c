//! LLM provider contract (§6.1, consumed by the query pipeline).
//!
//! The core never bundles a specific provider SDK; it depends on a trait so
//! the production binary can wire in an HTTP adapter while tests wire in a
//! scripted stub.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FactError;
use crate::tools::ToolSchema;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Block>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Block::Text { text: text.into() }],
        }
    }

    pub fn assistant(content: Vec<Block>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool_results(results: Vec<Block>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }

    pub fn tool_use_blocks(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                Block::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
                _ => None,
            })
            .collect()
    }

    /// Concatenate every text block, for synthesizing a final response from
    /// a non-terminal assistant message (§4.6 step 5, tool-loop exhaustion).
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                Block::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    Length,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResult {
    pub content: Vec<Block>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl LlmResult {
    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(|b| matches!(b, Block::ToolUse { .. }))
    }
}

/// Classification of a failed `call_llm`, per §6.1. Only `RateLimited` and
/// `Timeout`/`ServerError` are worth retrying; `AuthFailed`/`BadRequest` are
/// not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    RateLimited,
    Timeout,
    AuthFailed,
    ServerError,
    BadRequest,
}

impl LlmErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::ServerError)
    }
}

#[derive(Debug, Clone)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for LlmError {}

impl From<LlmError> for FactError {
    fn from(e: LlmError) -> Self {
        FactError::new(crate::error::ErrorKind::LlmUnavailable, e.message)
    }
}

/// §6.1: the only operation the pipeline needs from an LLM provider.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn call_llm(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tool_schemas: &[ToolSchema],
        timeout: Duration,
    ) -> Result<LlmResult, LlmError>;
}

/// Reqwest-backed adapter for an Anthropic-compatible Messages API.
pub struct HttpLlmClient {
    http: reqwest::Client,
    api_url: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct WireToolSchema<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: Value,
}

fn schema_to_wire(schema: &ToolSchema) -> WireToolSchema<'_> {
    use serde_json::json;

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (field, constraint) in &schema.fields {
        let type_name = match constraint.param_type {
            Some(crate::tools::ParamType::String) => "string",
            Some(crate::tools::ParamType::Integer) => "integer",
            Some(crate::tools::ParamType::Number) => "number",
            Some(crate::tools::ParamType::Boolean) => "boolean",
            Some(crate::tools::ParamType::Object) => "object",
            Some(crate::tools::ParamType::Array) => "array",
            None => "string",
        };
        properties.insert(field.clone(), json!({"type": type_name}));
        if constraint.required {
            required.push(field.clone());
        }
    }

    WireToolSchema {
        name: &schema.name,
        description: &schema.description,
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

#[async_trait::async_trait]
impl LlmClient for HttpLlmClient {
    async fn call_llm(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tool_schemas: &[ToolSchema],
        timeout: Duration,
    ) -> Result<LlmResult, LlmError> {
        let wire_tools: Vec<WireToolSchema> = tool_schemas.iter().map(schema_to_wire).collect();
        let body = serde_json::json!({
            "model": self.model,
            "system": system_prompt,
            "messages": messages,
            "tools": wire_tools,
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.api_url))
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let kind = match status.as_u16() {
                429 => LlmErrorKind::RateLimited,
                401 | 403 => LlmErrorKind::AuthFailed,
                400 => LlmErrorKind::BadRequest,
                _ => LlmErrorKind::ServerError,
            };
            return Err(LlmError {
                kind,
                message: format!("provider returned status {status}"),
            });
        }

        response.json::<LlmResult>().await.map_err(|e| LlmError {
            kind: LlmErrorKind::ServerError,
            message: format!("failed to parse provider response: {e}"),
        })
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> LlmError {
    let kind = if e.is_timeout() {
        LlmErrorKind::Timeout
    } else {
        LlmErrorKind::ServerError
    };
    LlmError {
        kind,
        message: e.to_string(),
    }
}

/// Scripted stub for tests: returns a fixed sequence of results, one per call.
pub struct StubLlmClient {
    responses: std::sync::Mutex<Vec<LlmResult>>,
    call_count: std::sync::atomic::AtomicU64,
}

impl StubLlmClient {
    pub fn new(responses: Vec<LlmResult>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            call_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmClient for StubLlmClient {
    async fn call_llm(
        &self,
        _system_prompt: &str,
        _messages: &[Message],
        _tool_schemas: &[ToolSchema],
        _timeout: Duration,
    ) -> Result<LlmResult, LlmError> {
        self.call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut responses = self.responses.lock().expect("stub lock poisoned");
        if responses.is_empty() {
            return Err(LlmError {
                kind: LlmErrorKind::ServerError,
                message: "stub exhausted".to_string(),
            });
        }
        Ok(if responses.len() == 1 {
            responses[0].clone()
        } else {
            responses.remove(0)
        })
    }
}
