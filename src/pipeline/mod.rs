//! Query pipeline (C6, §4.6): the per-request state machine that ties cache,
//! tool registry, and LLM client together.

pub mod gateway;
pub mod llm;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::cache::{FacadeGet, FacadeStore, ResilientCache};
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, FactError};
use crate::metrics::Metrics;
use crate::tools::{ToolInvocation, ToolRegistry};

use llm::{Block, LlmClient, LlmResult, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    SkippedDegraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    ToolLoopExhausted,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query_id: String,
    pub response: String,
    pub status: SessionStatus,
    pub cache_status: CacheStatus,
    pub latency_ms: u64,
    pub llm_calls: u32,
}

/// C6: the query pipeline. Owns no mutable state of its own beyond what a
/// single `run_query` call threads through; C1-C5 are shared, injected
/// dependencies.
pub struct QueryPipeline {
    cache: Arc<ResilientCache>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    config: PipelineConfig,
    system_prompt: String,
    metrics: Arc<Metrics>,
}

impl QueryPipeline {
    pub fn new(
        cache: Arc<ResilientCache>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LlmClient>,
        config: PipelineConfig,
        system_prompt: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            tools,
            llm,
            config,
            system_prompt,
            metrics,
        }
    }

    pub async fn run_query(&self, user_id: &str, query: &str) -> Result<QueryOutcome, FactError> {
        let deadline = Duration::from_secs(self.config.request_timeout_seconds);
        let result = match tokio::time::timeout(deadline, self.run_query_inner(user_id, query)).await {
            Ok(result) => result,
            Err(_) => Err(FactError::new(
                ErrorKind::PipelineTimeout,
                "request exceeded its overall deadline",
            )),
        };
        if let Ok(outcome) = &result {
            self.metrics.record_query(outcome.cache_status, outcome.latency_ms);
        }
        result
    }

    async fn run_query_inner(&self, user_id: &str, query: &str) -> Result<QueryOutcome, FactError> {
        let started = Instant::now();
        let query_id = Uuid::new_v4().to_string();

        // Step 1: normalize.
        let normalized = query.trim();
        if normalized.is_empty() {
            return Err(FactError::new(ErrorKind::InvalidArguments, "query must not be empty")
                .with_query_id(query_id));
        }

        // Step 2: fingerprint.
        let fingerprint = self.cache.fingerprint(normalized);

        // Step 3: cache probe.
        match self.cache.get(&fingerprint) {
            FacadeGet::Hit(entry) => Ok(QueryOutcome {
                query_id,
                response: entry.content,
                status: SessionStatus::Completed,
                cache_status: CacheStatus::Hit,
                latency_ms: started.elapsed().as_millis() as u64,
                llm_calls: 0,
            }),
            FacadeGet::Miss => {
                self.run_llm_phase(user_id, normalized, &fingerprint, CacheStatus::Miss, query_id, started)
                    .await
            }
            FacadeGet::Degraded => {
                self.run_llm_phase(
                    user_id,
                    normalized,
                    &fingerprint,
                    CacheStatus::SkippedDegraded,
                    query_id,
                    started,
                )
                .await
            }
        }
    }

    async fn run_llm_phase(
        &self,
        user_id: &str,
        normalized_query: &str,
        fingerprint: &str,
        cache_status: CacheStatus,
        query_id: String,
        started: Instant,
    ) -> Result<QueryOutcome, FactError> {
        let schemas = self.tools.list_schemas();
        let mut history = vec![Message::user_text(normalized_query)];
        let mut llm_calls = 0u32;
        // Tracks the previous round's tool-call signature. Per §4.6: the same
        // fingerprint of tool calls twice in a row is treated as a fixed
        // point and exits the loop.
        let mut last_signature: Option<String> = None;

        let mut result = self.call_llm_with_retry(&history, &schemas, &query_id).await?;
        llm_calls += 1;

        let (final_text, status) = loop {
            let assistant_message = Message::assistant(result.content.clone());
            let tool_uses = assistant_message.tool_use_blocks();

            if tool_uses.is_empty() {
                let text = assistant_message.text_content();
                history.push(assistant_message);
                break (text, SessionStatus::Completed);
            }

            if llm_calls as usize > self.config.max_tool_iterations as usize {
                let text = assistant_message.text_content();
                let fallback = if text.is_empty() {
                    "unable to complete the request within the available tool-use budget".to_string()
                } else {
                    text
                };
                history.push(assistant_message);
                break (fallback, SessionStatus::ToolLoopExhausted);
            }

            let signature = tool_call_signature(&tool_uses);
            let is_fixed_point = last_signature.as_deref() == Some(signature.as_str());
            last_signature = Some(signature);
            if is_fixed_point {
                let text = assistant_message.text_content();
                history.push(assistant_message);
                break (text, SessionStatus::Completed);
            }

            history.push(assistant_message);

            let mut result_blocks = Vec::with_capacity(tool_uses.len());
            for (id, name, args) in tool_uses {
                let outcome = self
                    .tools
                    .invoke(ToolInvocation {
                        tool_name: name.to_string(),
                        args: args.clone(),
                        user_id: user_id.to_string(),
                    })
                    .await;
                let content = match outcome {
                    Ok(value) => serde_json::to_string(&value).unwrap_or_default(),
                    Err(e) => serde_json::to_string(&crate::error::ErrorPayload::from(&e))
                        .unwrap_or_default(),
                };
                result_blocks.push(Block::ToolResult {
                    tool_use_id: id.to_string(),
                    content,
                });
            }
            history.push(Message::tool_results(result_blocks));

            result = self.call_llm_with_retry(&history, &schemas, &query_id).await?;
            llm_calls += 1;
        };

        if status == SessionStatus::Completed
            && matches!(cache_status, CacheStatus::Miss | CacheStatus::SkippedDegraded)
            && !final_text.is_empty()
        {
            match self.cache.store(fingerprint, &final_text) {
                FacadeStore::Stored | FacadeStore::RejectedTooSmall | FacadeStore::Degraded => {}
            }
        }

        Ok(QueryOutcome {
            query_id,
            response: final_text,
            status,
            cache_status,
            latency_ms: started.elapsed().as_millis() as u64,
            llm_calls,
        })
    }

    async fn call_llm_with_retry(
        &self,
        history: &[Message],
        schemas: &[crate::tools::ToolSchema],
        query_id: &str,
    ) -> Result<LlmResult, FactError> {
        let mut attempt = 0u32;
        loop {
            let per_call_timeout = Duration::from_secs(self.config.request_timeout_seconds);
            match self
                .llm
                .call_llm(&self.system_prompt, history, schemas, per_call_timeout)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.kind.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(
                        attempt,
                        self.config.retry_base_delay_ms,
                        self.config.retry_max_delay_ms,
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(FactError::new(
                        ErrorKind::LlmUnavailable,
                        format!("LLM call failed ({:?}): {}", e.kind, e.message),
                    )
                    .with_query_id(query_id.to_string()))
                }
            }
        }
    }
}

fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let scaled = base_ms.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(scaled.min(max_ms))
}

fn tool_call_signature(tool_uses: &[(&str, &str, &Value)]) -> String {
    let mut parts: Vec<String> = tool_uses
        .iter()
        .map(|(_, name, args)| format!("{name}:{args}"))
        .collect();
    parts.sort();
    parts.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, ResilientCache};
    use crate::circuit::CircuitBreaker;
    use crate::config::{CacheConfig, CircuitConfig, PipelineConfig as PConfig, ToolsConfig};
    use crate::pipeline::llm::{StubLlmClient, StopReason, Usage};
    use crate::tools::ToolRegistry;

    fn pipeline_with(llm: StubLlmClient) -> QueryPipeline {
        let cache = Arc::new(ResilientCache::new(
            CacheStore::new(CacheConfig {
                min_tokens: 2,
                ..CacheConfig::default()
            }),
            CircuitBreaker::new(CircuitConfig::default()),
        ));
        let tools = Arc::new(ToolRegistry::new(ToolsConfig::default()));
        QueryPipeline::new(
            cache,
            tools,
            Arc::new(llm),
            PConfig::default(),
            "test system prompt".to_string(),
            Arc::new(crate::metrics::Metrics::new()),
        )
    }

    fn text_result(text: &str) -> LlmResult {
        LlmResult {
            content: vec![Block::Text { text: text.to_string() }],
            stop_reason: StopReason::EndTurn,
            usage: Usage { input_tokens: 10, output_tokens: 10 },
        }
    }

    #[tokio::test]
    async fn cache_miss_then_hit() {
        let llm = StubLlmClient::new(vec![text_result(
            "Revenue in Q1-2025 was 1234567.89 dollars across all tracked companies.",
        )]);
        let pipeline = pipeline_with(llm);

        let first = pipeline.run_query("u1", "What was Q1 2025 revenue?").await.unwrap();
        assert_eq!(first.cache_status, CacheStatus::Miss);
        assert_eq!(first.llm_calls, 1);

        let second = pipeline.run_query("u1", "What was Q1 2025 revenue?").await.unwrap();
        assert_eq!(second.cache_status, CacheStatus::Hit);
        assert_eq!(second.llm_calls, 0);
        assert_eq!(second.response, first.response);
    }

    #[tokio::test]
    async fn rejects_empty_query() {
        let llm = StubLlmClient::new(vec![text_result("irrelevant")]);
        let pipeline = pipeline_with(llm);
        let result = pipeline.run_query("u1", "   ").await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidArguments);
    }

    /// Distinct tool-use blocks per round so consecutive signatures never
    /// match; otherwise fixed-point detection would exit the loop before the
    /// iteration bound is ever reached.
    fn varying_tool_use_result(n: u32) -> LlmResult {
        LlmResult {
            content: vec![Block::ToolUse {
                id: format!("t{n}"),
                name: "Nonexistent.Tool".to_string(),
                input: serde_json::json!({"n": n}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: Usage { input_tokens: 1, output_tokens: 1 },
        }
    }

    #[tokio::test]
    async fn tool_loop_exhausts_after_max_iterations() {
        let llm = StubLlmClient::new(vec![
            varying_tool_use_result(0),
            varying_tool_use_result(1),
            varying_tool_use_result(2),
        ]);
        let mut config = PConfig::default();
        config.max_tool_iterations = 2;

        let cache = Arc::new(ResilientCache::new(
            CacheStore::new(CacheConfig::default()),
            CircuitBreaker::new(CircuitConfig::default()),
        ));
        let tools = Arc::new(ToolRegistry::new(ToolsConfig::default()));
        let pipeline = QueryPipeline::new(
            cache,
            tools,
            Arc::new(llm),
            config,
            "prompt".to_string(),
            Arc::new(crate::metrics::Metrics::new()),
        );

        let outcome = pipeline.run_query("u1", "loop forever please").await.unwrap();
        assert_eq!(outcome.status, SessionStatus::ToolLoopExhausted);
        assert_eq!(outcome.llm_calls, 3);
    }

    /// S5: exhaustion must never write back to the cache, even when the
    /// synthesized fallback text is long enough to clear `min_tokens`.
    #[tokio::test]
    async fn tool_loop_exhaustion_never_writes_back_to_cache() {
        let llm = StubLlmClient::new(vec![
            varying_tool_use_result(0),
            varying_tool_use_result(1),
            varying_tool_use_result(2),
        ]);
        let mut config = PConfig::default();
        config.max_tool_iterations = 2;

        let cache = Arc::new(ResilientCache::new(
            CacheStore::new(CacheConfig {
                min_tokens: 1,
                ..CacheConfig::default()
            }),
            CircuitBreaker::new(CircuitConfig::default()),
        ));
        let tools = Arc::new(ToolRegistry::new(ToolsConfig::default()));
        let pipeline = QueryPipeline::new(
            Arc::clone(&cache),
            tools,
            Arc::new(llm),
            config,
            "prompt".to_string(),
            Arc::new(crate::metrics::Metrics::new()),
        );

        let outcome = pipeline.run_query("u1", "loop forever please").await.unwrap();
        assert_eq!(outcome.status, SessionStatus::ToolLoopExhausted);
        assert_eq!(cache.metrics().cache.entry_count, 0);
    }

    /// §4.6 step 5: the same tool-call fingerprint two rounds running is a
    /// fixed point; the loop must exit on the *second* occurrence, not the
    /// third.
    #[tokio::test]
    async fn identical_tool_calls_twice_in_a_row_exit_as_fixed_point() {
        let repeated_tool_use = LlmResult {
            content: vec![Block::ToolUse {
                id: "t1".to_string(),
                name: "Nonexistent.Tool".to_string(),
                input: serde_json::json!({"n": 1}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: Usage { input_tokens: 1, output_tokens: 1 },
        };
        // Three identical rounds queued; the loop must stop after consuming
        // only the first two.
        let llm = StubLlmClient::new(vec![repeated_tool_use.clone(), repeated_tool_use.clone(), repeated_tool_use]);
        let pipeline = pipeline_with(llm);

        let outcome = pipeline.run_query("u1", "repeat the same call").await.unwrap();
        assert_eq!(outcome.status, SessionStatus::Completed);
        assert_eq!(outcome.llm_calls, 2);
    }
}
