//! Remote tool gateway contract (§6.2).
//!
//! Tool handlers that forward to a remote service implement this trait
//! instead of talking to `reqwest` directly, so the pipeline's injection
//! point stays transport-agnostic (the core "does not mandate the
//! transport", per spec).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GatewayResult {
    Ok { output: Value },
    Error { error: GatewayErrorPayload },
}

#[async_trait::async_trait]
pub trait ToolGateway: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        user_id: &str,
        args: Value,
        timeout: Duration,
    ) -> GatewayResult;
}

/// Reqwest-backed adapter forwarding to an HTTP tool-gateway service.
pub struct HttpToolGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpToolGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl ToolGateway for HttpToolGateway {
    async fn execute(
        &self,
        tool_name: &str,
        user_id: &str,
        args: Value,
        timeout: Duration,
    ) -> GatewayResult {
        let body = serde_json::json!({ "user_id": user_id, "args": args });

        let response = match self
            .http
            .post(format!("{}/tools/{}/execute", self.base_url, tool_name))
            .json(&body)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return GatewayResult::Error {
                    error: GatewayErrorPayload {
                        code: "gateway_unreachable".to_string(),
                        message: e.to_string(),
                    },
                }
            }
        };

        match response.json::<GatewayResult>().await {
            Ok(result) => result,
            Err(e) => GatewayResult::Error {
                error: GatewayErrorPayload {
                    code: "gateway_bad_response".to_string(),
                    message: e.to_string(),
                },
            },
        }
    }
}
