//! LLM provider (§6.2): a single opaque operation consumed by the
//! Scheduler. The core never inspects provider internals — retries and
//! backoff live here, not in the caller.
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::config::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub response_id: Option<String>,
    pub tokens_used: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum LlmError {
    RateLimited,
    Timeout,
    Other(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::RateLimited => write!(f, "rate limited"),
            LlmError::Timeout => write!(f, "timed out"),
            LlmError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// `previous_response_id` threads conversational state for providers
    /// that support it; providers that don't simply ignore it.
    async fn send(&self, model: &str, instructions: &str, input: &str, previous_response_id: Option<&str>) -> Result<LlmResponse, LlmError>;
}

/// Models known to reject (rather than silently ignore) a `temperature`
/// field. Anything not in this list gets the field; models in it don't.
const MODELS_WITHOUT_TEMPERATURE: &[&str] = &["o1", "o1-mini", "o3", "o3-mini"];

fn accepts_temperature(model: &str) -> bool {
    !MODELS_WITHOUT_TEMPERATURE.contains(&model)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(serde::Deserialize)]
struct ChatResponseBody {
    #[serde(default)]
    output_text: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(serde::Deserialize)]
struct UsageBody {
    #[serde(default)]
    total_tokens: Option<u64>,
}

pub struct ReqwestLlmProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    retry_base_delay_ms: u64,
    retry_max_attempts: u32,
}

impl ReqwestLlmProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, cfg: &OrchestratorConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.llm_call_timeout_secs))
            .build()
            .map_err(|e| LlmError::Other(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            retry_base_delay_ms: cfg.llm_retry_base_delay_ms,
            retry_max_attempts: cfg.llm_retry_max_attempts,
        })
    }

    async fn send_once(&self, model: &str, instructions: &str, input: &str, previous_response_id: Option<&str>) -> Result<LlmResponse, LlmError> {
        let body = ChatRequest {
            model,
            instructions,
            input,
            previous_response_id,
            temperature: accepts_temperature(model).then_some(0.8),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { LlmError::Timeout } else { LlmError::Other(e.to_string()) })?;

        if response.status().as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(LlmError::Other(format!("http {}", response.status())));
        }

        let parsed: ChatResponseBody = response.json().await.map_err(|e| LlmError::Other(e.to_string()))?;
        Ok(LlmResponse {
            text: parsed.output_text,
            response_id: parsed.id,
            tokens_used: parsed.usage.and_then(|u| u.total_tokens),
        })
    }
}

#[async_trait]
impl LlmProvider for ReqwestLlmProvider {
    async fn send(&self, model: &str, instructions: &str, input: &str, previous_response_id: Option<&str>) -> Result<LlmResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.send_once(model, instructions, input, previous_response_id).await {
                Ok(response) => return Ok(response),
                Err(LlmError::RateLimited) if attempt < self.retry_max_attempts => {
                    let delay = self.retry_base_delay_ms * 2u64.pow(attempt);
                    warn!(attempt, delay_ms = delay, model, "LLM rate limited, backing off");
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }
}
