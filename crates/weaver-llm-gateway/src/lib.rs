#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **weaver-llm-gateway** – LLM provider gateway for Weaver.
//!
//! This crate abstracts the LLM backend behind a uniform completion
//! interface: model id, prompt, and request-level parameters (temperature,
//! max tokens, stop sequences) travel in an [`LlmRequest`]; the default
//! model identifier comes from configuration, not code.
//!
//! ## Security
//!
//! - API keys live behind the `secrecy` crate and never reach logs.
//! - Prompt and response lengths are capped to prevent memory exhaustion.
//!
//! The [`LlmTool`] adapter exposes the gateway as the `llm` capability
//! provider, which is how agents reach it through the tool broker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use weaver_tools::{Tool, ToolContext, ToolError, ToolRequest, ToolResponse};

pub mod config;
pub mod providers;

pub use config::{Config, ProviderConfig};
pub use providers::{HttpCompletionsProvider, LlmProvider, StaticProvider};

/// Maximum allowed prompt length to prevent memory exhaustion.
pub const MAX_PROMPT_LENGTH: usize = 32_768;

/// Maximum allowed response length to prevent memory exhaustion.
pub const MAX_RESPONSE_LENGTH: usize = 1_048_576;

/// Confidence assumed when an LLM output omits one.
pub const LLM_DEFAULT_CONFIDENCE: f64 = 0.5;

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors a gateway call can produce.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request was malformed (empty/oversized prompt, bad parameters);
    /// never retriable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The provider rejected the call outright (auth, unknown model);
    /// never retriable.
    #[error("provider rejected request: {0}")]
    Rejected(String),
    /// The provider is rate limiting; retriable.
    #[error("provider rate limited: {0}")]
    RateLimited(String),
    /// Transport-level or 5xx failure; retriable.
    #[error("provider transport failure: {0}")]
    Transport(String),
    /// The response failed validation (oversized, empty).
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether another attempt may succeed.
    pub fn retriable(&self) -> bool {
        matches!(self, GatewayError::RateLimited(_) | GatewayError::Transport(_))
    }
}

//─────────────────────────────
//  Request / response types
//─────────────────────────────

/// Request to an LLM provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    prompt: String,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    stop: Vec<String>,
}

impl LlmRequest {
    /// Create a new request with prompt validation.
    pub fn new(prompt: impl Into<String>) -> Result<Self, GatewayError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("prompt cannot be empty".into()));
        }
        if prompt.len() > MAX_PROMPT_LENGTH {
            return Err(GatewayError::InvalidRequest(format!(
                "prompt too long: {} > {} characters",
                prompt.len(),
                MAX_PROMPT_LENGTH
            )));
        }
        Ok(Self {
            prompt,
            model: None,
            max_tokens: None,
            temperature: None,
            stop: Vec::new(),
        })
    }

    /// Override the configured model for this request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set maximum tokens for the response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature (0.0 = deterministic, 1.0 = very random).
    pub fn with_temperature(mut self, temperature: f32) -> Result<Self, GatewayError> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(GatewayError::InvalidRequest(format!(
                "temperature must be between 0.0 and 1.0, got {temperature}"
            )));
        }
        self.temperature = Some(temperature);
        Ok(self)
    }

    /// Set stop sequences.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    /// The prompt text.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Per-request model override.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Maximum tokens setting.
    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    /// Temperature setting.
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Stop sequences.
    pub fn stop(&self) -> &[String] {
        &self.stop
    }
}

/// Token usage statistics for cost tracking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// Validated response from an LLM provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    content: String,
    usage: TokenUsage,
    provider: String,
    model: String,
    duration_ms: u64,
}

impl LlmResponse {
    /// Create a new response with length validation.
    pub fn new(
        content: String,
        usage: TokenUsage,
        provider: impl Into<String>,
        model: impl Into<String>,
        duration: Duration,
    ) -> Result<Self, GatewayError> {
        if content.len() > MAX_RESPONSE_LENGTH {
            return Err(GatewayError::InvalidResponse(format!(
                "response too long: {} > {} characters",
                content.len(),
                MAX_RESPONSE_LENGTH
            )));
        }
        Ok(Self {
            content,
            usage,
            provider: provider.into(),
            model: model.into(),
            duration_ms: duration.as_millis() as u64,
        })
    }

    /// The generated content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Token usage statistics.
    pub fn usage(&self) -> &TokenUsage {
        &self.usage
    }

    /// The model that answered.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Wall-clock duration of the provider call in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

//─────────────────────────────
//  Gateway
//─────────────────────────────

/// Metrics collected by the gateway for monitoring.
#[derive(Debug, Default, Clone)]
pub struct GatewayMetrics {
    /// Total requests processed.
    pub total_requests: u64,
    /// Total successful responses.
    pub successful_responses: u64,
    /// Total failed requests.
    pub failed_requests: u64,
    /// Total tokens consumed.
    pub total_tokens: u64,
}

/// Main gateway providing access to the configured language model.
pub struct LlmGateway {
    provider: Box<dyn LlmProvider>,
    config: Config,
    metrics: Arc<RwLock<GatewayMetrics>>,
}

impl LlmGateway {
    /// Create a new gateway from configuration.
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        let provider = config.create_provider()?;
        info!(
            provider = provider.provider_name(),
            model = provider.model_name(),
            region = %config.region(),
            "initialized LLM gateway"
        );
        Ok(Self {
            provider,
            config,
            metrics: Arc::new(RwLock::new(GatewayMetrics::default())),
        })
    }

    /// A gateway over an explicit provider; used by tests.
    pub fn with_provider(provider: Box<dyn LlmProvider>, config: Config) -> Self {
        Self {
            provider,
            config,
            metrics: Arc::new(RwLock::new(GatewayMetrics::default())),
        }
    }

    /// The configured fallback model identifier.
    pub fn default_model(&self) -> &str {
        self.config.default_model()
    }

    /// Complete a request against the configured provider.
    pub async fn complete(&self, mut request: LlmRequest) -> Result<LlmResponse, GatewayError> {
        if request.model.is_none() {
            request.model = Some(self.config.default_model().to_string());
        }

        let start = Instant::now();
        debug!(model = request.model.as_deref().unwrap_or(""), "dispatching LLM request");

        let result = self.provider.complete(&request).await;
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        match &result {
            Ok(response) => {
                metrics.successful_responses += 1;
                metrics.total_tokens += response.usage.total_tokens as u64;
                debug!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    tokens = response.usage.total_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                metrics.failed_requests += 1;
                error!(error = %e, "LLM request failed");
            }
        }
        result
    }

    /// Snapshot of the gateway metrics.
    pub async fn metrics(&self) -> GatewayMetrics {
        self.metrics.read().await.clone()
    }
}

//─────────────────────────────
//  Tool adapter
//─────────────────────────────

/// Exposes the gateway as the `llm` capability provider.
///
/// Request parameters recognised: `model` (string), `max_tokens` (integer),
/// `temperature` (number), `stop` (array of strings).
pub struct LlmTool {
    gateway: Arc<LlmGateway>,
}

impl LlmTool {
    /// Wrap a gateway as a tool.
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for LlmTool {
    fn name(&self) -> &str {
        "llm"
    }

    fn description(&self) -> &str {
        "Text-in / text-out completion against the configured language model"
    }

    fn default_confidence(&self) -> f64 {
        LLM_DEFAULT_CONFIDENCE
    }

    async fn invoke(
        &self,
        request: &ToolRequest,
        _ctx: &ToolContext,
    ) -> Result<ToolResponse, ToolError> {
        let mut llm_request = LlmRequest::new(request.input.clone())
            .map_err(|e| ToolError::InvalidRequest(e.to_string()))?;

        if let Some(model) = request.params.get("model").and_then(|v| v.as_str()) {
            llm_request = llm_request.with_model(model);
        }
        if let Some(max_tokens) = request.params.get("max_tokens").and_then(|v| v.as_u64()) {
            llm_request = llm_request.with_max_tokens(max_tokens as u32);
        }
        if let Some(temperature) = request.params.get("temperature").and_then(|v| v.as_f64()) {
            llm_request = llm_request
                .with_temperature(temperature as f32)
                .map_err(|e| ToolError::InvalidRequest(e.to_string()))?;
        }
        if let Some(stop) = request.params.get("stop").and_then(|v| v.as_array()) {
            llm_request = llm_request.with_stop(
                stop.iter()
                    .filter_map(|s| s.as_str().map(String::from))
                    .collect(),
            );
        }

        let response = self.gateway.complete(llm_request).await.map_err(|e| match e {
            GatewayError::RateLimited(m) => ToolError::Busy(m),
            GatewayError::Transport(m) => ToolError::Invocation(m),
            GatewayError::Rejected(m) | GatewayError::InvalidResponse(m) => {
                ToolError::Unavailable(m)
            }
            GatewayError::InvalidRequest(m) => ToolError::InvalidRequest(m),
        })?;

        Ok(ToolResponse::text(response.content().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation() {
        assert!(LlmRequest::new("").is_err());
        assert!(LlmRequest::new("   ").is_err());
        assert!(LlmRequest::new("x".repeat(MAX_PROMPT_LENGTH + 1)).is_err());
        let request = LlmRequest::new("Explain ownership").unwrap();
        assert_eq!(request.prompt(), "Explain ownership");
    }

    #[test]
    fn temperature_bounds() {
        let request = LlmRequest::new("hi").unwrap();
        assert!(request.clone().with_temperature(1.5).is_err());
        assert!(request.with_temperature(0.3).is_ok());
    }

    #[tokio::test]
    async fn gateway_fills_default_model_and_counts_tokens() {
        let config = Config::for_tests("unit-model");
        let gateway = LlmGateway::with_provider(
            Box::new(StaticProvider::new("{\"confidence\": 0.9}")),
            config,
        );

        let response = gateway
            .complete(LlmRequest::new("prompt").unwrap())
            .await
            .unwrap();
        assert_eq!(response.model(), "unit-model");

        let metrics = gateway.metrics().await;
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_responses, 1);
    }

    #[tokio::test]
    async fn llm_tool_maps_parameters_and_output() {
        let gateway = Arc::new(LlmGateway::with_provider(
            Box::new(StaticProvider::new("{\"label\": \"pothole\"}")),
            Config::for_tests("unit-model"),
        ));
        let tool = LlmTool::new(gateway);

        let request = ToolRequest::text("classify this")
            .with_param("temperature", serde_json::json!(0.3))
            .with_param("max_tokens", serde_json::json!(512));
        let response = tool
            .invoke(&request, &ToolContext::new("acme", "job-1"))
            .await
            .unwrap();
        assert_eq!(
            response.output.as_str().unwrap(),
            "{\"label\": \"pothole\"}"
        );
    }

    #[tokio::test]
    async fn llm_tool_rejects_empty_prompt() {
        let gateway = Arc::new(LlmGateway::with_provider(
            Box::new(StaticProvider::new("ignored")),
            Config::for_tests("unit-model"),
        ));
        let tool = LlmTool::new(gateway);
        let err = tool
            .invoke(&ToolRequest::text(""), &ToolContext::new("acme", "job-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidRequest(_)));
    }
}
