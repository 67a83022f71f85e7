//! LLM provider implementations with secure API key handling.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{GatewayError, LlmRequest, LlmResponse, TokenUsage};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a text generation request.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, GatewayError>;

    /// Provider name for logging and metrics.
    fn provider_name(&self) -> &'static str;

    /// The model used when a request carries no override.
    fn model_name(&self) -> &str;
}

//─────────────────────────────
//  HTTP chat-completions provider
//─────────────────────────────

/// Provider speaking the chat-completions wire format over HTTP.
pub struct HttpCompletionsProvider {
    client: Client,
    api_key: Secret<String>,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionsMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop: &'a [String],
}

#[derive(Debug, Serialize)]
struct CompletionsMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    choices: Vec<CompletionsChoice>,
    #[serde(default)]
    usage: CompletionsUsage,
    model: String,
}

#[derive(Debug, Deserialize)]
struct CompletionsChoice {
    message: CompletionsResponseMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionsResponseMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionsUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl HttpCompletionsProvider {
    /// Create a new provider against `base_url`.
    pub fn new(
        api_key: Secret<String>,
        model: String,
        base_url: String,
        timeout_secs: u64,
    ) -> Result<Self, GatewayError> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(GatewayError::InvalidRequest("empty API key".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("weaver-llm-gateway/0.1")
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        debug!(model = %model, "initialized HTTP completions provider");
        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn headers(&self) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", self.api_key.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|_| GatewayError::InvalidRequest("malformed API key".into()))?,
        );
        Ok(headers)
    }
}

#[async_trait]
impl LlmProvider for HttpCompletionsProvider {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, GatewayError> {
        let start = Instant::now();
        let model = request.model().unwrap_or(&self.model);
        let body = CompletionsRequest {
            model,
            messages: vec![CompletionsMessage {
                role: "user",
                content: request.prompt(),
            }],
            max_tokens: request.max_tokens(),
            temperature: request.temperature(),
            stop: request.stop(),
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited(format!("{status}")));
        }
        if status.is_server_error() {
            return Err(GatewayError::Transport(format!("provider answered {status}")));
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected(format!("provider answered {status}")));
        }

        let parsed: CompletionsResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::InvalidResponse("no choices in response".into()))?;

        LlmResponse::new(
            content,
            TokenUsage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
            self.provider_name(),
            parsed.model,
            start.elapsed(),
        )
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

//─────────────────────────────
//  Static provider
//─────────────────────────────

/// Deterministic in-process provider answering a fixed response.
pub struct StaticProvider {
    content: String,
}

impl StaticProvider {
    /// A provider always answering `content`.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for StaticProvider {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, GatewayError> {
        LlmResponse::new(
            self.content.clone(),
            TokenUsage {
                prompt_tokens: request.prompt().len() as u32 / 4,
                completion_tokens: self.content.len() as u32 / 4,
                total_tokens: (request.prompt().len() + self.content.len()) as u32 / 4,
            },
            self.provider_name(),
            request.model().unwrap_or("static-model").to_string(),
            Duration::ZERO,
        )
    }

    fn provider_name(&self) -> &'static str {
        "static"
    }

    fn model_name(&self) -> &str {
        "static-model"
    }
}
