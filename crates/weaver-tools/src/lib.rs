#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **weaver-tools** – Tool capability layer for Weaver.
//!
//! Agents call capability providers (LLM, geocoder, classifier, operator
//! extensions) through a uniform interface: every tool conforms to
//! `invoke(request, ctx) → response`, where `ctx` carries cooperative
//! cancellation. The [`ToolBroker`] maps tool names to registered providers
//! and applies two process-wide protections in front of every call:
//!
//! - a per-`(tenant, tool)` token-bucket quota — exceeded quota surfaces as
//!   [`ToolError::Busy`], which callers may retry;
//! - a per-tool circuit breaker — repeated failures open the breaker for a
//!   cool-down, during which calls fail immediately with
//!   [`ToolError::Unavailable`].
//!
//! The full provider set is registered at initialisation, not hard-coded;
//! built-in providers live under [`tools`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub mod breaker;
pub mod broker;
pub mod quota;
pub mod tools;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use broker::{BrokerConfig, ToolBroker};
pub use quota::{QuotaConfig, TokenBucketQuota};

//─────────────────────────────
//  Tool call contract
//─────────────────────────────

/// A request to one capability provider.
#[derive(Debug, Clone, Default)]
pub struct ToolRequest {
    /// The primary payload: prompt text for the LLM, free text for the
    /// geocoder/classifier.
    pub input: String,
    /// Request-level parameters (model id, temperature, max tokens, …).
    pub params: HashMap<String, Value>,
}

impl ToolRequest {
    /// A request carrying only text input.
    pub fn text(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            params: HashMap::new(),
        }
    }

    /// Attach a request parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Response from a capability provider.
///
/// LLM-style tools answer with `Value::String` raw text (the invoker runs
/// its parse ladder over it); structured tools answer with objects.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    /// The provider's output.
    pub output: Value,
}

impl ToolResponse {
    /// Wrap raw text output.
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: Value::String(output.into()),
        }
    }

    /// Wrap structured output.
    pub fn structured(output: Value) -> Self {
        Self { output }
    }
}

/// Call context threaded through every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Tenant the call is accounted against.
    pub tenant_id: String,
    /// Job correlation key, for logs.
    pub job_id: String,
    /// Cooperative cancellation tied to the job deadline. Long tool calls
    /// must observe it; the broker aborts waits on it.
    pub cancellation: CancellationToken,
}

impl ToolContext {
    /// A context for the given tenant and job.
    pub fn new(tenant_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            job_id: job_id.into(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token (the scheduler passes the job-scoped
    /// one).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors a tool call can produce. [`ToolError::retriable`] is the
/// classification the retry policy consumes.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Quota exceeded or provider saturated; retriable.
    #[error("tool busy: {0}")]
    Busy(String),
    /// The provider cannot serve calls right now (open breaker, hard
    /// provider failure); fatal for this call.
    #[error("tool unavailable: {0}")]
    Unavailable(String),
    /// No provider registered under the requested name; fatal.
    #[error("unknown tool: {0}")]
    Unknown(String),
    /// Transient provider failure (timeout, 5xx); retriable.
    #[error("tool invocation failed: {0}")]
    Invocation(String),
    /// The malformed request was rejected by the provider; fatal.
    #[error("invalid tool request: {0}")]
    InvalidRequest(String),
    /// The job was cancelled while the call was pending.
    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    /// Whether the retry policy may schedule another attempt.
    pub fn retriable(&self) -> bool {
        matches!(self, ToolError::Busy(_) | ToolError::Invocation(_))
    }
}

//─────────────────────────────
//  Tool trait
//─────────────────────────────

/// Core abstraction for capability providers.
///
/// The trait is intentionally minimal so that providers can be registered
/// from anywhere (built-ins, the LLM gateway, operator extensions) without
/// cyclic dependencies.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Canonical registry name (snake_case).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Confidence the invoker assumes when this tool's output omits one.
    fn default_confidence(&self) -> f64 {
        0.5
    }

    /// Execute the call. Implementations must observe
    /// `ctx.cancellation` across any long wait.
    async fn invoke(
        &self,
        request: &ToolRequest,
        ctx: &ToolContext,
    ) -> Result<ToolResponse, ToolError>;
}

/// Shared handle to a registered tool.
pub type ToolHandle = Arc<dyn Tool>;
