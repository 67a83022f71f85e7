//! The tool broker: name → provider mapping plus quota and breaker
//! enforcement in front of every call.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::quota::{QuotaConfig, TokenBucketQuota};
use crate::{Tool, ToolContext, ToolError, ToolHandle, ToolRequest, ToolResponse};

/// Broker-wide configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerConfig {
    /// Default per-`(tenant, tool)` quota.
    pub quota: QuotaConfig,
    /// Per-tool circuit breaker parameters.
    pub breaker: BreakerConfig,
}

/// Maps tool names to capability providers and guards each call.
///
/// The broker holds the only process-wide mutable state the engine keeps
/// between jobs: quota buckets and breaker states. Providers themselves are
/// registered once at initialisation.
pub struct ToolBroker {
    tools: DashMap<String, ToolHandle>,
    quota: TokenBucketQuota,
    breakers: DashMap<String, CircuitBreaker>,
    breaker_config: BreakerConfig,
}

impl ToolBroker {
    /// New broker with the given configuration and no tools registered.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            tools: DashMap::new(),
            quota: TokenBucketQuota::new(config.quota),
            breakers: DashMap::new(),
            breaker_config: config.breaker,
        }
    }

    /// Register a capability provider under its canonical name. Replaces any
    /// previous registration of the same name.
    pub fn register(&self, tool: ToolHandle) {
        debug!(tool = tool.name(), "registering tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Names of all registered tools.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|e| e.key().clone()).collect()
    }

    /// Look up a registered tool.
    pub fn get(&self, name: &str) -> Option<ToolHandle> {
        self.tools.get(name).map(|e| e.value().clone())
    }

    /// Override the quota for one `(tenant, tool)` pair.
    pub fn set_quota_override(&self, tenant_id: &str, tool: &str, config: QuotaConfig) {
        self.quota.set_override(tenant_id, tool, config);
    }

    /// Invoke a tool by name on behalf of `ctx.tenant_id`.
    ///
    /// Order of checks: registration → cancellation → breaker → quota →
    /// provider call. The provider call races the cancellation token; a
    /// cancelled job never waits out a slow provider.
    pub async fn invoke(
        &self,
        tool_name: &str,
        request: &ToolRequest,
        ctx: &ToolContext,
    ) -> Result<ToolResponse, ToolError> {
        let tool = self
            .get(tool_name)
            .ok_or_else(|| ToolError::Unknown(tool_name.to_string()))?;

        if ctx.cancellation.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        if !self
            .breakers
            .entry(tool_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.breaker_config))
            .allows()
        {
            warn!(tool = tool_name, job_id = %ctx.job_id, "circuit breaker open");
            return Err(ToolError::Unavailable(format!(
                "{tool_name} is cooling down"
            )));
        }

        if !self.quota.try_acquire(&ctx.tenant_id, tool_name) {
            return Err(ToolError::Busy(format!(
                "quota exceeded for {}/{tool_name}",
                ctx.tenant_id
            )));
        }

        let result = tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(ToolError::Cancelled),
            result = tool.invoke(request, ctx) => result,
        };

        match &result {
            Ok(_) => self.record_outcome(tool_name, true),
            // Quota pressure and cancellation say nothing about provider
            // health; only real call failures count against the breaker.
            Err(ToolError::Busy(_)) | Err(ToolError::Cancelled) => {}
            Err(_) => self.record_outcome(tool_name, false),
        }
        result
    }

    /// Default confidence for a tool's outputs, falling back to the LLM
    /// default when the tool is unknown.
    pub fn default_confidence(&self, tool_name: &str) -> f64 {
        self.get(tool_name)
            .map(|t| t.default_confidence())
            .unwrap_or(0.5)
    }

    fn record_outcome(&self, tool_name: &str, success: bool) {
        let mut breaker = self
            .breakers
            .entry(tool_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.breaker_config));
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }
}

impl Default for ToolBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}
