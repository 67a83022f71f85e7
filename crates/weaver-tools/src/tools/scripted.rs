//! Scripted provider for tests and fault injection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Tool, ToolContext, ToolError, ToolRequest, ToolResponse};

/// One step of a scripted tool's behaviour.
#[derive(Debug, Clone)]
pub enum ScriptedBehavior {
    /// Answer with this output. Strings run through the caller's parse
    /// ladder like an LLM response; objects arrive structured.
    Respond(Value),
    /// Fail with `ToolError::Busy` (retriable).
    Busy,
    /// Fail with `ToolError::Unavailable` (fatal for the call).
    Unavailable,
    /// Fail with `ToolError::Invocation` (retriable).
    Fail(String),
    /// Sleep (observing cancellation), then answer.
    SleepThenRespond(Duration, Value),
}

/// A provider that replays a fixed behaviour script.
///
/// Behaviours are consumed in order per invocation; the last behaviour
/// repeats once the script is exhausted. This is the fault-injection
/// workhorse behind the failure, retry, and timeout scenarios.
#[derive(Debug)]
pub struct ScriptedTool {
    name: String,
    script: Vec<ScriptedBehavior>,
    calls: AtomicUsize,
    default_confidence: f64,
}

impl ScriptedTool {
    /// A tool that replays the given script.
    pub fn new(name: impl Into<String>, script: Vec<ScriptedBehavior>) -> Self {
        Self {
            name: name.into(),
            script,
            calls: AtomicUsize::new(0),
            default_confidence: 0.5,
        }
    }

    /// A tool that always answers with `output`.
    pub fn respond(name: impl Into<String>, output: Value) -> Self {
        Self::new(name, vec![ScriptedBehavior::Respond(output)])
    }

    /// A tool that always fails with `ToolError::Unavailable`.
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self::new(name, vec![ScriptedBehavior::Unavailable])
    }

    /// A tool that always fails with `ToolError::Busy`.
    pub fn busy(name: impl Into<String>) -> Self {
        Self::new(name, vec![ScriptedBehavior::Busy])
    }

    /// A tool that sleeps before answering; used by timeout scenarios.
    pub fn sleepy(name: impl Into<String>, delay: Duration, output: Value) -> Self {
        Self::new(name, vec![ScriptedBehavior::SleepThenRespond(delay, output)])
    }

    /// Override the confidence assumed when outputs omit one.
    pub fn with_default_confidence(mut self, confidence: f64) -> Self {
        self.default_confidence = confidence;
        self
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Replays a fixed behaviour script"
    }

    fn default_confidence(&self) -> f64 {
        self.default_confidence
    }

    async fn invoke(
        &self,
        _request: &ToolRequest,
        ctx: &ToolContext,
    ) -> Result<ToolResponse, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .get(call)
            .or_else(|| self.script.last())
            .ok_or_else(|| ToolError::Unavailable("empty script".to_string()))?;

        match behavior {
            ScriptedBehavior::Respond(output) => Ok(ToolResponse::structured(output.clone())),
            ScriptedBehavior::Busy => Err(ToolError::Busy("scripted".to_string())),
            ScriptedBehavior::Unavailable => {
                Err(ToolError::Unavailable("scripted".to_string()))
            }
            ScriptedBehavior::Fail(reason) => Err(ToolError::Invocation(reason.clone())),
            ScriptedBehavior::SleepThenRespond(delay, output) => {
                tokio::select! {
                    _ = ctx.cancellation.cancelled() => Err(ToolError::Cancelled),
                    _ = tokio::time::sleep(*delay) => {
                        Ok(ToolResponse::structured(output.clone()))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn script_steps_consumed_in_order_then_last_repeats() {
        let tool = ScriptedTool::new(
            "llm",
            vec![
                ScriptedBehavior::Busy,
                ScriptedBehavior::Respond(json!({"ok": 1})),
            ],
        );
        let ctx = ToolContext::new("acme", "job-1");
        let request = ToolRequest::text("hi");

        assert!(matches!(
            tool.invoke(&request, &ctx).await,
            Err(ToolError::Busy(_))
        ));
        assert_eq!(
            tool.invoke(&request, &ctx).await.unwrap().output,
            json!({"ok": 1})
        );
        // Past the end of the script the last step repeats.
        assert_eq!(
            tool.invoke(&request, &ctx).await.unwrap().output,
            json!({"ok": 1})
        );
        assert_eq!(tool.call_count(), 3);
    }

    #[tokio::test]
    async fn sleep_observes_cancellation() {
        let tool = ScriptedTool::sleepy("llm", Duration::from_secs(60), json!({}));
        let ctx = ToolContext::new("acme", "job-1");
        ctx.cancellation.cancel();
        let err = tool
            .invoke(&ToolRequest::text("hi"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
