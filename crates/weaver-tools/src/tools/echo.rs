//! Deterministic echo provider.

use async_trait::async_trait;
use serde_json::json;

use crate::{Tool, ToolContext, ToolError, ToolRequest, ToolResponse};

/// Echoes the job's raw text back as a `label` with full confidence.
///
/// The canonical deterministic stand-in for an LLM: ingesting text `T`
/// through an agent whose schema is `{label, confidence}` yields a record
/// with `ingestion_data.<agent>.label == T`. The response is raw JSON text,
/// so invoker parsing is exercised the same way a real LLM response is.
#[derive(Debug, Clone, Default)]
pub struct EchoTool;

impl EchoTool {
    /// Parameter carrying the text to echo; falls back to the whole input.
    pub const TEXT_PARAM: &'static str = "text";
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes its input text back as a labelled, fully-confident output"
    }

    fn default_confidence(&self) -> f64 {
        1.0
    }

    async fn invoke(
        &self,
        request: &ToolRequest,
        _ctx: &ToolContext,
    ) -> Result<ToolResponse, ToolError> {
        let text = request
            .params
            .get(Self::TEXT_PARAM)
            .and_then(|v| v.as_str())
            .unwrap_or(&request.input);
        Ok(ToolResponse::text(
            json!({"label": text, "confidence": 1.0}).to_string(),
        ))
    }
}
